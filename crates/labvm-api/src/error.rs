//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::{
    FromRequest, FromRequestParts,
    rejection::{JsonRejection, PathRejection, QueryRejection},
  },
  http::StatusCode,
  response::{IntoResponse, Response},
};
use labvm_core::ErrorKind;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler. Rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Core(#[from] labvm_core::Error),

  #[error("{0}")]
  BadRequest(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Core(e) => match e.kind() {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Upstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl From<PathRejection> for ApiError {
  fn from(rejection: PathRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

/// [`axum::Json`] whose rejections render as 400 [`ApiError`]s.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// [`axum::extract::Path`] with the same rejection rendering.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParam<T>(pub T);

/// [`axum::extract::Query`] with the same rejection rendering.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

#[cfg(test)]
mod tests {
  use labvm_core::{Backend, Error};

  use super::*;

  #[test]
  fn taxonomy_maps_to_status_codes() {
    let cases = [
      (Error::BadRequest("x".into()), StatusCode::BAD_REQUEST),
      (Error::NotFound("vm x".into()), StatusCode::NOT_FOUND),
      (Error::Conflict("x".into()), StatusCode::CONFLICT),
      (Error::CapacityExhausted("vlan"), StatusCode::CONFLICT),
      (Error::NoActiveSession("i1".into()), StatusCode::CONFLICT),
      (Error::upstream(Backend::Router, "x"), StatusCode::INTERNAL_SERVER_ERROR),
      (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (error, status) in cases {
      assert_eq!(ApiError::from(error).status(), status);
    }
  }
}
