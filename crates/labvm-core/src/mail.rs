//! Outgoing e-mail.

use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
  pub to:        String,
  pub subject:   String,
  pub html_body: String,
}

pub trait Mailer: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send<'a>(
    &'a self,
    email: &'a Email,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
