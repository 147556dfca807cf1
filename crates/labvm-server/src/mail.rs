//! [`SmtpMailer`]: session notices over SMTP.

use labvm_core::mail::{Email, Mailer};
use lettre::{
  AsyncSmtpTransport, AsyncTransport as _, Message, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
  #[error("invalid address: {0}")]
  Address(#[from] lettre::address::AddressError),

  #[error("cannot build message: {0}")]
  Message(#[from] lettre::error::Error),

  #[error("smtp: {0}")]
  Smtp(#[from] lettre::transport::smtp::Error),
}

pub struct SmtpMailer {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from:      Mailbox,
}

impl SmtpMailer {
  /// A relay on `host:port`. Port 465 uses implicit TLS, every other port
  /// STARTTLS. Credentials are only sent when both parts are set.
  pub fn new(
    host: &str,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    from: &str,
  ) -> Result<Self, MailError> {
    let builder = if port == 465 {
      AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
    };
    let mut builder = builder.port(port);
    if let (Some(username), Some(password)) = (username, password) {
      builder = builder.credentials(Credentials::new(username, password));
    }
    Ok(Self { transport: builder.build(), from: from.parse()? })
  }
}

impl Mailer for SmtpMailer {
  type Error = MailError;

  async fn send(&self, email: &Email) -> Result<(), Self::Error> {
    let message = Message::builder()
      .from(self.from.clone())
      .to(email.to.parse()?)
      .subject(email.subject.as_str())
      .header(ContentType::TEXT_HTML)
      .body(email.html_body.clone())?;
    self.transport.send(message).await?;
    tracing::debug!(to = %email.to, subject = %email.subject, "mail sent");
    Ok(())
  }
}
