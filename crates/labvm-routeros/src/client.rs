//! [`ApiClient`], a single authenticated RouterOS API session over TCP.

use std::time::Duration;

use bytes::BytesMut;
use tokio::{
  io::{AsyncReadExt as _, AsyncWriteExt as _},
  net::TcpStream,
  sync::Mutex,
};

use crate::{
  Error, Result,
  codec::{Reply, decode_sentence, encode_sentence, parse_reply},
  transport::{Row, Transport},
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
  /// `host:port` of the API service, usually port 8728.
  pub addr:     String,
  pub user:     String,
  pub password: String,
  /// Deadline for connecting and for each command; `None` waits forever.
  pub timeout:  Option<Duration>,
}

struct Session {
  stream: TcpStream,
  buf:    BytesMut,
}

impl Session {
  async fn send(&mut self, words: &[String]) -> Result<()> {
    let mut out = BytesMut::new();
    encode_sentence(words, &mut out);
    self.stream.write_all(&out).await?;
    self.stream.flush().await?;
    Ok(())
  }

  async fn read_reply(&mut self) -> Result<Reply> {
    loop {
      if let Some(words) = decode_sentence(&mut self.buf)? {
        return parse_reply(&words);
      }
      if self.stream.read_buf(&mut self.buf).await? == 0 {
        return Err(Error::Protocol("connection closed mid-reply".into()));
      }
    }
  }

  /// Send one command and read replies up to its `!done`.
  async fn exchange(&mut self, words: &[String]) -> Result<Vec<Row>> {
    self.send(words).await?;

    let mut rows = Vec::new();
    let mut trap = None;
    loop {
      match self.read_reply().await? {
        Reply::Re(row) => rows.push(row),
        Reply::Trap(row) => {
          let message = row.get("message").cloned().unwrap_or_default();
          trap.get_or_insert(message);
        }
        Reply::Done(_) => break,
        Reply::Fatal(message) => return Err(Error::Fatal(message)),
      }
    }

    match trap {
      Some(message) => Err(Error::Trap { command: words[0].clone(), message }),
      None => Ok(rows),
    }
  }
}

/// A lazily connected, mutex-guarded RouterOS API session.
///
/// The session is opened and logged into on first use. Transport failures
/// drop it so the next call reconnects; `!trap` replies leave it intact.
pub struct ApiClient {
  config:  ClientConfig,
  session: Mutex<Option<Session>>,
}

impl ApiClient {
  pub fn new(config: ClientConfig) -> Self { Self { config, session: Mutex::new(None) } }

  async fn open(&self) -> Result<Session> {
    let stream = TcpStream::connect(&self.config.addr).await?;
    stream.set_nodelay(true)?;
    let mut session = Session { stream, buf: BytesMut::with_capacity(4096) };

    let login = vec![
      "/login".to_owned(),
      format!("=name={}", self.config.user),
      format!("=password={}", self.config.password),
    ];
    match session.exchange(&login).await {
      Ok(_) => {}
      Err(Error::Trap { message, .. }) => return Err(Error::Login(message)),
      Err(e) => return Err(e),
    }

    tracing::info!(addr = %self.config.addr, user = %self.config.user, "router session opened");
    Ok(session)
  }

  /// Bound `work` by the configured deadline.
  async fn bounded<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
    match self.config.timeout {
      Some(after) => tokio::time::timeout(after, work).await.map_err(|_| Error::Timeout(after))?,
      None => work.await,
    }
  }
}

impl Transport for ApiClient {
  async fn call(&self, words: Vec<String>) -> Result<Vec<Row>> {
    tracing::debug!(command = %words.first().map(String::as_str).unwrap_or_default(), "router call");
    let mut guard = self.session.lock().await;
    if guard.is_none() {
      *guard = Some(self.bounded(self.open()).await?);
    }
    let Some(session) = guard.as_mut() else {
      return Err(Error::Protocol("router session unavailable".into()));
    };

    // A timed-out command may still be answered; its reply must not be read
    // by the next one, so the session goes with it.
    let result = self.bounded(session.exchange(&words)).await;
    if let Err(e) = &result
      && e.breaks_session()
    {
      tracing::warn!(error = %e, "dropping router session");
      *guard = None;
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use tokio::net::TcpListener;

  use super::*;

  /// Read one sentence from `stream` on the router side.
  async fn read_command(stream: &mut TcpStream, buf: &mut BytesMut) -> Vec<String> {
    loop {
      if let Some(words) = decode_sentence(buf).unwrap() {
        return words;
      }
      assert!(stream.read_buf(buf).await.unwrap() > 0, "client hung up");
    }
  }

  async fn reply(stream: &mut TcpStream, sentences: &[&[&str]]) {
    let mut out = BytesMut::new();
    for &words in sentences {
      encode_sentence(words, &mut out);
    }
    stream.write_all(&out).await.unwrap();
  }

  fn client_for(listener: &TcpListener, timeout: Option<Duration>) -> ApiClient {
    ApiClient::new(ClientConfig {
      addr: listener.local_addr().unwrap().to_string(),
      user: "admin".into(),
      password: "secret".into(),
      timeout,
    })
  }

  #[tokio::test]
  async fn logs_in_then_collects_rows() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = client_for(&listener, None);

    let router = tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      let mut buf = BytesMut::new();

      let login = read_command(&mut stream, &mut buf).await;
      assert_eq!(login, vec!["/login", "=name=admin", "=password=secret"]);
      reply(&mut stream, &[&["!done"]]).await;

      let print = read_command(&mut stream, &mut buf).await;
      assert_eq!(print[0], "/interface/vlan/print");
      reply(&mut stream, &[
        &["!re", "=.id=*1", "=name=vlan2"],
        &["!re", "=.id=*2", "=name=vlan3"],
        &["!done"],
      ])
      .await;
    });

    let rows = client
      .call(vec!["/interface/vlan/print".into()])
      .await
      .unwrap();
    router.await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["name"], "vlan3");
  }

  #[tokio::test]
  async fn trap_is_reported_with_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = client_for(&listener, None);

    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      let mut buf = BytesMut::new();
      read_command(&mut stream, &mut buf).await;
      reply(&mut stream, &[&["!done"]]).await;
      read_command(&mut stream, &mut buf).await;
      reply(&mut stream, &[&["!trap", "=message=failure: already have such address"], &["!done"]])
        .await;
      // Keep the socket open until the client is done with it.
      let _ = read_command(&mut stream, &mut buf).await;
    });

    let err = client
      .call(vec!["/ip/address/add".into(), "=address=10.0.2.1/24".into()])
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "/ip/address/add: failure: already have such address");
  }

  #[tokio::test]
  async fn rejected_login_is_a_login_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = client_for(&listener, None);

    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      let mut buf = BytesMut::new();
      read_command(&mut stream, &mut buf).await;
      reply(&mut stream, &[&["!trap", "=message=invalid user name or password (6)"], &["!done"]])
        .await;
    });

    let err = client.call(vec!["/system/identity/print".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Login(_)), "{err:?}");
  }

  #[tokio::test]
  async fn silent_router_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = client_for(&listener, Some(Duration::from_millis(100)));

    let _router = tokio::spawn(async move {
      let (_stream, _) = listener.accept().await.unwrap();
      tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let err = client.call(vec!["/interface/print".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err:?}");
  }

  #[tokio::test]
  async fn late_reply_is_not_read_by_next_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = client_for(&listener, Some(Duration::from_millis(100)));

    let router = tokio::spawn(async move {
      // Answers every command honestly, but the first one too late.
      let (mut slow, _) = listener.accept().await.unwrap();
      let mut buf = BytesMut::new();
      read_command(&mut slow, &mut buf).await;
      reply(&mut slow, &[&["!done"]]).await;
      let first = read_command(&mut slow, &mut buf).await;
      tokio::time::sleep(Duration::from_millis(300)).await;
      let id = format!("=.id=reply-to:{}", first[0]);
      let mut late = BytesMut::new();
      encode_sentence(&["!re", id.as_str()], &mut late);
      encode_sentence(&["!done"], &mut late);
      // The client may already have hung up.
      let _ = slow.write_all(&late).await;

      let (mut fresh, _) = listener.accept().await.unwrap();
      let mut buf = BytesMut::new();
      read_command(&mut fresh, &mut buf).await;
      reply(&mut fresh, &[&["!done"]]).await;
      let second = read_command(&mut fresh, &mut buf).await;
      let id = format!("=.id=reply-to:{}", second[0]);
      reply(&mut fresh, &[&["!re", id.as_str()], &["!done"]]).await;
    });

    let err = client.call(vec!["/ip/vrf/print".into()]).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err:?}");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let rows = client.call(vec!["/interface/vlan/print".into()]).await.unwrap();
    router.await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][".id"], "reply-to:/interface/vlan/print");
  }
}
