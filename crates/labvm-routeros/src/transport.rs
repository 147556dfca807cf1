use std::{collections::BTreeMap, future::Future};

use crate::Result;

/// Attributes of one `!re` reply, keyed without the leading `=`.
pub type Row = BTreeMap<String, String>;

/// Executes one API command and collects its `!re` replies.
///
/// The first word is the command path (`/ip/address/print`); the rest are
/// `=attribute=value` and `?query=value` words. A `!trap` reply surfaces as
/// [`Error::Trap`](crate::Error::Trap).
pub trait Transport: Send + Sync {
  fn call<'a>(
    &'a self,
    words: Vec<String>,
  ) -> impl Future<Output = Result<Vec<Row>>> + Send + 'a;
}
