//! RouterOS API wire format.
//!
//! A *word* is a length prefix followed by that many bytes. A *sentence* is a
//! run of words closed by an empty word. Length prefixes use a variable-width
//! encoding:
//!
//! | length            | bytes | marker      |
//! |-------------------|-------|-------------|
//! | `< 0x80`          | 1     | none        |
//! | `< 0x4000`        | 2     | `0x8000`    |
//! | `< 0x20_0000`     | 3     | `0xC0_0000` |
//! | `< 0x1000_0000`   | 4     | `0xE000_0000` |
//! | otherwise         | 5     | `0xF0` byte |

use bytes::{Buf as _, BufMut as _, BytesMut};

use crate::{Error, Result, transport::Row};

// ─── Lengths ─────────────────────────────────────────────────────────────────

pub fn encode_length(len: usize, buf: &mut BytesMut) {
  let len = len as u32;
  match len {
    0..0x80 => buf.put_u8(len as u8),
    0x80..0x4000 => buf.put_u16((len | 0x8000) as u16),
    0x4000..0x20_0000 => buf.put_uint(u64::from(len | 0xC0_0000), 3),
    0x20_0000..0x1000_0000 => buf.put_u32(len | 0xE000_0000),
    _ => {
      buf.put_u8(0xF0);
      buf.put_u32(len);
    }
  }
}

/// Decode a length prefix at the start of `buf`. Returns the length and the
/// prefix size, or `None` if `buf` ends inside the prefix.
pub fn decode_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
  let Some(&first) = buf.first() else {
    return Ok(None);
  };

  let (width, initial) = match first {
    b if b & 0x80 == 0x00 => (1, u32::from(b)),
    b if b & 0xC0 == 0x80 => (2, u32::from(b & 0x3F)),
    b if b & 0xE0 == 0xC0 => (3, u32::from(b & 0x1F)),
    b if b & 0xF0 == 0xE0 => (4, u32::from(b & 0x0F)),
    0xF0 => (5, 0),
    b => return Err(Error::Protocol(format!("control byte {b:#04x} in length prefix"))),
  };

  if buf.len() < width {
    return Ok(None);
  }
  let len = buf[1..width]
    .iter()
    .fold(initial, |acc, &b| (acc << 8) | u32::from(b));
  Ok(Some((len as usize, width)))
}

// ─── Sentences ───────────────────────────────────────────────────────────────

pub fn encode_sentence<S: AsRef<str>>(words: &[S], buf: &mut BytesMut) {
  for word in words {
    let word = word.as_ref().as_bytes();
    encode_length(word.len(), buf);
    buf.put_slice(word);
  }
  buf.put_u8(0);
}

/// Take one complete sentence off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched until the terminating empty
/// word has arrived.
pub fn decode_sentence(buf: &mut BytesMut) -> Result<Option<Vec<String>>> {
  let mut offset = 0;
  let mut spans = Vec::new();

  loop {
    let Some((len, width)) = decode_length(&buf[offset..])? else {
      return Ok(None);
    };
    offset += width;
    if len == 0 {
      break;
    }
    if buf.len() < offset + len {
      return Ok(None);
    }
    spans.push(offset..offset + len);
    offset += len;
  }

  let words = spans
    .into_iter()
    .map(|span| {
      String::from_utf8(buf[span].to_vec())
        .map_err(|e| Error::Protocol(format!("word is not UTF-8: {e}")))
    })
    .collect::<Result<Vec<_>>>()?;
  buf.advance(offset);
  Ok(Some(words))
}

// ─── Replies ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  /// One result row.
  Re(Row),
  /// End of the command; may carry `ret`.
  Done(Row),
  /// Command failed; `message` says why. A `!done` follows.
  Trap(Row),
  /// The router is closing the connection.
  Fatal(String),
}

/// Split `=key=value` into its parts. Keys may not be empty; values may.
fn attribute(word: &str) -> Option<(&str, &str)> {
  let rest = word.strip_prefix('=')?;
  let (key, value) = rest.split_once('=')?;
  (!key.is_empty()).then_some((key, value))
}

pub fn parse_reply(words: &[String]) -> Result<Reply> {
  let Some((kind, rest)) = words.split_first() else {
    return Err(Error::Protocol("empty reply sentence".into()));
  };

  let row = || -> Row {
    rest
      .iter()
      .filter_map(|w| attribute(w))
      .map(|(k, v)| (k.to_owned(), v.to_owned()))
      .collect()
  };

  match kind.as_str() {
    "!re" => Ok(Reply::Re(row())),
    "!done" => Ok(Reply::Done(row())),
    "!trap" => Ok(Reply::Trap(row())),
    "!fatal" => Ok(Reply::Fatal(rest.join(" "))),
    other => Err(Error::Protocol(format!("unexpected reply {other:?}"))),
  }
}
