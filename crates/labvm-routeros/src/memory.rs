//! [`MemoryRouter`], an in-memory RouterOS API for tests.
//!
//! Understands `print` (with `?key=value` filters and `.proplist`), `add`,
//! `set`, and `remove` on any menu path, plus `/login`. Objects receive
//! RouterOS-style `.id`s (`*1`, `*2`, …). WireGuard interfaces get a
//! synthetic `public-key` on creation.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{Mutex, MutexGuard},
};

use crate::{
  Error, Result,
  transport::{Row, Transport},
};

#[derive(Default)]
struct State {
  tables:   BTreeMap<String, Vec<Row>>,
  next_id:  u64,
  failures: HashMap<String, String>,
  swallow:  HashSet<String>,
  log:      Vec<Vec<String>>,
}

#[derive(Default)]
pub struct MemoryRouter {
  state: Mutex<State>,
}

struct Parsed {
  attrs:    Row,
  queries:  Row,
  proplist: Option<Vec<String>>,
}

fn parse_words(words: &[String]) -> Parsed {
  let mut parsed = Parsed { attrs: Row::new(), queries: Row::new(), proplist: None };
  for word in words {
    if let Some(rest) = word.strip_prefix('?') {
      if let Some((k, v)) = rest.split_once('=') {
        parsed.queries.insert(k.to_owned(), v.to_owned());
      }
    } else if let Some(rest) = word.strip_prefix('=')
      && let Some((k, v)) = rest.split_once('=')
    {
      if k == ".proplist" {
        parsed.proplist = Some(v.split(',').map(str::to_owned).collect());
      } else {
        parsed.attrs.insert(k.to_owned(), v.to_owned());
      }
    }
  }
  parsed
}

fn trap(command: &str, message: &str) -> Error {
  Error::Trap { command: command.to_owned(), message: message.to_owned() }
}

impl MemoryRouter {
  pub fn new() -> Self { Self::default() }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Every object under `path`, e.g. `/interface/vlan`.
  pub fn objects(&self, path: &str) -> Vec<Row> {
    self.state().tables.get(path).cloned().unwrap_or_default()
  }

  /// Number of objects across all menus.
  pub fn total_objects(&self) -> usize { self.state().tables.values().map(Vec::len).sum() }

  /// Answer `command` (e.g. `/ip/vrf/add`) with `!trap` until cleared.
  pub fn fail_on(&self, command: &str, message: &str) {
    self.state().failures.insert(command.to_owned(), message.to_owned());
  }

  pub fn clear_failures(&self) {
    let mut state = self.state();
    state.failures.clear();
    state.swallow.clear();
  }

  /// Accept `add` under `path` without storing anything.
  pub fn swallow_adds(&self, path: &str) { self.state().swallow.insert(path.to_owned()); }

  /// Every command received so far, in order.
  pub fn commands(&self) -> Vec<Vec<String>> { self.state().log.clone() }

  fn execute(&self, words: &[String]) -> Result<Vec<Row>> {
    let Some(command) = words.first() else {
      return Err(Error::Protocol("empty command".into()));
    };

    let mut state = self.state();
    state.log.push(words.to_vec());
    if let Some(message) = state.failures.get(command) {
      return Err(trap(command, message));
    }
    if command == "/login" {
      return Ok(vec![]);
    }

    let Some((path, verb)) = command.rsplit_once('/') else {
      return Err(trap(command, "no such command"));
    };
    let Parsed { attrs, queries, proplist } = parse_words(&words[1..]);

    match verb {
      "print" => {
        let rows = state.tables.get(path).map(Vec::as_slice).unwrap_or_default();
        Ok(
          rows
            .iter()
            .filter(|row| queries.iter().all(|(k, v)| row.get(k) == Some(v)))
            .map(|row| match &proplist {
              Some(props) => row
                .iter()
                .filter(|(k, _)| props.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
              None => row.clone(),
            })
            .collect(),
        )
      }
      "add" => {
        if state.swallow.contains(path) {
          return Ok(vec![]);
        }
        state.next_id += 1;
        let mut row = attrs;
        row.insert(".id".into(), format!("*{:X}", state.next_id));
        if path == "/interface/wireguard" {
          let name = row.get("name").cloned().unwrap_or_default();
          row.insert("public-key".into(), format!("{name}PublicKey{}=", state.next_id));
        }
        state.tables.entry(path.to_owned()).or_default().push(row);
        Ok(vec![])
      }
      "set" => {
        let id = attrs.get(".id").cloned().unwrap_or_default();
        let row = state
          .tables
          .get_mut(path)
          .and_then(|rows| rows.iter_mut().find(|row| row.get(".id") == Some(&id)))
          .ok_or_else(|| trap(command, "no such item"))?;
        row.extend(attrs.into_iter().filter(|(k, _)| k != ".id"));
        Ok(vec![])
      }
      "remove" => {
        let id = attrs.get(".id").cloned().unwrap_or_default();
        let rows = state.tables.entry(path.to_owned()).or_default();
        let before = rows.len();
        rows.retain(|row| row.get(".id") != Some(&id));
        if rows.len() == before {
          return Err(trap(command, "no such item"));
        }
        Ok(vec![])
      }
      _ => Err(trap(command, "no such command")),
    }
  }
}

impl Transport for MemoryRouter {
  async fn call(&self, words: Vec<String>) -> Result<Vec<Row>> { self.execute(&words) }
}
