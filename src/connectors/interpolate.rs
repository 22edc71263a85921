//! String templates evaluated per message.
//!
//! Literal text is copied as is; `${!function}` segments are evaluated for
//! each message:
//!
//! | Function | Value |
//! |----------|-------|
//! | `count` | a counter starting at 1, incremented per render |
//! | `timestamp_unix` | current Unix time in seconds |
//! | `timestamp_unix_nano` | current Unix time in nanoseconds |
//! | `meta:KEY` | metadata value `KEY`, empty when absent |
//! | `content` | the payload, lossily decoded as UTF-8 |

use crate::error::ComponentError;
use crate::message::Message;
use regex::Regex;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

static FUNCTION_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\$\{!([^}]*)\}").expect("valid interpolation regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
  Literal(String),
  Count,
  TimestampUnix,
  TimestampUnixNano,
  Meta(String),
  Content,
}

/// A parsed template.
#[derive(Debug)]
pub struct Template {
  raw: String,
  parts: Vec<Part>,
  counter: AtomicU64,
}

impl Template {
  /// Parses `raw`, rejecting unknown functions.
  pub fn parse(raw: &str) -> Result<Self, ComponentError> {
    let mut parts = Vec::new();
    let mut last = 0;
    for caps in FUNCTION_RE.captures_iter(raw) {
      let Some(whole) = caps.get(0) else {
        continue;
      };
      if whole.start() > last {
        parts.push(Part::Literal(raw[last..whole.start()].to_string()));
      }
      let function = caps[1].trim();
      let part = match function {
        "count" => Part::Count,
        "timestamp_unix" => Part::TimestampUnix,
        "timestamp_unix_nano" => Part::TimestampUnixNano,
        "content" => Part::Content,
        f => match f.strip_prefix("meta:") {
          Some(key) if !key.is_empty() => Part::Meta(key.to_string()),
          _ => {
            return Err(ComponentError::Config(format!(
              "unknown interpolation function '{f}' in '{raw}'"
            )));
          }
        },
      };
      parts.push(part);
      last = whole.end();
    }
    if last < raw.len() {
      parts.push(Part::Literal(raw[last..].to_string()));
    }
    Ok(Self {
      raw: raw.to_string(),
      parts,
      counter: AtomicU64::new(0),
    })
  }

  /// The source text.
  pub fn raw(&self) -> &str {
    &self.raw
  }

  /// True when the template contains no functions.
  pub fn is_static(&self) -> bool {
    self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
  }

  /// Evaluates the template against `msg`.
  pub fn render(&self, msg: &Message) -> String {
    let mut out = String::new();
    for part in &self.parts {
      match part {
        Part::Literal(s) => out.push_str(s),
        Part::Count => {
          let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
          out.push_str(&n.to_string());
        }
        Part::TimestampUnix => out.push_str(&chrono::Utc::now().timestamp().to_string()),
        Part::TimestampUnixNano => {
          let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
          out.push_str(&nanos.to_string());
        }
        Part::Meta(key) => out.push_str(msg.get_meta(key).unwrap_or_default()),
        Part::Content => out.push_str(&String::from_utf8_lossy(msg.payload())),
      }
    }
    out
  }
}
