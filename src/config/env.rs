//! Environment variable substitution for resource files.
//!
//! `${NAME}` is replaced by the value of `NAME`. `${NAME:default}` falls back
//! to `default` when `NAME` is unset or empty. A variable that is unset and
//! has no default becomes an empty string and is reported back to the caller
//! together with the line it appeared on, so the reader can surface it as a
//! lint instead of failing the whole file.

use regex::Regex;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("valid env var regex")
});

/// An unset variable with no default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVar {
  /// Variable name.
  pub name: String,
  /// 1-based line of the reference.
  pub line: usize,
}

/// Result of [`substitute_env_vars`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
  /// Text with every reference replaced.
  pub text: String,
  /// References that resolved to nothing.
  pub missing: Vec<MissingVar>,
}

/// Substitutes variables from the process environment.
pub fn substitute_env_vars(input: &str) -> Substitution {
  substitute_with(input, |name| std::env::var(name).ok())
}

/// Substitutes variables using `lookup` to resolve each name.
pub fn substitute_with<F>(input: &str, lookup: F) -> Substitution
where
  F: Fn(&str) -> Option<String>,
{
  let mut text = String::with_capacity(input.len());
  let mut missing = Vec::new();
  let mut last = 0;

  for caps in ENV_VAR_RE.captures_iter(input) {
    let Some(whole) = caps.get(0) else {
      continue;
    };
    text.push_str(&input[last..whole.start()]);
    let name = &caps[1];
    match (lookup(name).filter(|v| !v.is_empty()), caps.get(2)) {
      (Some(value), _) => text.push_str(&value),
      (None, Some(default)) => text.push_str(default.as_str()),
      (None, None) => missing.push(MissingVar {
        name: name.to_string(),
        line: line_of(input, whole.start()),
      }),
    }
    last = whole.end();
  }
  text.push_str(&input[last..]);

  Substitution { text, missing }
}

fn line_of(input: &str, offset: usize) -> usize {
  input[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}
