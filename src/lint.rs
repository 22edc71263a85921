//! # Linting
//!
//! Structural checks of resource files, run before anything is built.
//!
//! A [`Linter`] receives the parsed document together with the raw text it
//! came from and returns zero or more [`Lint`]s. No findings means the
//! document is structurally valid. Line numbers are 1-based and relative to
//! the file.
//!
//! [`SchemaLinter`] checks documents against the [`ComponentSpec`]s of an
//! [`Environment`]:
//!
//! - unknown top-level keys
//! - category values that are not lists
//! - missing, empty or duplicate labels
//! - entries that do not name exactly one component type
//! - unknown component types
//! - unknown fields, missing required fields and scalar type mismatches

use crate::component::ResourceCategory;
use crate::docs::ComponentSpec;
use crate::environment::Environment;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LintLevel {
  /// Suspicious but buildable.
  Warning,
  /// Will not build as written.
  Error,
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lint {
  /// 1-based line in the source file.
  pub line: usize,
  /// Severity.
  pub level: LintLevel,
  /// Human readable description.
  pub message: String,
}

impl Lint {
  /// An error-level finding.
  pub fn error(line: usize, message: impl Into<String>) -> Self {
    Self {
      line,
      level: LintLevel::Error,
      message: message.into(),
    }
  }

  /// A warning-level finding.
  pub fn warning(line: usize, message: impl Into<String>) -> Self {
    Self {
      line,
      level: LintLevel::Warning,
      message: message.into(),
    }
  }
}

impl fmt::Display for Lint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "line {}: {}", self.line, self.message)
  }
}

/// Validates a parsed resource document.
pub trait Linter: Send + Sync {
  /// Returns every finding for `doc`, parsed from `raw`.
  fn lint(&self, doc: &Value, raw: &str) -> Vec<Lint>;
}

/// A linter that never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinter;

impl Linter for NoopLinter {
  fn lint(&self, _doc: &Value, _raw: &str) -> Vec<Lint> {
    Vec::new()
  }
}

/// Checks documents against the component specs of an [`Environment`].
#[derive(Debug, Clone)]
pub struct SchemaLinter {
  env: Arc<Environment>,
}

impl SchemaLinter {
  /// Creates a linter for `env`.
  pub fn new(env: Arc<Environment>) -> Self {
    Self { env }
  }
}

impl Linter for SchemaLinter {
  fn lint(&self, doc: &Value, raw: &str) -> Vec<Lint> {
    let lines = SourceLines::new(raw);
    let mut lints = Vec::new();

    let root = match doc {
      Value::Null => return lints,
      Value::Mapping(m) => m,
      _ => {
        lints.push(Lint::error(1, "expected object value at root"));
        return lints;
      }
    };

    for (key, value) in root {
      let key = key.as_str().unwrap_or_default();
      let key_line = lines.key_line(key, 0);
      let Some(category) = ResourceCategory::from_config_key(key) else {
        lints.push(Lint::error(key_line, format!("field {key} not recognised")));
        continue;
      };
      match value {
        Value::Null => {}
        Value::Sequence(entries) => {
          let entry_lines = lines.item_lines(key_line, entries.len());
          self.lint_category(category, entries, &entry_lines, &lines, &mut lints);
        }
        _ => lints.push(Lint::error(key_line, format!("expected array value for {key}"))),
      }
    }
    lints
  }
}

impl SchemaLinter {
  fn lint_category(
    &self,
    category: ResourceCategory,
    entries: &[Value],
    entry_lines: &[usize],
    lines: &SourceLines<'_>,
    lints: &mut Vec<Lint>,
  ) {
    let mut seen = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
      let line = entry_lines.get(i).copied().unwrap_or(1);
      let Value::Mapping(fields) = entry else {
        lints.push(Lint::error(line, format!("expected object value for {category} resource")));
        continue;
      };

      let label = fields.get("label").and_then(Value::as_str).unwrap_or_default();
      if label.is_empty() {
        lints.push(Lint::error(line, format!("{category} resource is missing a label")));
      } else if !seen.insert(label.to_string()) {
        lints.push(Lint::error(
          line,
          format!("{category} resource label '{label}' is declared more than once"),
        ));
      }

      let plugins: Vec<(&str, &Value)> = fields
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
        .filter(|(k, _)| *k != "label")
        .collect();
      match plugins.as_slice() {
        [] => lints.push(Lint::error(
          line,
          format!("{category} resource '{label}' does not declare a component type"),
        )),
        [(name, options)] => match self.env.spec(category, name) {
          Some(spec) => {
            let type_line = lines.key_line(name, line.saturating_sub(1));
            lint_options(spec, options, type_line, lines, lints);
          }
          None => lints.push(Lint::error(
            lines.key_line(name, line.saturating_sub(1)),
            format!("{category} type '{name}' was not recognised"),
          )),
        },
        many => lints.push(Lint::error(
          line,
          format!(
            "{category} resource '{label}' declares more than one component type: {}",
            many.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ")
          ),
        )),
      }
    }
  }
}

fn lint_options(
  spec: &ComponentSpec,
  options: &Value,
  line: usize,
  lines: &SourceLines<'_>,
  lints: &mut Vec<Lint>,
) {
  let empty = serde_yaml::Mapping::new();
  let options = match options {
    Value::Null => &empty,
    Value::Mapping(m) => m,
    _ => {
      lints.push(Lint::error(line, format!("expected object value for {}", spec.name)));
      return;
    }
  };
  if spec.lenient {
    return;
  }

  for (key, value) in options {
    let key = key.as_str().unwrap_or_default();
    let key_line = lines.key_line(key, line.saturating_sub(1));
    match spec.field(key) {
      None => lints.push(Lint::error(key_line, format!("field {key} not recognised"))),
      Some(field) if !field.field_type.accepts(value) => lints.push(Lint::error(
        key_line,
        format!("expected {} value for field {key}", field.field_type.as_str()),
      )),
      Some(_) => {}
    }
  }

  for field in spec.fields.iter().filter(|f| !f.optional) {
    if !options.contains_key(field.name.as_str()) {
      lints.push(Lint::error(line, format!("field {} is required", field.name)));
    }
  }
}

/// Maps document positions back to source lines by scanning the raw text.
struct SourceLines<'a> {
  lines: Vec<&'a str>,
}

impl<'a> SourceLines<'a> {
  fn new(raw: &'a str) -> Self {
    Self {
      lines: raw.lines().collect(),
    }
  }

  fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
  }

  fn is_blank(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
  }

  /// First line at or after index `from` that declares `key`, 1-based.
  fn key_line(&self, key: &str, from: usize) -> usize {
    let plain = format!("{key}:");
    let quoted = format!("\"{key}\":");
    self
      .lines
      .iter()
      .enumerate()
      .skip(from)
      .find(|(_, l)| {
        let t = l.trim_start().trim_start_matches("- ");
        t.starts_with(&plain) || t.starts_with(&quoted)
      })
      .map(|(i, _)| i + 1)
      .unwrap_or(from.max(1))
  }

  /// Lines of the first `count` list items under the key on `key_line`.
  fn item_lines(&self, key_line: usize, count: usize) -> Vec<usize> {
    let Some(key) = self.lines.get(key_line.saturating_sub(1)) else {
      return Vec::new();
    };
    let key_indent = Self::indent(key);
    let mut item_indent = None;
    let mut out = Vec::with_capacity(count);
    for (i, line) in self.lines.iter().enumerate().skip(key_line) {
      if out.len() == count || Self::is_blank(line) {
        if out.len() == count {
          break;
        }
        continue;
      }
      let indent = Self::indent(line);
      let is_item = line.trim_start().starts_with('-');
      if indent < key_indent || (indent == key_indent && !is_item) {
        break;
      }
      if !is_item {
        continue;
      }
      match item_indent {
        None => {
          item_indent = Some(indent);
          out.push(i + 1);
        }
        Some(expected) if expected == indent => out.push(i + 1),
        Some(_) => {}
      }
    }
    out
  }
}
