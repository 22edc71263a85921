//! Reads resource files: substitution, parsing and linting.

use super::env::substitute_env_vars;
use super::{ConfigError, ResourceConfig};
use crate::lint::{Lint, Linter};
use std::path::Path;
use tracing::debug;

/// A file starting with this marker skips schema linting.
pub const LINT_DISABLE_MARKER: &str = "# WEAVEFLOW LINT DISABLE";

/// A parsed resource file and its lint findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResources {
  /// Declared resources.
  pub config: ResourceConfig,
  /// Findings, ordered by line.
  pub lints: Vec<Lint>,
}

/// Parses the contents of a resource file.
///
/// Unset environment variables and schema findings are returned as lints.
/// Only malformed YAML, or a document that cannot be mapped onto
/// [`ResourceConfig`] at all, is an error.
pub fn parse_resources(
  path: &Path,
  raw: &str,
  linter: &dyn Linter,
) -> Result<ParsedResources, ConfigError> {
  let substituted = substitute_env_vars(raw);
  let mut lints: Vec<Lint> = substituted
    .missing
    .iter()
    .map(|m| {
      Lint::warning(
        m.line,
        format!("required environment variable was not set: {}", m.name),
      )
    })
    .collect();

  let parse_err = |e: serde_yaml::Error| ConfigError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  };

  let doc: serde_yaml::Value = if substituted.text.trim().is_empty() {
    serde_yaml::Value::Null
  } else {
    serde_yaml::from_str(&substituted.text).map_err(parse_err)?
  };

  if raw.starts_with(LINT_DISABLE_MARKER) {
    debug!(path = %path.display(), "Schema linting disabled for file");
  } else {
    lints.extend(linter.lint(&doc, &substituted.text));
  }
  lints.sort_by_key(|l| l.line);

  let config = match doc {
    serde_yaml::Value::Null => ResourceConfig::default(),
    doc => serde_yaml::from_value(doc).map_err(parse_err)?,
  };
  Ok(ParsedResources { config, lints })
}

/// Reads and parses a resource file.
pub async fn read_resource_file(
  path: &Path,
  linter: &dyn Linter,
) -> Result<ParsedResources, ConfigError> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
  parse_resources(path, &raw, linter)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::component::ResourceCategory;
  use crate::environment::Environment;
  use crate::lint::{LintLevel, NoopLinter, SchemaLinter};
  use std::sync::Arc;

  fn schema() -> SchemaLinter {
    SchemaLinter::new(Arc::new(Environment::builtin()))
  }

  #[test]
  fn test_parse_resources() {
    let raw = "cache_resources:\n  - label: c\n    memory: {}\n";
    let parsed = parse_resources(Path::new("a.yaml"), raw, &schema()).unwrap();
    assert!(parsed.lints.is_empty());
    assert_eq!(parsed.config.category(ResourceCategory::Cache)[0].label, "c");
  }

  #[test]
  fn test_empty_file() {
    let parsed = parse_resources(Path::new("a.yaml"), "\n# nothing\n", &schema()).unwrap();
    assert!(parsed.config.is_empty());
    assert!(parsed.lints.is_empty());
  }

  #[test]
  fn test_missing_env_var_is_a_lint() {
    let raw = "output_resources:\n  - label: out\n    memory:\n      sink: ${WEAVEFLOW_READER_TEST_UNSET_VAR}x\n";
    let parsed = parse_resources(Path::new("a.yaml"), raw, &NoopLinter).unwrap();
    assert_eq!(parsed.lints.len(), 1);
    assert_eq!(parsed.lints[0].line, 4);
    assert_eq!(parsed.lints[0].level, LintLevel::Warning);
    assert!(parsed.lints[0].message.contains("WEAVEFLOW_READER_TEST_UNSET_VAR"));
  }

  #[test]
  fn test_lint_disable_marker() {
    let raw = format!("{LINT_DISABLE_MARKER}\ncache_resources:\n  - label: c\n    memory:\n      bogus: 1\n");
    let parsed = parse_resources(Path::new("a.yaml"), &raw, &schema()).unwrap();
    assert!(parsed.lints.is_empty());

    let linted = parse_resources(Path::new("a.yaml"), &raw[LINT_DISABLE_MARKER.len()..], &schema()).unwrap();
    assert_eq!(linted.lints.len(), 1);
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let err = parse_resources(Path::new("bad.yaml"), "cache_resources: [", &NoopLinter).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with("failed to parse bad.yaml"));
  }

  #[tokio::test]
  async fn test_read_missing_file() {
    let err = read_resource_file(Path::new("/definitely/not/here.yaml"), &NoopLinter)
      .await
      .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }
}
