//! # Configuration
//!
//! Data types for resource files and engine-level settings.
//!
//! ## Resource files
//!
//! A resource file is a YAML document with up to five category keys, each a
//! list of labelled component configs. Every entry carries a `label` and
//! exactly one further key naming the implementation, whose value holds that
//! implementation's options:
//!
//! ```yaml
//! cache_resources:
//!   - label: users
//!     memory:
//!       default_ttl: 5m
//! processor_resources:
//!   - label: lookup
//!     cache:
//!       resource: users
//!       operator: get
//!       key: ${!meta:user_id}
//! ```
//!
//! Files are read through [`reader`], which applies [`env`] substitution and
//! linting before deserializing into [`ResourceConfig`].
//!
//! ## Engine settings
//!
//! [`EngineConfig`] holds process-wide settings such as strict mode, the
//! shared update timeout and the resource file globs.

pub mod duration;
pub mod env;
pub mod reader;

use crate::component::ResourceCategory;
use crate::component::backoff::BackoffConfig;
use crate::error::ComponentError;
use duration::{deserialize_duration, serialize_duration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The file could not be read.
  #[error("failed to read resource file {}: {source}", path.display())]
  Read {
    /// File path.
    path: PathBuf,
    /// Underlying I/O failure.
    #[source]
    source: std::io::Error,
  },
  /// The document is not valid YAML or does not match the expected shape.
  #[error("failed to parse {}: {message}", path.display())]
  Parse {
    /// File path, empty for in-memory documents.
    path: PathBuf,
    /// Parser message.
    message: String,
  },
  /// A resource path glob was malformed.
  #[error("invalid resource path pattern '{pattern}': {message}")]
  Glob {
    /// The offending pattern.
    pattern: String,
    /// Parser message.
    message: String,
  },
  /// Two files declare the same label for the same category.
  #[error("{category} resource '{label}' is declared in both {} and {}", first.display(), second.display())]
  LabelCollision {
    /// Category of the colliding resources.
    category: ResourceCategory,
    /// Colliding label.
    label: String,
    /// File that declared it first.
    first: PathBuf,
    /// File that declared it again.
    second: PathBuf,
  },
  /// One file declares the same label twice within a category.
  #[error("{category} resource '{label}' is declared more than once")]
  DuplicateLabel {
    /// Category of the duplicate.
    category: ResourceCategory,
    /// Duplicate label.
    label: String,
  },
  /// A resource entry has no label.
  #[error("{0} resource is missing a label")]
  MissingLabel(ResourceCategory),
  /// A duration string could not be parsed.
  #[error("invalid duration '{value}': {reason}")]
  InvalidDuration {
    /// Raw value.
    value: String,
    /// Why it was rejected.
    reason: String,
  },
  /// Strict mode rejected a file because the linter reported findings.
  #[error("{} produced {count} lint finding(s) and strict mode is enabled", path.display())]
  LintRejected {
    /// File path.
    path: PathBuf,
    /// Number of findings.
    count: usize,
  },
  /// Applying a resource to the registry failed.
  #[error("failed to update resource {label}: {source}")]
  Apply {
    /// Label of the failing resource.
    label: String,
    /// Registry error.
    #[source]
    source: ComponentError,
  },
}

impl From<ConfigError> for ComponentError {
  fn from(err: ConfigError) -> Self {
    ComponentError::Config(err.to_string())
  }
}

/// One labelled component declaration.
///
/// Every key other than `label` is captured in `plugin`; a valid entry has
/// exactly one, naming the implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
  /// Registry label.
  #[serde(default)]
  pub label: String,
  /// Implementation name mapped to its options.
  #[serde(flatten)]
  pub plugin: BTreeMap<String, serde_yaml::Value>,
}

impl ComponentConfig {
  /// Creates a config for implementation `type_name` with `options`.
  pub fn new(
    label: impl Into<String>,
    type_name: impl Into<String>,
    options: serde_yaml::Value,
  ) -> Self {
    let mut plugin = BTreeMap::new();
    plugin.insert(type_name.into(), options);
    Self {
      label: label.into(),
      plugin,
    }
  }

  /// Parses `yaml` as the options of a new config.
  pub fn from_yaml(
    label: impl Into<String>,
    type_name: impl Into<String>,
    yaml: &str,
  ) -> Result<Self, ConfigError> {
    let options = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
      path: PathBuf::new(),
      message: e.to_string(),
    })?;
    Ok(Self::new(label, type_name, options))
  }

  /// The implementation name and its options.
  ///
  /// Fails unless exactly one implementation key is present.
  pub fn plugin(&self) -> Result<(&str, &serde_yaml::Value), ComponentError> {
    let mut iter = self.plugin.iter();
    match (iter.next(), iter.next()) {
      (Some((name, options)), None) => Ok((name.as_str(), options)),
      (None, _) => Err(ComponentError::Config(format!(
        "resource '{}' does not declare a component type",
        self.label
      ))),
      (Some(_), Some(_)) => Err(ComponentError::Config(format!(
        "resource '{}' declares more than one component type: {}",
        self.label,
        self.plugin.keys().cloned().collect::<Vec<_>>().join(", ")
      ))),
    }
  }
}

/// The resources declared by one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
  /// Input resources.
  #[serde(default)]
  pub input_resources: Vec<ComponentConfig>,
  /// Processor resources.
  #[serde(default)]
  pub processor_resources: Vec<ComponentConfig>,
  /// Output resources.
  #[serde(default)]
  pub output_resources: Vec<ComponentConfig>,
  /// Cache resources.
  #[serde(default)]
  pub cache_resources: Vec<ComponentConfig>,
  /// Rate limit resources.
  #[serde(default)]
  pub rate_limit_resources: Vec<ComponentConfig>,
}

impl ResourceConfig {
  /// Declarations for one category.
  pub fn category(&self, category: ResourceCategory) -> &[ComponentConfig] {
    match category {
      ResourceCategory::Input => &self.input_resources,
      ResourceCategory::Processor => &self.processor_resources,
      ResourceCategory::Output => &self.output_resources,
      ResourceCategory::Cache => &self.cache_resources,
      ResourceCategory::RateLimit => &self.rate_limit_resources,
    }
  }

  /// Mutable declarations for one category.
  pub fn category_mut(&mut self, category: ResourceCategory) -> &mut Vec<ComponentConfig> {
    match category {
      ResourceCategory::Input => &mut self.input_resources,
      ResourceCategory::Processor => &mut self.processor_resources,
      ResourceCategory::Output => &mut self.output_resources,
      ResourceCategory::Cache => &mut self.cache_resources,
      ResourceCategory::RateLimit => &mut self.rate_limit_resources,
    }
  }

  /// Adds a declaration, builder style.
  #[must_use]
  pub fn with_resource(mut self, category: ResourceCategory, conf: ComponentConfig) -> Self {
    self.category_mut(category).push(conf);
    self
  }

  /// True when no category declares anything.
  pub fn is_empty(&self) -> bool {
    ResourceCategory::ALL
      .iter()
      .all(|c| self.category(*c).is_empty())
  }
}

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Reject resource files that produce any lint findings.
  pub strict: bool,
  /// Budget shared by every registry store of one file update.
  #[serde(
    deserialize_with = "deserialize_duration",
    serialize_with = "serialize_duration"
  )]
  pub update_timeout: Duration,
  /// Glob patterns of resource files loaded at startup.
  pub resource_paths: Vec<String>,
  /// Reconnect and retry backoff used by input and output workers.
  pub reconnect_backoff: BackoffConfig,
  /// Default bound on unacknowledged batches per input and concurrent writes
  /// per output, used when a component does not set its own.
  pub max_in_flight: usize,
  /// How long a closing worker waits for outstanding acknowledgements.
  #[serde(
    deserialize_with = "deserialize_duration",
    serialize_with = "serialize_duration"
  )]
  pub close_timeout: Duration,
  /// Poll interval of the resource file watcher.
  #[serde(
    deserialize_with = "deserialize_duration",
    serialize_with = "serialize_duration"
  )]
  pub watch_interval: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      strict: true,
      update_timeout: Duration::from_secs(180),
      resource_paths: Vec::new(),
      reconnect_backoff: BackoffConfig::default(),
      max_in_flight: 64,
      close_timeout: Duration::from_secs(20),
      watch_interval: Duration::from_secs(1),
    }
  }
}

impl EngineConfig {
  /// Parses engine settings from YAML after environment substitution.
  pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
    let substituted = env::substitute_env_vars(yaml);
    if substituted.text.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(&substituted.text).map_err(|e| ConfigError::Parse {
      path: PathBuf::new(),
      message: e.to_string(),
    })
  }

  /// Sets strict mode.
  pub fn with_strict(mut self, strict: bool) -> Self {
    self.strict = strict;
    self
  }

  /// Sets the shared update timeout.
  pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
    self.update_timeout = timeout;
    self
  }

  /// Adds a resource path glob.
  pub fn with_resource_path(mut self, pattern: impl Into<String>) -> Self {
    self.resource_paths.push(pattern.into());
    self
  }

  /// Sets the worker backoff.
  pub fn with_reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
    self.reconnect_backoff = backoff;
    self
  }

  /// Sets the default in-flight bound.
  pub fn with_max_in_flight(mut self, max: usize) -> Self {
    self.max_in_flight = max;
    self
  }

  /// Sets the worker close timeout.
  pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
    self.close_timeout = timeout;
    self
  }

  /// Sets the watcher poll interval.
  pub fn with_watch_interval(mut self, interval: Duration) -> Self {
    self.watch_interval = interval;
    self
  }
}
