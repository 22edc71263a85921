//! What one resource file currently declares.

use crate::component::ResourceCategory;
use crate::config::{ComponentConfig, ConfigError, ResourceConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The resources of one file, by category and label, as last applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
  path: PathBuf,
  rate_limits: BTreeMap<String, ComponentConfig>,
  caches: BTreeMap<String, ComponentConfig>,
  processors: BTreeMap<String, ComponentConfig>,
  inputs: BTreeMap<String, ComponentConfig>,
  outputs: BTreeMap<String, ComponentConfig>,
  updated_at: DateTime<Utc>,
}

impl ResourceSnapshot {
  /// An empty snapshot of `path`.
  pub fn empty(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      rate_limits: BTreeMap::new(),
      caches: BTreeMap::new(),
      processors: BTreeMap::new(),
      inputs: BTreeMap::new(),
      outputs: BTreeMap::new(),
      updated_at: Utc::now(),
    }
  }

  /// Indexes `config` by label.
  ///
  /// # Errors
  ///
  /// [`ConfigError::MissingLabel`] for an unlabelled entry and
  /// [`ConfigError::DuplicateLabel`] when a category repeats a label.
  pub fn from_config(path: impl Into<PathBuf>, config: ResourceConfig) -> Result<Self, ConfigError> {
    let mut snapshot = Self::empty(path);
    for category in ResourceCategory::ALL {
      let declared = config.category(category);
      let target = snapshot.category_mut(category);
      for conf in declared {
        if conf.label.is_empty() {
          return Err(ConfigError::MissingLabel(category));
        }
        if target.insert(conf.label.clone(), conf.clone()).is_some() {
          return Err(ConfigError::DuplicateLabel {
            category,
            label: conf.label.clone(),
          });
        }
      }
    }
    Ok(snapshot)
  }

  /// File this snapshot describes.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// When this snapshot was taken.
  pub fn updated_at(&self) -> DateTime<Utc> {
    self.updated_at
  }

  /// Resources of one category, by label.
  pub fn category(&self, category: ResourceCategory) -> &BTreeMap<String, ComponentConfig> {
    match category {
      ResourceCategory::RateLimit => &self.rate_limits,
      ResourceCategory::Cache => &self.caches,
      ResourceCategory::Processor => &self.processors,
      ResourceCategory::Input => &self.inputs,
      ResourceCategory::Output => &self.outputs,
    }
  }

  fn category_mut(&mut self, category: ResourceCategory) -> &mut BTreeMap<String, ComponentConfig> {
    match category {
      ResourceCategory::RateLimit => &mut self.rate_limits,
      ResourceCategory::Cache => &mut self.caches,
      ResourceCategory::Processor => &mut self.processors,
      ResourceCategory::Input => &mut self.inputs,
      ResourceCategory::Output => &mut self.outputs,
    }
  }

  /// Every (category, label) pair, in apply order.
  pub fn labels(&self) -> impl Iterator<Item = (ResourceCategory, &str)> + '_ {
    ResourceCategory::APPLY_ORDER
      .into_iter()
      .flat_map(move |c| self.category(c).keys().map(move |l| (c, l.as_str())))
  }

  /// True if `conf` is exactly what this snapshot holds for its label.
  pub fn is_unchanged(&self, category: ResourceCategory, conf: &ComponentConfig) -> bool {
    self.category(category).get(&conf.label) == Some(conf)
  }

  /// Replaces the entry for `conf.label` within `category`.
  pub(crate) fn record(&mut self, category: ResourceCategory, conf: ComponentConfig) {
    self.category_mut(category).insert(conf.label.clone(), conf);
    self.updated_at = Utc::now();
  }

  /// Labels present here but absent from `newer`.
  pub fn removed_labels(&self, newer: &ResourceSnapshot) -> Vec<(ResourceCategory, String)> {
    self
      .labels()
      .filter(|(c, l)| !newer.category(*c).contains_key(*l))
      .map(|(c, l)| (c, l.to_string()))
      .collect()
  }

  /// Total number of resources.
  pub fn len(&self) -> usize {
    ResourceCategory::ALL
      .iter()
      .map(|c| self.category(*c).len())
      .sum()
  }

  /// True when the file declares nothing.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn conf(label: &str, yaml: &str) -> ComponentConfig {
    ComponentConfig::from_yaml(label, "memory", yaml).unwrap()
  }

  #[test]
  fn test_from_config_indexes_labels() {
    let config = ResourceConfig::default()
      .with_resource(ResourceCategory::Cache, conf("b", "{}"))
      .with_resource(ResourceCategory::Cache, conf("a", "{}"))
      .with_resource(ResourceCategory::Output, conf("out", "sink: s"));
    let snap = ResourceSnapshot::from_config("r.yaml", config).unwrap();
    assert_eq!(snap.len(), 3);
    let labels: Vec<_> = snap.labels().collect();
    assert_eq!(
      labels,
      vec![
        (ResourceCategory::Cache, "a"),
        (ResourceCategory::Cache, "b"),
        (ResourceCategory::Output, "out"),
      ]
    );
  }

  #[test]
  fn test_duplicate_and_missing_labels() {
    let dup = ResourceConfig::default()
      .with_resource(ResourceCategory::Cache, conf("a", "{}"))
      .with_resource(ResourceCategory::Cache, conf("a", "{}"));
    assert!(matches!(
      ResourceSnapshot::from_config("r.yaml", dup),
      Err(ConfigError::DuplicateLabel { .. })
    ));

    let same_label_other_category = ResourceConfig::default()
      .with_resource(ResourceCategory::Cache, conf("a", "{}"))
      .with_resource(ResourceCategory::Output, conf("a", "sink: s"));
    assert!(ResourceSnapshot::from_config("r.yaml", same_label_other_category).is_ok());

    let missing = ResourceConfig::default().with_resource(ResourceCategory::Input, conf("", "{}"));
    assert!(matches!(
      ResourceSnapshot::from_config("r.yaml", missing),
      Err(ConfigError::MissingLabel(ResourceCategory::Input))
    ));
  }

  #[test]
  fn test_diffing() {
    let old = ResourceSnapshot::from_config(
      "r.yaml",
      ResourceConfig::default()
        .with_resource(ResourceCategory::Cache, conf("keep", "{}"))
        .with_resource(ResourceCategory::Cache, conf("gone", "{}")),
    )
    .unwrap();
    let new = ResourceSnapshot::from_config(
      "r.yaml",
      ResourceConfig::default().with_resource(ResourceCategory::Cache, conf("keep", "default_ttl: 1m")),
    )
    .unwrap();

    assert_eq!(
      old.removed_labels(&new),
      vec![(ResourceCategory::Cache, "gone".to_string())]
    );
    assert!(!old.is_unchanged(ResourceCategory::Cache, &conf("keep", "default_ttl: 1m")));
    assert!(old.is_unchanged(ResourceCategory::Cache, &conf("keep", "{}")));
  }

  #[test]
  fn test_record_overwrites_label() {
    let mut snap = ResourceSnapshot::empty("r.yaml");
    snap.record(ResourceCategory::Cache, conf("c", "{}"));
    snap.record(ResourceCategory::Cache, conf("c", "default_ttl: 1m"));
    assert_eq!(snap.len(), 1);
    assert!(snap.is_unchanged(ResourceCategory::Cache, &conf("c", "default_ttl: 1m")));
    assert!(!snap.is_unchanged(ResourceCategory::Cache, &conf("c", "{}")));
  }
}
