//! `metadata` processor: sets and removes metadata keys on every message.
//! Values are interpolated templates.

use super::interpolate::Template;
use crate::component::Processor;
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Options of the `metadata` processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
  /// Keys to set, mapped to value templates.
  #[serde(default)]
  pub set: BTreeMap<String, String>,
  /// Keys to remove. Applied before `set`.
  #[serde(default)]
  pub delete: Vec<String>,
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("metadata")
    .with_summary("Sets or removes metadata on each message.")
    .with_field(FieldSpec::object("set", "Metadata keys mapped to interpolated values.").optional())
    .with_field(FieldSpec::array("delete", "Metadata keys to remove.").optional())
}

/// Builds the processor from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn Processor>, ComponentError> {
  let config: MetadataConfig = ctx.parse_options()?;
  Ok(Arc::new(MetadataProcessor::new(config)?))
}

/// Metadata mutation processor.
#[derive(Debug)]
pub struct MetadataProcessor {
  set: Vec<(String, Template)>,
  delete: Vec<String>,
}

impl MetadataProcessor {
  /// Parses every value template.
  pub fn new(config: MetadataConfig) -> Result<Self, ComponentError> {
    let set = config
      .set
      .into_iter()
      .map(|(k, v)| Template::parse(&v).map(|t| (k, t)))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self {
      set,
      delete: config.delete,
    })
  }
}

#[async_trait]
impl Processor for MetadataProcessor {
  async fn process_batch(&self, _ctx: &Context, mut batch: Batch) -> Result<Batch, ComponentError> {
    for msg in batch.iter_mut() {
      for key in &self.delete {
        msg.remove_meta(key);
      }
      for (key, value) in &self.set {
        let rendered = value.render(msg);
        msg.set_meta(key.clone(), rendered);
      }
    }
    Ok(batch)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::Message;

  #[tokio::test]
  async fn test_sets_and_deletes() {
    let mut set = BTreeMap::new();
    set.insert("copy".to_string(), "${!meta:orig}-x".to_string());
    let proc = MetadataProcessor::new(MetadataConfig {
      set,
      delete: vec!["orig".to_string()],
    })
    .unwrap();

    let batch: Batch = vec![Message::new("p").with_meta("orig", "v")].into();
    let out = proc.process_batch(&Context::background(), batch).await.unwrap();
    let msg = out.get(0).unwrap();
    assert_eq!(msg.get_meta("orig"), None);
    // Deletion runs first, so the template sees no value.
    assert_eq!(msg.get_meta("copy"), Some("-x"));
  }
}
