//! `cache` processor: performs an operation against a cache resource for
//! each message.
//!
//! The referenced cache must already be registered when the processor is
//! built, which is why caches are applied before processors. The cache is
//! looked up by label on every call, so a replaced cache is picked up
//! without rebuilding the processor.

use super::interpolate::Template;
use crate::component::{Processor, ResourceCategory};
use crate::config::duration::deserialize_optional_duration;
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::manager::WeakManager;
use crate::message::Batch;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Operation applied to each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOperator {
  /// Store `value` under `key`.
  Set,
  /// Store `value` under `key` unless present.
  Add,
  /// Replace the payload with the value under `key`.
  Get,
  /// Remove `key`.
  Delete,
}

/// Options of the `cache` processor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheProcessorConfig {
  /// Label of the cache resource.
  pub resource: String,
  /// Operation to perform.
  pub operator: CacheOperator,
  /// Key template.
  pub key: String,
  /// Value template for `set` and `add`.
  #[serde(default = "default_value")]
  pub value: String,
  /// Expiry override for `set` and `add`.
  #[serde(default, deserialize_with = "deserialize_optional_duration")]
  pub ttl: Option<Duration>,
}

fn default_value() -> String {
  "${!content}".to_string()
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("cache")
    .with_summary("Performs operations against a cache resource for each message.")
    .with_field(FieldSpec::string("resource", "Label of the cache resource."))
    .with_field(FieldSpec::string("operator", "One of set, add, get, delete."))
    .with_field(FieldSpec::string("key", "Interpolated cache key."))
    .with_field(FieldSpec::string("value", "Interpolated value for set and add.").optional())
    .with_field(FieldSpec::duration("ttl", "Expiry for set and add.").optional())
}

/// Builds the processor, failing if the cache is not registered.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn Processor>, ComponentError> {
  let config: CacheProcessorConfig = ctx.parse_options()?;
  if !ctx.manager.probe(ResourceCategory::Cache, &config.resource) {
    return Err(ComponentError::CacheNotFound(config.resource));
  }
  Ok(Arc::new(CacheProcessor {
    key: Template::parse(&config.key)?,
    value: Template::parse(&config.value)?,
    config,
    manager: ctx.manager.downgrade(),
  }))
}

/// Per-message cache operations.
#[derive(Debug)]
pub struct CacheProcessor {
  config: CacheProcessorConfig,
  key: Template,
  value: Template,
  manager: WeakManager,
}

#[async_trait]
impl Processor for CacheProcessor {
  async fn process_batch(&self, ctx: &Context, mut batch: Batch) -> Result<Batch, ComponentError> {
    let manager = self.manager.upgrade().ok_or(ComponentError::TypeClosed)?;
    let resource = self.config.resource.as_str();
    let ttl = self.config.ttl;

    for msg in batch.iter_mut() {
      let key = self.key.render(msg);
      let result = match self.config.operator {
        CacheOperator::Get => manager
          .access_cache(ctx, resource, |cache| {
            let key = key.clone();
            async move { cache.get(ctx, &key).await }
          })
          .await
          .map(|value| msg.set_payload(value)),
        CacheOperator::Set | CacheOperator::Add => {
          let value = Bytes::from(self.value.render(msg));
          let add = self.config.operator == CacheOperator::Add;
          manager
            .access_cache(ctx, resource, |cache| {
              let key = key.clone();
              let value = value.clone();
              async move {
                if add {
                  cache.add(ctx, &key, value, ttl).await
                } else {
                  cache.set(ctx, &key, value, ttl).await
                }
              }
            })
            .await
        }
        CacheOperator::Delete => {
          manager
            .access_cache(ctx, resource, |cache| {
              let key = key.clone();
              async move { cache.delete(ctx, &key).await }
            })
            .await
        }
      };
      if let Err(e) = result {
        match e {
          ComponentError::Timeout => return Err(e),
          e => msg.set_error(e),
        }
      }
    }
    Ok(batch)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    Ok(())
  }
}
