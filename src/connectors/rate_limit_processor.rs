//! `rate_limit` processor: holds each message until the referenced rate
//! limit resource grants access.

use crate::component::{Processor, ResourceCategory};
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::manager::WeakManager;
use crate::message::Batch;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Options of the `rate_limit` processor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitProcessorConfig {
  /// Label of the rate limit resource.
  pub resource: String,
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("rate_limit")
    .with_summary("Throttles messages using a rate limit resource.")
    .with_field(FieldSpec::string("resource", "Label of the rate limit resource."))
}

/// Builds the processor, failing if the rate limit is not registered.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn Processor>, ComponentError> {
  let config: RateLimitProcessorConfig = ctx.parse_options()?;
  if !ctx.manager.probe(ResourceCategory::RateLimit, &config.resource) {
    return Err(ComponentError::RateLimitNotFound(config.resource));
  }
  Ok(Arc::new(RateLimitProcessor {
    config,
    manager: ctx.manager.downgrade(),
  }))
}

/// Throttling processor.
#[derive(Debug)]
pub struct RateLimitProcessor {
  config: RateLimitProcessorConfig,
  manager: WeakManager,
}

#[async_trait]
impl Processor for RateLimitProcessor {
  async fn process_batch(&self, ctx: &Context, batch: Batch) -> Result<Batch, ComponentError> {
    let manager = self.manager.upgrade().ok_or(ComponentError::TypeClosed)?;
    for _ in batch.iter() {
      loop {
        let wait = manager
          .access_rate_limit(ctx, &self.config.resource)
          .await?;
        if wait.is_zero() {
          break;
        }
        ctx
          .run(async {
            tokio::time::sleep(wait).await;
            Ok(())
          })
          .await?;
      }
    }
    Ok(batch)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    Ok(())
  }
}
