//! `noop` processor: passes batches through unchanged.

use crate::component::Processor;
use crate::context::Context;
use crate::docs::ComponentSpec;
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("noop").with_summary("Does nothing.")
}

/// Builds the processor. It takes no options.
pub async fn build(_ctx: BuildContext) -> Result<Arc<dyn Processor>, ComponentError> {
  Ok(Arc::new(NoopProcessor))
}

/// Identity processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessor;

#[async_trait]
impl Processor for NoopProcessor {
  async fn process_batch(&self, _ctx: &Context, batch: Batch) -> Result<Batch, ComponentError> {
    Ok(batch)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    Ok(())
  }
}
