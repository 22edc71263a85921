//! `drop` output: discards everything written to it.

use crate::component::AsyncOutput;
use crate::context::Context;
use crate::docs::ComponentSpec;
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("drop").with_summary("Discards all messages.")
}

/// Builds the output. It takes no options.
pub async fn build(_ctx: BuildContext) -> Result<Arc<dyn AsyncOutput>, ComponentError> {
  Ok(Arc::new(DropOutput::default()))
}

/// Output that accepts and discards every batch.
#[derive(Debug, Default)]
pub struct DropOutput {
  closed: ShutdownSignal,
}

#[async_trait]
impl AsyncOutput for DropOutput {
  async fn connect(&self, _ctx: &Context) -> Result<(), ComponentError> {
    if self.closed.is_triggered() {
      return Err(ComponentError::TypeClosed);
    }
    Ok(())
  }

  async fn write_batch(&self, _ctx: &Context, _batch: &Batch) -> Result<(), ComponentError> {
    if self.closed.is_triggered() {
      return Err(ComponentError::TypeClosed);
    }
    Ok(())
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.closed.trigger();
    Ok(())
  }
}
