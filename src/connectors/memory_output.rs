//! `memory` output: appends every written batch to a named [`MemorySink`]
//! on the manager's broker.

use super::memory_broker::{MemoryBroker, MemorySink};
use crate::component::{AsyncOutput, LazyConnection};
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Options of the `memory` output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryOutputConfig {
  /// Sink name on the broker.
  pub sink: String,
  /// Bound on concurrent writes.
  #[serde(default)]
  pub max_in_flight: Option<usize>,
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("memory")
    .with_summary("Appends messages to an in-process sink.")
    .with_field(FieldSpec::string("sink", "Name of the sink to write to."))
    .with_field(FieldSpec::int("max_in_flight", "Maximum concurrent writes.").optional())
}

/// Builds the output from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn AsyncOutput>, ComponentError> {
  let config: MemoryOutputConfig = ctx.parse_options()?;
  Ok(Arc::new(MemoryOutput {
    config,
    broker: ctx.manager.broker().clone(),
    conn: LazyConnection::new(),
  }))
}

/// Output into an in-process sink.
#[derive(Debug)]
pub struct MemoryOutput {
  config: MemoryOutputConfig,
  broker: MemoryBroker,
  conn: LazyConnection<Arc<MemorySink>>,
}

#[async_trait]
impl AsyncOutput for MemoryOutput {
  async fn connect(&self, ctx: &Context) -> Result<(), ComponentError> {
    let broker = &self.broker;
    let sink = &self.config.sink;
    self
      .conn
      .connect(ctx, || async { Ok(broker.sink(sink)) })
      .await
      .map(|_| ())
  }

  async fn write_batch(&self, _ctx: &Context, batch: &Batch) -> Result<(), ComponentError> {
    let sink = self.conn.get().await?;
    sink.extend(batch.iter().cloned());
    Ok(())
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.conn.close_with(|_| async {}).await;
    Ok(())
  }

  fn max_in_flight(&self) -> Option<usize> {
    self.config.max_in_flight
  }
}
