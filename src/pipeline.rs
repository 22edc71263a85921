//! # Streams
//!
//! A stream reads from an input resource, runs each batch through a list of
//! processor resources and writes the result to an output resource. Every
//! stage is addressed by label through the [`Manager`], so a resource that
//! is replaced while the stream runs is picked up on the next batch.
//!
//! Each batch is acknowledged with the outcome of its write. A processor
//! error or a failed write nacks the batch, which makes it redeliverable at
//! the origin. A processor that returns an empty batch acks it as
//! successfully handled.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weaveflow::environment::Environment;
//! use weaveflow::manager::Manager;
//! use weaveflow::pipeline::{StreamConfig, StreamHandle};
//!
//! # async fn example() -> Result<(), weaveflow::error::ComponentError> {
//! let manager = Manager::new(Arc::new(Environment::builtin()));
//! let stream = StreamHandle::spawn(
//!   manager,
//!   StreamConfig::new("orders_in", "orders_out").with_processor("enrich"),
//! );
//! // ...
//! stream.stop().await
//! # }
//! ```

use crate::component::Transaction;
use crate::context::Context;
use crate::error::ComponentError;
use crate::manager::Manager;
use crate::message::Batch;
use crate::shutdown::ShutdownSignal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Labels of the resources a stream connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
  /// Input resource label.
  pub input: String,
  /// Processor resource labels, applied in order.
  #[serde(default)]
  pub processors: Vec<String>,
  /// Output resource label.
  pub output: String,
}

impl StreamConfig {
  /// A stream from `input` straight to `output`.
  pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
    Self {
      input: input.into(),
      processors: Vec::new(),
      output: output.into(),
    }
  }

  /// Appends a processor stage.
  pub fn with_processor(mut self, label: impl Into<String>) -> Self {
    self.processors.push(label.into());
    self
  }
}

/// Runs a stream until `shutdown` fires or its input closes.
///
/// Batches already read are processed, written and acknowledged before this
/// returns.
///
/// # Errors
///
/// Returns the lookup error if the input label is not registered.
pub async fn run_stream(
  manager: Manager,
  config: StreamConfig,
  shutdown: ShutdownSignal,
) -> Result<(), ComponentError> {
  let config = Arc::new(config);
  let read_ctx = shutdown.context();
  let mut deliveries = JoinSet::new();
  info!(input = %config.input, output = %config.output, "Stream started");

  let result = loop {
    while let Some(joined) = deliveries.try_join_next() {
      if let Err(e) = joined {
        error!(error = %e, "Delivery task failed");
      }
    }

    match manager.read_input(&read_ctx, &config.input).await {
      Ok(txn) => {
        deliveries.spawn(deliver(manager.clone(), Arc::clone(&config), txn));
      }
      Err(ComponentError::Timeout) if !shutdown.is_triggered() => continue,
      Err(ComponentError::Timeout) | Err(ComponentError::TypeClosed) => break Ok(()),
      Err(e) => break Err(e),
    }
  };

  while let Some(joined) = deliveries.join_next().await {
    if let Err(e) = joined {
      error!(error = %e, "Delivery task failed");
    }
  }
  info!(input = %config.input, output = %config.output, "Stream stopped");
  result
}

async fn deliver(manager: Manager, config: Arc<StreamConfig>, txn: Transaction) {
  let (batch, ack) = txn.into_parts();
  let ctx = Context::background();
  let outcome = process_and_write(&manager, &config, &ctx, batch).await;
  if let Err(e) = &outcome {
    warn!(
      input = %config.input,
      output = %config.output,
      error = %e,
      "Failed to deliver batch, it will be redelivered"
    );
  }
  if let Err(e) = ack.ack(outcome).await {
    warn!(input = %config.input, error = %e, "Failed to acknowledge batch");
  }
}

async fn process_and_write(
  manager: &Manager,
  config: &StreamConfig,
  ctx: &Context,
  mut batch: Batch,
) -> Result<(), ComponentError> {
  for label in &config.processors {
    batch = manager.process(ctx, label, batch).await?;
    if batch.is_empty() {
      debug!(processor = %label, "Batch dropped by processor");
      return Ok(());
    }
  }
  manager.write_output(ctx, &config.output, batch).await
}

/// A stream running on its own task.
#[derive(Debug)]
pub struct StreamHandle {
  shutdown: ShutdownSignal,
  handle: JoinHandle<Result<(), ComponentError>>,
}

impl StreamHandle {
  /// Starts [`run_stream`] on a new task. Must be called within a tokio
  /// runtime.
  pub fn spawn(manager: Manager, config: StreamConfig) -> Self {
    let shutdown = ShutdownSignal::new();
    let handle = tokio::spawn(run_stream(manager, config, shutdown.clone()));
    Self { shutdown, handle }
  }

  /// True once the stream task has returned.
  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }

  /// Stops reading, waits for in-flight batches and returns the stream's
  /// result.
  pub async fn stop(self) -> Result<(), ComponentError> {
    self.shutdown.trigger();
    match self.handle.await {
      Ok(res) => res,
      Err(e) => Err(ComponentError::Transport(format!("stream task failed: {e}"))),
    }
  }
}
