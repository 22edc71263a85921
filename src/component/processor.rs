//! Processor resources.

use crate::context::Context;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;

/// Transforms batches in place.
///
/// A message that fails a stage is flagged with
/// [`crate::message::Message::set_error`] and passed on; an `Err` return is
/// reserved for the processor itself being unusable (for example
/// `TypeClosed`). Returning an empty batch drops the input batch, which is
/// then acknowledged as successfully handled.
#[async_trait]
pub trait Processor: Send + Sync {
  /// Processes one batch.
  async fn process_batch(&self, ctx: &Context, batch: Batch) -> Result<Batch, ComponentError>;

  /// Releases resources. Idempotent.
  async fn close(&self, ctx: &Context) -> Result<(), ComponentError>;
}
