//! `memory_queue` input: reads from a named [`QueueOrigin`] on the manager's
//! broker.
//!
//! Deliveries are finished on a successful acknowledgement and requeued on a
//! failed one. Closing the input requeues every delivery it handed out that
//! has not been acknowledged yet; acknowledgements arriving after that are
//! no-ops at the origin.

use super::memory_broker::{MemoryBroker, QueueOrigin};
use crate::component::{AckFn, AsyncInput, LazyConnection};
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Options of the `memory_queue` input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryQueueConfig {
  /// Queue name on the broker.
  pub queue: String,
  /// Maximum messages per batch.
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  /// Bound on unacknowledged batches.
  #[serde(default)]
  pub max_in_flight: Option<usize>,
}

fn default_batch_size() -> usize {
  1
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("memory_queue")
    .with_summary("Reads messages from an in-process queue with redelivery on failed acknowledgement.")
    .with_field(FieldSpec::string("queue", "Name of the queue to consume."))
    .with_field(FieldSpec::int("batch_size", "Maximum messages per batch.").optional())
    .with_field(FieldSpec::int("max_in_flight", "Maximum unacknowledged batches.").optional())
}

/// Builds the input from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn AsyncInput>, ComponentError> {
  let config: MemoryQueueConfig = ctx.parse_options()?;
  if config.batch_size == 0 {
    return Err(ComponentError::Config("batch_size must be at least 1".to_string()));
  }
  Ok(Arc::new(MemoryQueueInput::new(
    config,
    ctx.manager.broker().clone(),
  )))
}

/// Input over an in-process queue.
#[derive(Debug)]
pub struct MemoryQueueInput {
  config: MemoryQueueConfig,
  broker: MemoryBroker,
  conn: LazyConnection<Arc<QueueOrigin>>,
  unacked: Arc<Mutex<HashSet<u64>>>,
  shutdown: ShutdownSignal,
}

impl MemoryQueueInput {
  /// Creates an unconnected input.
  pub fn new(config: MemoryQueueConfig, broker: MemoryBroker) -> Self {
    Self {
      config,
      broker,
      conn: LazyConnection::new(),
      unacked: Arc::new(Mutex::new(HashSet::new())),
      shutdown: ShutdownSignal::new(),
    }
  }

  async fn requeue_unacked(&self) {
    let ids: Vec<u64> = {
      let mut unacked = self.unacked.lock().unwrap_or_else(PoisonError::into_inner);
      let mut ids: Vec<u64> = unacked.drain().collect();
      ids.sort_unstable();
      ids
    };
    if ids.is_empty() {
      return;
    }
    let n = self.broker.queue(&self.config.queue).requeue(&ids);
    debug!(queue = %self.config.queue, count = n, "Requeued unacknowledged deliveries");
  }

  async fn shut(&self) {
    self.requeue_unacked().await;
    self.conn.close_with(|_| async {}).await;
  }
}

#[async_trait]
impl AsyncInput for MemoryQueueInput {
  async fn connect(&self, ctx: &Context) -> Result<(), ComponentError> {
    let broker = &self.broker;
    let queue = &self.config.queue;
    self
      .conn
      .connect(ctx, || async { Ok(broker.queue(queue)) })
      .await
      .map(|_| ())
  }

  async fn read_batch(&self, ctx: &Context) -> Result<(Batch, AckFn), ComponentError> {
    if self.shutdown.is_triggered() {
      self.shut().await;
      return Err(ComponentError::TypeClosed);
    }
    let origin = self.conn.get().await?;

    let deliveries = tokio::select! {
      biased;
      _ = self.shutdown.triggered() => {
        self.shut().await;
        return Err(ComponentError::TypeClosed);
      }
      _ = ctx.done() => return Err(ComponentError::Timeout),
      deliveries = origin.receive(self.config.batch_size) => deliveries,
    };

    let ids: Vec<u64> = deliveries.iter().map(|d| d.id).collect();
    self
      .unacked
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .extend(ids.iter().copied());
    if self.shutdown.is_triggered() {
      self.shut().await;
      return Err(ComponentError::TypeClosed);
    }

    let batch: Batch = deliveries
      .into_iter()
      .map(|d| {
        let mut msg = d.message;
        msg.set_meta("queue", self.config.queue.clone());
        msg.set_meta("delivery_attempts", d.attempts.to_string());
        msg
      })
      .collect();

    let unacked = Arc::clone(&self.unacked);
    let queue = self.config.queue.clone();
    let ack = AckFn::new(move |res| async move {
      let owned: Vec<u64> = {
        let mut unacked = unacked.lock().unwrap_or_else(PoisonError::into_inner);
        ids.into_iter().filter(|id| unacked.remove(id)).collect()
      };
      if owned.is_empty() {
        return Ok(());
      }
      match res {
        Ok(()) => {
          for id in owned {
            origin.finish(id);
          }
        }
        Err(e) => {
          warn!(queue = %queue, error = %e, "Delivery failed, requeueing");
          origin.requeue(&owned);
        }
      }
      Ok(())
    });

    Ok((batch, ack))
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    if self.shutdown.trigger() {
      self.shut().await;
    }
    Ok(())
  }

  fn max_in_flight(&self) -> Option<usize> {
    self.config.max_in_flight
  }
}
