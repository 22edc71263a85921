//! Outputs and the worker that drives them.

use super::WorkerConfig;
use super::ack::{AckFn, Transaction};
use super::backoff::{Backoff, BackoffConfig};
use super::input::sleep_or_shutdown;
use crate::context::Context;
use crate::error::ComponentError;
use crate::message::Batch;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// A sink for batches.
///
/// `write_batch` is all-or-nothing from the caller's point of view: any
/// error means the batch must be treated as not written.
#[async_trait]
pub trait AsyncOutput: Send + Sync {
  /// Establishes the connection. A no-op while connected.
  async fn connect(&self, ctx: &Context) -> Result<(), ComponentError>;

  /// Writes one batch.
  async fn write_batch(&self, ctx: &Context, batch: &Batch) -> Result<(), ComponentError>;

  /// Closes the output. Idempotent.
  async fn close(&self, ctx: &Context) -> Result<(), ComponentError>;

  /// Upper bound on concurrent writes, if the output sets its own.
  fn max_in_flight(&self) -> Option<usize> {
    None
  }
}

/// Runs an [`AsyncOutput`] on its own task.
///
/// Transactions are written with at most `max_in_flight` concurrent
/// `write_batch` calls. Failed writes are retried with backoff until they
/// succeed or the worker shuts down; the transaction's acknowledgement
/// receives the final outcome.
pub struct OutputWorker {
  label: String,
  tx: mpsc::Sender<Transaction>,
  shutdown: ShutdownSignal,
  finished: ShutdownSignal,
  max_in_flight: usize,
}

impl std::fmt::Debug for OutputWorker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OutputWorker")
      .field("label", &self.label)
      .field("max_in_flight", &self.max_in_flight)
      .field("closed", &self.finished.is_triggered())
      .finish()
  }
}

impl OutputWorker {
  /// Starts driving `output`. Must be called within a tokio runtime.
  pub fn spawn(label: impl Into<String>, output: Arc<dyn AsyncOutput>, config: WorkerConfig) -> Self {
    let label = label.into();
    let max_in_flight = output
      .max_in_flight()
      .unwrap_or(config.max_in_flight)
      .max(1);
    let (tx, rx) = mpsc::channel(max_in_flight);
    let shutdown = ShutdownSignal::new();
    let finished = ShutdownSignal::new();

    let task = OutputLoop {
      label: label.clone(),
      output,
      rx,
      max_in_flight,
      config,
      shutdown: shutdown.clone(),
      finished: finished.clone(),
    };
    tokio::spawn(task.run());

    Self {
      label,
      tx,
      shutdown,
      finished,
      max_in_flight,
    }
  }

  /// Registry label of the output.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// Effective concurrent write bound.
  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight
  }

  /// Hands a transaction to the worker. Its acknowledgement is resolved with
  /// the final write outcome.
  ///
  /// If the worker cannot accept it, the acknowledgement is resolved with the
  /// same error that is returned.
  pub async fn send(&self, ctx: &Context, txn: Transaction) -> Result<(), ComponentError> {
    let reserved = tokio::select! {
      biased;
      _ = self.shutdown.triggered() => Err(ComponentError::TypeClosed),
      _ = ctx.done() => Err(ComponentError::Timeout),
      permit = self.tx.reserve() => permit.map_err(|_| ComponentError::TypeClosed),
    };
    match reserved {
      Ok(permit) => {
        permit.send(txn);
        Ok(())
      }
      Err(e) => {
        let _ = txn.ack.ack(Err(e.clone())).await;
        Err(e)
      }
    }
  }

  /// Writes `batch` and waits for the outcome.
  pub async fn write(&self, ctx: &Context, batch: Batch) -> Result<(), ComponentError> {
    let (res_tx, res_rx) = oneshot::channel();
    let ack = AckFn::new(move |res| async move {
      let _ = res_tx.send(res);
      Ok(())
    });
    self.send(ctx, Transaction::new(batch, ack)).await?;
    ctx
      .run(async move { res_rx.await.unwrap_or(Err(ComponentError::NoAck)) })
      .await
  }

  /// Asks the worker to stop accepting writes and close its output.
  pub fn trigger_close(&self) {
    if self.shutdown.trigger() {
      debug!(label = %self.label, "Closing output");
    }
  }

  /// Waits until the output has been closed.
  pub async fn wait_for_close(&self, ctx: &Context) -> Result<(), ComponentError> {
    ctx
      .run(async {
        self.finished.triggered().await;
        Ok(())
      })
      .await
  }

  /// True once the output has been closed.
  pub fn is_closed(&self) -> bool {
    self.finished.is_triggered()
  }
}

impl Drop for OutputWorker {
  fn drop(&mut self) {
    self.shutdown.trigger();
  }
}

struct OutputLoop {
  label: String,
  output: Arc<dyn AsyncOutput>,
  rx: mpsc::Receiver<Transaction>,
  max_in_flight: usize,
  config: WorkerConfig,
  shutdown: ShutdownSignal,
  finished: ShutdownSignal,
}

impl OutputLoop {
  async fn connect(&self, ctx: &Context) -> bool {
    let mut backoff = Backoff::new(self.config.backoff);
    loop {
      match self.output.connect(ctx).await {
        Ok(()) => {
          info!(label = %self.label, "Output connected");
          return true;
        }
        Err(ComponentError::TypeClosed) => return false,
        Err(e) => {
          if self.shutdown.is_triggered() {
            return false;
          }
          error!(label = %self.label, error = %e, "Failed to connect output, retrying");
          if !sleep_or_shutdown(backoff.next_delay(), &self.shutdown).await {
            return false;
          }
        }
      }
    }
  }

  async fn run(mut self) {
    let write_ctx = Context::background();
    let in_flight = Arc::new(Semaphore::new(self.max_in_flight));

    if self.connect(&self.shutdown.context()).await {
      loop {
        let txn = tokio::select! {
          biased;
          _ = self.shutdown.triggered() => break,
          txn = self.rx.recv() => match txn {
            Some(txn) => txn,
            None => break,
          },
        };
        let permit = tokio::select! {
          permit = Arc::clone(&in_flight).acquire_owned() => permit.ok(),
          _ = self.shutdown.triggered() => None,
        };
        let Some(permit) = permit else {
          let _ = txn.ack.ack(Err(ComponentError::TypeClosed)).await;
          break;
        };
        let write = WriteTask {
          label: self.label.clone(),
          output: Arc::clone(&self.output),
          ctx: write_ctx.clone(),
          shutdown: self.shutdown.clone(),
          backoff: self.config.backoff,
        };
        tokio::spawn(write.run(txn, permit));
      }
    }

    self.rx.close();
    while let Ok(txn) = self.rx.try_recv() {
      let _ = txn.ack.ack(Err(ComponentError::TypeClosed)).await;
    }

    let permits = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
    if tokio::time::timeout(self.config.close_timeout, in_flight.acquire_many(permits))
      .await
      .is_err()
    {
      warn!(label = %self.label, "Timed out waiting for pending writes, cancelling them");
      write_ctx.cancel();
      let _ = tokio::time::timeout(self.config.close_timeout, in_flight.acquire_many(permits)).await;
    }

    let close_ctx = Context::background().with_timeout(self.config.close_timeout);
    if let Err(e) = self.output.close(&close_ctx).await {
      error!(label = %self.label, error = %e, "Failed to close output");
    }
    self.finished.trigger();
    info!(label = %self.label, "Output closed");
  }
}

struct WriteTask {
  label: String,
  output: Arc<dyn AsyncOutput>,
  ctx: Context,
  shutdown: ShutdownSignal,
  backoff: BackoffConfig,
}

impl WriteTask {
  async fn run(self, txn: Transaction, permit: OwnedSemaphorePermit) {
    let (batch, ack) = txn.into_parts();
    let mut backoff = Backoff::new(self.backoff);

    let result = loop {
      match self.output.write_batch(&self.ctx, &batch).await {
        Ok(()) => break Ok(()),
        Err(ComponentError::TypeClosed) => break Err(ComponentError::TypeClosed),
        Err(e) => {
          if self.shutdown.is_triggered() || self.ctx.is_done() {
            break Err(e);
          }
          warn!(label = %self.label, error = %e, "Failed to send message to output, retrying");
          if matches!(e, ComponentError::NotConnected) {
            if let Err(ce) = self.output.connect(&self.ctx).await {
              error!(label = %self.label, error = %ce, "Failed to reconnect output");
            }
          }
          if !sleep_or_shutdown(backoff.next_delay(), &self.shutdown).await {
            break Err(e);
          }
        }
      }
    };

    if let Err(e) = ack.ack(result).await {
      warn!(label = %self.label, error = %e, "Failed to acknowledge written batch");
    }
    drop(permit);
  }
}
