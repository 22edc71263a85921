//! Inputs and the worker that drives them.

use super::WorkerConfig;
use super::ack::{AckFn, Transaction};
use super::backoff::Backoff;
use crate::context::Context;
use crate::error::ComponentError;
use crate::message::Batch;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, error, info, warn};

/// A source of batches.
///
/// Implementations keep connector state behind this interface. `read_batch`
/// blocks until a batch is available, `ctx` finishes (`Timeout`), or the
/// input is closed (`TypeClosed`). On close, every delivery that was handed
/// out but not yet acknowledged must be made redeliverable at the origin
/// before `read_batch` or `close` returns.
#[async_trait]
pub trait AsyncInput: Send + Sync {
  /// Establishes the connection. A no-op while connected.
  async fn connect(&self, ctx: &Context) -> Result<(), ComponentError>;

  /// Reads the next batch and its acknowledgement.
  async fn read_batch(&self, ctx: &Context) -> Result<(Batch, AckFn), ComponentError>;

  /// Closes the input. Idempotent.
  async fn close(&self, ctx: &Context) -> Result<(), ComponentError>;

  /// Upper bound on unacknowledged batches, if the input sets its own.
  fn max_in_flight(&self) -> Option<usize> {
    None
  }
}

/// Runs an [`AsyncInput`] on its own task and publishes [`Transaction`]s.
///
/// At most `max_in_flight` batches are outstanding at once; the bound is
/// released when each batch's acknowledgement runs.
pub struct InputWorker {
  label: String,
  rx: Arc<Mutex<mpsc::Receiver<Transaction>>>,
  shutdown: ShutdownSignal,
  finished: ShutdownSignal,
  max_in_flight: usize,
}

impl std::fmt::Debug for InputWorker {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InputWorker")
      .field("label", &self.label)
      .field("max_in_flight", &self.max_in_flight)
      .field("closed", &self.finished.is_triggered())
      .finish()
  }
}

impl InputWorker {
  /// Starts driving `input`. Must be called within a tokio runtime.
  pub fn spawn(label: impl Into<String>, input: Arc<dyn AsyncInput>, config: WorkerConfig) -> Self {
    let label = label.into();
    let max_in_flight = input
      .max_in_flight()
      .unwrap_or(config.max_in_flight)
      .max(1);
    let (tx, rx) = mpsc::channel(max_in_flight);
    let rx = Arc::new(Mutex::new(rx));
    let shutdown = ShutdownSignal::new();
    let finished = ShutdownSignal::new();

    let task = InputLoop {
      label: label.clone(),
      input,
      tx,
      rx: Arc::clone(&rx),
      in_flight: Arc::new(Semaphore::new(max_in_flight)),
      max_in_flight,
      config,
      shutdown: shutdown.clone(),
      finished: finished.clone(),
    };
    tokio::spawn(task.run());

    Self {
      label,
      rx,
      shutdown,
      finished,
      max_in_flight,
    }
  }

  /// Registry label of the input.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// Effective in-flight bound.
  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight
  }

  /// Waits for the next transaction.
  ///
  /// # Returns
  ///
  /// `Timeout` if `ctx` finishes first and `TypeClosed` once the worker is
  /// shutting down and has nothing buffered.
  pub async fn next_transaction(&self, ctx: &Context) -> Result<Transaction, ComponentError> {
    let mut rx = tokio::select! {
      rx = self.rx.lock() => rx,
      _ = ctx.done() => return Err(ComponentError::Timeout),
      _ = self.shutdown.triggered() => return Err(ComponentError::TypeClosed),
    };
    tokio::select! {
      biased;
      txn = rx.recv() => txn.ok_or(ComponentError::TypeClosed),
      _ = self.shutdown.triggered() => Err(ComponentError::TypeClosed),
      _ = ctx.done() => Err(ComponentError::Timeout),
    }
  }

  /// Asks the worker to stop reading and close its input.
  pub fn trigger_close(&self) {
    if self.shutdown.trigger() {
      debug!(label = %self.label, "Closing input");
    }
  }

  /// Waits until the input has been closed.
  pub async fn wait_for_close(&self, ctx: &Context) -> Result<(), ComponentError> {
    ctx
      .run(async {
        self.finished.triggered().await;
        Ok(())
      })
      .await
  }

  /// True once the input has been closed.
  pub fn is_closed(&self) -> bool {
    self.finished.is_triggered()
  }
}

impl Drop for InputWorker {
  fn drop(&mut self) {
    self.shutdown.trigger();
  }
}

struct InputLoop {
  label: String,
  input: Arc<dyn AsyncInput>,
  tx: mpsc::Sender<Transaction>,
  rx: Arc<Mutex<mpsc::Receiver<Transaction>>>,
  in_flight: Arc<Semaphore>,
  max_in_flight: usize,
  config: WorkerConfig,
  shutdown: ShutdownSignal,
  finished: ShutdownSignal,
}

impl InputLoop {
  async fn run(self) {
    let read_ctx = self.shutdown.context();
    let mut backoff = Backoff::new(self.config.backoff);

    'connect: loop {
      match self.input.connect(&read_ctx).await {
        Ok(()) => {
          backoff.reset();
          info!(label = %self.label, "Input connected");
        }
        Err(ComponentError::TypeClosed) => break 'connect,
        Err(e) => {
          if self.shutdown.is_triggered() {
            break 'connect;
          }
          error!(label = %self.label, error = %e, "Failed to connect input, retrying");
          if !sleep_or_shutdown(backoff.next_delay(), &self.shutdown).await {
            break 'connect;
          }
          continue 'connect;
        }
      }

      loop {
        let permit = tokio::select! {
          permit = Arc::clone(&self.in_flight).acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => break 'connect,
          },
          _ = self.shutdown.triggered() => break 'connect,
        };

        match self.input.read_batch(&read_ctx).await {
          Ok((batch, ack)) => {
            let ack = ack.on_complete(move || drop(permit));
            if let Err(mpsc::error::SendError(txn)) = self.tx.send(Transaction::new(batch, ack)).await {
              let _ = txn.ack.ack(Err(ComponentError::TypeClosed)).await;
              break 'connect;
            }
          }
          Err(ComponentError::Timeout) => {
            if self.shutdown.is_triggered() {
              break 'connect;
            }
          }
          Err(ComponentError::NotConnected) => {
            warn!(label = %self.label, "Input lost connection, reconnecting");
            continue 'connect;
          }
          Err(ComponentError::TypeClosed) => break 'connect,
          Err(e) => {
            error!(label = %self.label, error = %e, "Failed to read input");
            if !sleep_or_shutdown(backoff.next_delay(), &self.shutdown).await {
              break 'connect;
            }
          }
        }
      }
    }

    self.teardown().await;
  }

  async fn teardown(self) {
    let InputLoop {
      label,
      input,
      tx,
      rx,
      in_flight,
      max_in_flight,
      config,
      finished,
      ..
    } = self;

    drop(tx);
    {
      let mut rx = rx.lock().await;
      rx.close();
      while let Ok(txn) = rx.try_recv() {
        let _ = txn.ack.ack(Err(ComponentError::TypeClosed)).await;
      }
    }

    let permits = u32::try_from(max_in_flight).unwrap_or(u32::MAX);
    let outstanding = tokio::time::timeout(config.close_timeout, in_flight.acquire_many(permits)).await;
    if outstanding.is_err() {
      warn!(
        label = %label,
        "Timed out waiting for acknowledgements, unacknowledged deliveries will be redelivered"
      );
    }

    let close_ctx = Context::background().with_timeout(config.close_timeout);
    if let Err(e) = input.close(&close_ctx).await {
      error!(label = %label, error = %e, "Failed to close input");
    }
    finished.trigger();
    info!(label = %label, "Input closed");
  }
}

/// Sleeps for `delay` unless `shutdown` fires first.
///
/// # Returns
///
/// `false` if the signal fired.
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown: &ShutdownSignal) -> bool {
  tokio::select! {
    _ = tokio::time::sleep(delay) => true,
    _ = shutdown.triggered() => false,
  }
}
