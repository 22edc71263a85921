//! Acknowledgement handles.
//!
//! Every batch read from an input travels with an [`AckFn`]. The consumer
//! resolves it exactly once: `Ok(())` finalizes the delivery at its origin,
//! an error asks the origin to make it redeliverable. Because
//! [`AckFn::ack`] takes the handle by value, a second invocation does not
//! compile. Dropping a handle without invoking it leaves the delivery stuck
//! at the origin and is logged as a warning.

use crate::error::ComponentError;
use crate::message::Batch;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

/// Outcome passed to an [`AckFn`].
pub type AckOutcome = Result<(), ComponentError>;

type AckHandler = Box<dyn FnOnce(AckOutcome) -> BoxFuture<'static, AckOutcome> + Send>;

/// One-shot acknowledgement callback bound to a batch.
pub struct AckFn {
  handler: Option<AckHandler>,
}

impl AckFn {
  /// Wraps an async callback.
  pub fn new<F, Fut>(f: F) -> Self
  where
    F: FnOnce(AckOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = AckOutcome> + Send + 'static,
  {
    Self {
      handler: Some(Box::new(move |res| Box::pin(f(res)))),
    }
  }

  /// A handle with nothing to finalize.
  pub fn noop() -> Self {
    Self::new(|_| async { Ok(()) })
  }

  /// Resolves the delivery with `outcome`.
  ///
  /// # Returns
  ///
  /// The origin's own result of finalizing or requeueing the delivery.
  ///
  /// The handle is consumed, so a second call does not compile:
  ///
  /// ```compile_fail
  /// use weaveflow::component::AckFn;
  ///
  /// # async fn twice() {
  /// let ack = AckFn::noop();
  /// let _ = ack.ack(Ok(())).await;
  /// let _ = ack.ack(Ok(())).await;
  /// # }
  /// ```
  pub async fn ack(mut self, outcome: AckOutcome) -> AckOutcome {
    match self.handler.take() {
      Some(handler) => handler(outcome).await,
      None => Ok(()),
    }
  }

  /// Runs `f` after the wrapped callback completes, whatever the outcome.
  ///
  /// If the returned handle is dropped uninvoked, `f` is dropped with it
  /// without running.
  pub fn on_complete<F>(mut self, f: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    let Some(inner) = self.handler.take() else {
      return Self::new(move |_| async move {
        f();
        Ok(())
      });
    };
    Self::new(move |res| async move {
      let out = inner(res).await;
      f();
      out
    })
  }
}

impl Drop for AckFn {
  fn drop(&mut self) {
    if self.handler.is_some() {
      tracing::warn!("acknowledgement handle dropped without being invoked, delivery remains in flight");
    }
  }
}

impl fmt::Debug for AckFn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AckFn")
      .field("pending", &self.handler.is_some())
      .finish()
  }
}

/// A batch paired with its acknowledgement.
#[derive(Debug)]
pub struct Transaction {
  /// The data.
  pub batch: Batch,
  /// Resolves the delivery of `batch`.
  pub ack: AckFn,
}

impl Transaction {
  /// Pairs a batch with its acknowledgement.
  pub fn new(batch: Batch, ack: AckFn) -> Self {
    Self { batch, ack }
  }

  /// Splits into the batch and acknowledgement.
  pub fn into_parts(self) -> (Batch, AckFn) {
    (self.batch, self.ack)
  }
}
