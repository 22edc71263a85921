//! Close-once shutdown signal.
//!
//! A [`ShutdownSignal`] can be triggered any number of times from any number
//! of tasks; only the first trigger has an effect, and every task awaiting
//! [`ShutdownSignal::triggered`] wakes at once. Components use it to make
//! `close` idempotent and to interrupt blocked reads and writes.

use crate::context::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
  fired: AtomicBool,
  token: CancellationToken,
}

/// Idempotent one-time broadcast signal. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
  inner: Arc<Inner>,
}

impl ShutdownSignal {
  /// Creates an untriggered signal.
  pub fn new() -> Self {
    Self::default()
  }

  /// Fires the signal.
  ///
  /// # Returns
  ///
  /// `true` for the single caller that actually fired it, `false` for every
  /// later (or concurrent, losing) caller.
  pub fn trigger(&self) -> bool {
    let first = !self.inner.fired.swap(true, Ordering::AcqRel);
    if first {
      self.inner.token.cancel();
    }
    first
  }

  /// True once the signal has fired.
  pub fn is_triggered(&self) -> bool {
    self.inner.fired.load(Ordering::Acquire)
  }

  /// Resolves once the signal has fired. Returns immediately if it already has.
  pub async fn triggered(&self) {
    self.inner.token.cancelled().await;
  }

  /// A context that is cancelled when this signal fires.
  pub fn context(&self) -> Context {
    Context::from_token(self.inner.token.child_token())
  }
}
