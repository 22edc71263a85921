//! Cancellable, deadline-bearing operation contexts.
//!
//! Every blocking operation in weaveflow (`connect`, `read_batch`,
//! `write_batch`, registry stores) takes a [`Context`]. A context finishes
//! when it is cancelled explicitly, when any ancestor is cancelled, or when its
//! deadline passes. Operations observe this through [`Context::done`] or wrap
//! their work in [`Context::run`], which maps expiry to
//! [`ComponentError::Timeout`].
//!
//! Contexts are scoped to one operation. Component shutdown uses the separate
//! [`crate::shutdown::ShutdownSignal`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use weaveflow::context::Context;
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! assert!(!ctx.is_done());
//! ctx.cancel();
//! assert!(ctx.is_done());
//! ```

use crate::error::ComponentError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A cancellable operation context with an optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl Default for Context {
  fn default() -> Self {
    Self::background()
  }
}

impl Context {
  /// A root context that never expires unless cancelled.
  pub fn background() -> Self {
    Self {
      token: CancellationToken::new(),
      deadline: None,
    }
  }

  /// Wraps an existing cancellation token.
  pub fn from_token(token: CancellationToken) -> Self {
    Self {
      token,
      deadline: None,
    }
  }

  /// Derives a child context that additionally expires after `timeout`.
  ///
  /// The child keeps the earlier of its own deadline and the parent's.
  /// Cancelling the child does not cancel the parent.
  pub fn with_timeout(&self, timeout: Duration) -> Self {
    let candidate = Instant::now() + timeout;
    let deadline = match self.deadline {
      Some(parent) if parent < candidate => parent,
      _ => candidate,
    };
    Self {
      token: self.token.child_token(),
      deadline: Some(deadline),
    }
  }

  /// Derives a child context with the same deadline.
  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: self.deadline,
    }
  }

  /// Cancels this context and all contexts derived from it.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  /// The deadline of this context, if any.
  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Time left before the deadline. `None` when there is no deadline.
  pub fn remaining(&self) -> Option<Duration> {
    self
      .deadline
      .map(|d| d.saturating_duration_since(Instant::now()))
  }

  /// True once the context has been cancelled or its deadline has passed.
  pub fn is_done(&self) -> bool {
    if self.token.is_cancelled() {
      return true;
    }
    matches!(self.deadline, Some(d) if Instant::now() >= d)
  }

  /// Resolves when the context is cancelled or expires.
  pub async fn done(&self) {
    match self.deadline {
      Some(deadline) => {
        tokio::select! {
          _ = self.token.cancelled() => {}
          _ = tokio::time::sleep_until(deadline) => {}
        }
      }
      None => self.token.cancelled().await,
    }
  }

  /// Runs `fut` until it completes or the context finishes.
  ///
  /// # Returns
  ///
  /// The future's own result, or [`ComponentError::Timeout`] if the context
  /// finished first. An already-finished context never polls `fut`.
  pub async fn run<F, T>(&self, fut: F) -> Result<T, ComponentError>
  where
    F: Future<Output = Result<T, ComponentError>>,
  {
    if self.is_done() {
      return Err(ComponentError::Timeout);
    }
    tokio::select! {
      biased;
      _ = self.done() => Err(ComponentError::Timeout),
      res = fut => res,
    }
  }
}
