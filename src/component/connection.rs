//! Connection lifecycle shared by connector implementations.
//!
//! [`LazyConnection`] owns the lazily created transport handle of one
//! component instance behind a single async mutex, so concurrent `connect`
//! calls collapse into one attempt and a reconnect can never race a
//! shutdown-triggered teardown.

use crate::context::Context;
use crate::error::ComponentError;
use std::fmt;
use std::future::Future;
use tokio::sync::Mutex;

/// Lifecycle state of a component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  /// No transport; `connect` may be called.
  Unconnected,
  /// A connection attempt is running.
  Connecting,
  /// The transport is live.
  Connected,
  /// Teardown has begun.
  Closing,
  /// Closed for good.
  Closed,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ConnectionState::Unconnected => "unconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
      ConnectionState::Closing => "closing",
      ConnectionState::Closed => "closed",
    };
    f.write_str(s)
  }
}

struct Inner<T> {
  handle: Option<T>,
  state: ConnectionState,
}

/// Mutex-guarded, lazily created connection handle.
pub struct LazyConnection<T> {
  inner: Mutex<Inner<T>>,
}

impl<T> Default for LazyConnection<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for LazyConnection<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LazyConnection").finish_non_exhaustive()
  }
}

impl<T> LazyConnection<T> {
  /// Creates an unconnected handle.
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        handle: None,
        state: ConnectionState::Unconnected,
      }),
    }
  }

  /// Current state.
  pub async fn state(&self) -> ConnectionState {
    self.inner.lock().await.state
  }

  /// Drops the live handle and returns to `Unconnected` so a later
  /// `connect` dials again. Has no effect once closing has begun.
  pub async fn disconnect(&self) -> Option<T> {
    let mut inner = self.inner.lock().await;
    if matches!(
      inner.state,
      ConnectionState::Closing | ConnectionState::Closed
    ) {
      return None;
    }
    inner.state = ConnectionState::Unconnected;
    inner.handle.take()
  }

  /// Moves to `Closed`, running `teardown` on the live handle if there is
  /// one. Only the first call runs `teardown`.
  ///
  /// # Returns
  ///
  /// `true` if this call performed the close.
  pub async fn close_with<F, Fut>(&self, teardown: F) -> bool
  where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = ()>,
  {
    let mut inner = self.inner.lock().await;
    if matches!(
      inner.state,
      ConnectionState::Closing | ConnectionState::Closed
    ) {
      return false;
    }
    inner.state = ConnectionState::Closing;
    if let Some(handle) = inner.handle.take() {
      teardown(handle).await;
    }
    inner.state = ConnectionState::Closed;
    true
  }
}

impl<T: Clone> LazyConnection<T> {
  /// Establishes the connection with `dial` unless one is already live.
  ///
  /// Concurrent callers queue on the mutex; once one succeeds the others see
  /// `Connected` and return the same handle without dialing. A failed
  /// attempt leaves the state `Unconnected`.
  ///
  /// # Returns
  ///
  /// The live handle, [`ComponentError::TypeClosed`] after close, or the
  /// dial error (`Timeout` if `ctx` finished first).
  pub async fn connect<F, Fut>(&self, ctx: &Context, dial: F) -> Result<T, ComponentError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ComponentError>>,
  {
    let mut inner = ctx.run(async { Ok(self.inner.lock().await) }).await?;
    match inner.state {
      ConnectionState::Closing | ConnectionState::Closed => Err(ComponentError::TypeClosed),
      ConnectionState::Connected => inner.handle.clone().ok_or(ComponentError::NotConnected),
      ConnectionState::Unconnected | ConnectionState::Connecting => {
        inner.state = ConnectionState::Connecting;
        match ctx.run(dial()).await {
          Ok(handle) => {
            inner.handle = Some(handle.clone());
            inner.state = ConnectionState::Connected;
            Ok(handle)
          }
          Err(e) => {
            inner.state = ConnectionState::Unconnected;
            Err(e)
          }
        }
      }
    }
  }

  /// The live handle.
  ///
  /// # Returns
  ///
  /// [`ComponentError::NotConnected`] before a successful connect and
  /// [`ComponentError::TypeClosed`] once closing has begun.
  pub async fn get(&self) -> Result<T, ComponentError> {
    let inner = self.inner.lock().await;
    match inner.state {
      ConnectionState::Closing | ConnectionState::Closed => Err(ComponentError::TypeClosed),
      _ => inner.handle.clone().ok_or(ComponentError::NotConnected),
    }
  }
}
