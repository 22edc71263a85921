//! Rate limit resources.

use crate::context::Context;
use crate::error::ComponentError;
use async_trait::async_trait;
use std::time::Duration;

/// Shared access throttle.
#[async_trait]
pub trait RateLimit: Send + Sync {
  /// Requests one unit of access.
  ///
  /// # Returns
  ///
  /// `Duration::ZERO` when access is granted, otherwise how long the caller
  /// should wait before asking again.
  async fn access(&self, ctx: &Context) -> Result<Duration, ComponentError>;

  /// Releases resources. Idempotent.
  async fn close(&self, ctx: &Context) -> Result<(), ComponentError>;
}
