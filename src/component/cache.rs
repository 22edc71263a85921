//! Cache resources.

use crate::context::Context;
use crate::error::ComponentError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A key/value store shared between processors.
#[async_trait]
pub trait Cache: Send + Sync {
  /// Fetches a value, failing with [`ComponentError::KeyNotFound`].
  async fn get(&self, ctx: &Context, key: &str) -> Result<Bytes, ComponentError>;

  /// Stores a value, replacing any existing one. `ttl` overrides the
  /// cache's default expiry.
  async fn set(
    &self,
    ctx: &Context,
    key: &str,
    value: Bytes,
    ttl: Option<Duration>,
  ) -> Result<(), ComponentError>;

  /// Stores a value only if the key is absent, failing with
  /// [`ComponentError::KeyAlreadyExists`] otherwise.
  async fn add(
    &self,
    ctx: &Context,
    key: &str,
    value: Bytes,
    ttl: Option<Duration>,
  ) -> Result<(), ComponentError>;

  /// Removes a key. Removing an absent key is not an error.
  async fn delete(&self, ctx: &Context, key: &str) -> Result<(), ComponentError>;

  /// Releases resources. Idempotent.
  async fn close(&self, ctx: &Context) -> Result<(), ComponentError>;
}
