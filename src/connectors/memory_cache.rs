//! `memory` cache: an in-process key/value map with optional expiry.

use crate::component::Cache;
use crate::config::duration::deserialize_optional_duration;
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Options of the `memory` cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
  /// Expiry applied when a write does not set its own.
  #[serde(default, deserialize_with = "deserialize_optional_duration")]
  pub default_ttl: Option<Duration>,
  /// Entries present from the start.
  #[serde(default)]
  pub init_values: BTreeMap<String, String>,
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("memory")
    .with_summary("Stores key/value pairs in memory.")
    .with_field(FieldSpec::duration("default_ttl", "Default expiry of entries.").optional())
    .with_field(FieldSpec::object("init_values", "Entries loaded at start.").optional())
}

/// Builds the cache from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn Cache>, ComponentError> {
  let config: MemoryCacheConfig = ctx.parse_options()?;
  Ok(Arc::new(MemoryCache::new(config)))
}

#[derive(Debug, Clone)]
struct Entry {
  value: Bytes,
  expires: Option<Instant>,
}

impl Entry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires.is_none_or(|e| now < e)
  }
}

/// In-memory cache.
#[derive(Debug)]
pub struct MemoryCache {
  default_ttl: Option<Duration>,
  entries: RwLock<HashMap<String, Entry>>,
  closed: ShutdownSignal,
}

impl MemoryCache {
  /// Creates the cache with its initial values.
  pub fn new(config: MemoryCacheConfig) -> Self {
    let entries = config
      .init_values
      .into_iter()
      .map(|(k, v)| {
        (
          k,
          Entry {
            value: Bytes::from(v),
            expires: None,
          },
        )
      })
      .collect();
    Self {
      default_ttl: config.default_ttl,
      entries: RwLock::new(entries),
      closed: ShutdownSignal::new(),
    }
  }

  fn check_open(&self) -> Result<(), ComponentError> {
    if self.closed.is_triggered() {
      Err(ComponentError::TypeClosed)
    } else {
      Ok(())
    }
  }

  fn entry(&self, value: Bytes, ttl: Option<Duration>) -> Entry {
    Entry {
      value,
      expires: ttl.or(self.default_ttl).map(|d| Instant::now() + d),
    }
  }
}

#[async_trait]
impl Cache for MemoryCache {
  async fn get(&self, _ctx: &Context, key: &str) -> Result<Bytes, ComponentError> {
    self.check_open()?;
    let entries = self.entries.read().await;
    match entries.get(key) {
      Some(entry) if entry.is_live(Instant::now()) => Ok(entry.value.clone()),
      _ => Err(ComponentError::KeyNotFound),
    }
  }

  async fn set(
    &self,
    _ctx: &Context,
    key: &str,
    value: Bytes,
    ttl: Option<Duration>,
  ) -> Result<(), ComponentError> {
    self.check_open()?;
    let entry = self.entry(value, ttl);
    self.entries.write().await.insert(key.to_string(), entry);
    Ok(())
  }

  async fn add(
    &self,
    _ctx: &Context,
    key: &str,
    value: Bytes,
    ttl: Option<Duration>,
  ) -> Result<(), ComponentError> {
    self.check_open()?;
    let mut entries = self.entries.write().await;
    if entries
      .get(key)
      .is_some_and(|e| e.is_live(Instant::now()))
    {
      return Err(ComponentError::KeyAlreadyExists);
    }
    entries.insert(key.to_string(), self.entry(value, ttl));
    Ok(())
  }

  async fn delete(&self, _ctx: &Context, key: &str) -> Result<(), ComponentError> {
    self.check_open()?;
    self.entries.write().await.remove(key);
    Ok(())
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    if self.closed.trigger() {
      self.entries.write().await.clear();
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_set_get_delete() {
    let cache = MemoryCache::new(MemoryCacheConfig::default());
    let ctx = Context::background();
    cache.set(&ctx, "k", Bytes::from("v"), None).await.unwrap();
    assert_eq!(cache.get(&ctx, "k").await.unwrap(), "v");
    cache.delete(&ctx, "k").await.unwrap();
    assert!(matches!(
      cache.get(&ctx, "k").await,
      Err(ComponentError::KeyNotFound)
    ));
  }

  #[tokio::test]
  async fn test_add_rejects_existing() {
    let mut init = BTreeMap::new();
    init.insert("seed".to_string(), "1".to_string());
    let cache = MemoryCache::new(MemoryCacheConfig {
      default_ttl: None,
      init_values: init,
    });
    let ctx = Context::background();
    assert!(matches!(
      cache.add(&ctx, "seed", Bytes::from("2"), None).await,
      Err(ComponentError::KeyAlreadyExists)
    ));
    cache.add(&ctx, "new", Bytes::from("3"), None).await.unwrap();
  }

  #[tokio::test]
  async fn test_entries_expire() {
    let cache = MemoryCache::new(MemoryCacheConfig {
      default_ttl: Some(Duration::from_millis(20)),
      init_values: BTreeMap::new(),
    });
    let ctx = Context::background();
    cache.set(&ctx, "k", Bytes::from("v"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(cache.get(&ctx, "k").await.is_err());
    cache.add(&ctx, "k", Bytes::from("again"), None).await.unwrap();
  }

  #[tokio::test]
  async fn test_closed_cache_rejects_calls() {
    let cache = MemoryCache::new(MemoryCacheConfig::default());
    let ctx = Context::background();
    cache.close(&ctx).await.unwrap();
    cache.close(&ctx).await.unwrap();
    assert!(matches!(
      cache.get(&ctx, "k").await,
      Err(ComponentError::TypeClosed)
    ));
  }
}
