//! `local` rate limit: allows `count` accesses per `interval` window.

use crate::component::RateLimit;
use crate::config::duration::deserialize_duration;
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Options of the `local` rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalRateLimitConfig {
  /// Accesses allowed per window.
  #[serde(default = "default_count")]
  pub count: usize,
  /// Window length.
  #[serde(default = "default_interval", deserialize_with = "deserialize_duration")]
  pub interval: Duration,
}

fn default_count() -> usize {
  1000
}

fn default_interval() -> Duration {
  Duration::from_secs(1)
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("local")
    .with_summary("Limits accesses to a fixed count per time window within this process.")
    .with_field(FieldSpec::int("count", "Accesses allowed per interval.").optional())
    .with_field(FieldSpec::duration("interval", "Window length.").optional())
}

/// Builds the rate limit from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn RateLimit>, ComponentError> {
  let config: LocalRateLimitConfig = ctx.parse_options()?;
  Ok(Arc::new(LocalRateLimit::new(config)?))
}

/// Fixed-window rate limit.
#[derive(Debug)]
pub struct LocalRateLimit {
  /// Accesses allowed per window.
  pub rate_limit: usize,
  /// Window length.
  pub time_window: Duration,
  count: AtomicUsize,
  window_start: RwLock<Instant>,
  closed: ShutdownSignal,
}

impl LocalRateLimit {
  /// Validates the options.
  pub fn new(config: LocalRateLimitConfig) -> Result<Self, ComponentError> {
    if config.count == 0 {
      return Err(ComponentError::Config("count must be larger than zero".to_string()));
    }
    if config.interval.is_zero() {
      return Err(ComponentError::Config("interval must be larger than zero".to_string()));
    }
    Ok(Self {
      rate_limit: config.count,
      time_window: config.interval,
      count: AtomicUsize::new(0),
      window_start: RwLock::new(Instant::now()),
      closed: ShutdownSignal::new(),
    })
  }
}

#[async_trait]
impl RateLimit for LocalRateLimit {
  async fn access(&self, _ctx: &Context) -> Result<Duration, ComponentError> {
    if self.closed.is_triggered() {
      return Err(ComponentError::TypeClosed);
    }
    let now = Instant::now();
    // Counter updates happen under the window write lock.
    let mut window_start = self.window_start.write().await;
    let elapsed = now.duration_since(*window_start);
    if elapsed >= self.time_window {
      self.count.store(0, Ordering::Relaxed);
      *window_start = now;
    } else if self.count.load(Ordering::Relaxed) >= self.rate_limit {
      return Ok(self.time_window - elapsed);
    }
    self.count.fetch_add(1, Ordering::Relaxed);
    Ok(Duration::ZERO)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.closed.trigger();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_limits_per_window() {
    let rl = LocalRateLimit::new(LocalRateLimitConfig {
      count: 2,
      interval: Duration::from_millis(50),
    })
    .unwrap();
    let ctx = Context::background();
    assert_eq!(rl.access(&ctx).await.unwrap(), Duration::ZERO);
    assert_eq!(rl.access(&ctx).await.unwrap(), Duration::ZERO);
    let wait = rl.access(&ctx).await.unwrap();
    assert!(wait > Duration::ZERO && wait <= Duration::from_millis(50));

    tokio::time::sleep(wait).await;
    assert_eq!(rl.access(&ctx).await.unwrap(), Duration::ZERO);
  }

  #[test]
  fn test_rejects_zero_count() {
    assert!(
      LocalRateLimit::new(LocalRateLimitConfig {
        count: 0,
        interval: Duration::from_secs(1),
      })
      .is_err()
    );
  }
}
