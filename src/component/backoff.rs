//! Exponential backoff with jitter for reconnects and write retries.

use crate::config::duration::{deserialize_duration, serialize_duration};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
  /// First delay.
  #[serde(
    deserialize_with = "deserialize_duration",
    serialize_with = "serialize_duration"
  )]
  pub initial: Duration,
  /// Upper bound on any single delay.
  #[serde(
    deserialize_with = "deserialize_duration",
    serialize_with = "serialize_duration"
  )]
  pub max: Duration,
  /// Growth factor applied after each attempt.
  pub multiplier: f64,
  /// Fraction of each delay randomised, in `0.0..=1.0`.
  pub jitter: f64,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self {
      initial: Duration::from_millis(500),
      max: Duration::from_secs(30),
      multiplier: 2.0,
      jitter: 0.2,
    }
  }
}

impl BackoffConfig {
  /// Sets the initial delay.
  pub fn with_initial(mut self, initial: Duration) -> Self {
    self.initial = initial;
    self
  }

  /// Sets the maximum delay.
  pub fn with_max(mut self, max: Duration) -> Self {
    self.max = max;
    self
  }

  /// Sets the jitter fraction.
  pub fn with_jitter(mut self, jitter: f64) -> Self {
    self.jitter = jitter;
    self
  }
}

/// Stateful backoff sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
  config: BackoffConfig,
  current: Duration,
}

impl Backoff {
  /// Starts a new sequence.
  pub fn new(config: BackoffConfig) -> Self {
    Self {
      current: config.initial,
      config,
    }
  }

  /// Returns the next delay and advances the sequence.
  pub fn next_delay(&mut self) -> Duration {
    let base = self.current.min(self.config.max);
    self.current = base.mul_f64(self.config.multiplier.max(1.0)).min(self.config.max);

    let jitter = self.config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || base.is_zero() {
      return base;
    }
    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    base.mul_f64(factor).min(self.config.max)
  }

  /// Restarts the sequence after a success.
  pub fn reset(&mut self) {
    self.current = self.config.initial;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_grows_until_max() {
    let cfg = BackoffConfig::default()
      .with_initial(Duration::from_millis(100))
      .with_max(Duration::from_millis(350))
      .with_jitter(0.0);
    let mut b = Backoff::new(cfg);
    assert_eq!(b.next_delay(), Duration::from_millis(100));
    assert_eq!(b.next_delay(), Duration::from_millis(200));
    assert_eq!(b.next_delay(), Duration::from_millis(350));
    assert_eq!(b.next_delay(), Duration::from_millis(350));
    b.reset();
    assert_eq!(b.next_delay(), Duration::from_millis(100));
  }

  #[test]
  fn test_jitter_stays_in_bounds() {
    let cfg = BackoffConfig::default()
      .with_initial(Duration::from_millis(1000))
      .with_jitter(0.5);
    for _ in 0..50 {
      let d = Backoff::new(cfg).next_delay();
      assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
    }
  }
}
