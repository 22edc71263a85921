//! # Component Contract
//!
//! The capability interfaces every connector satisfies, and the workers that
//! drive inputs and outputs on their own tasks.
//!
//! ## Overview
//!
//! - [`AsyncInput`]: `connect` / `read_batch` / `close`. `read_batch` returns
//!   a batch with its [`AckFn`], a `Timeout` when the context expires, or
//!   `TypeClosed` once the input has been closed.
//! - [`AsyncOutput`]: `connect` / `write_batch` / `close`. A write either
//!   fully succeeds or is treated as not written.
//! - [`Processor`], [`Cache`] and [`RateLimit`]: the shared resources that
//!   pipelines and other components reference by label.
//! - [`InputWorker`] / [`OutputWorker`]: own one input or output each,
//!   reconnecting with backoff and bounding in-flight work.
//!
//! ## Lifecycle
//!
//! `Unconnected → Connecting → Connected → Closing → Closed`. `connect` is a
//! no-op while connected and fails with `TypeClosed` after close; `close` is
//! idempotent.

pub mod ack;
pub mod backoff;
pub mod cache;
pub mod connection;
pub mod input;
pub mod output;
pub mod processor;
pub mod rate_limit;

pub use ack::{AckFn, AckOutcome, Transaction};
pub use backoff::{Backoff, BackoffConfig};
pub use cache::Cache;
pub use connection::{ConnectionState, LazyConnection};
pub use input::{AsyncInput, InputWorker};
pub use output::{AsyncOutput, OutputWorker};
pub use processor::Processor;
pub use rate_limit::RateLimit;

use crate::config::EngineConfig;
use crate::error::ComponentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The five resource categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
  /// Rate limits.
  RateLimit,
  /// Caches.
  Cache,
  /// Processors.
  Processor,
  /// Inputs.
  Input,
  /// Outputs.
  Output,
}

impl ResourceCategory {
  /// Every category, in the order resources are applied to the registry.
  ///
  /// Later categories may reference earlier ones by label.
  pub const APPLY_ORDER: [ResourceCategory; 5] = [
    ResourceCategory::RateLimit,
    ResourceCategory::Cache,
    ResourceCategory::Processor,
    ResourceCategory::Input,
    ResourceCategory::Output,
  ];

  /// Every category.
  pub const ALL: [ResourceCategory; 5] = Self::APPLY_ORDER;

  /// Singular name, e.g. `rate_limit`.
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceCategory::RateLimit => "rate_limit",
      ResourceCategory::Cache => "cache",
      ResourceCategory::Processor => "processor",
      ResourceCategory::Input => "input",
      ResourceCategory::Output => "output",
    }
  }

  /// Key of this category in a resource file, e.g. `rate_limit_resources`.
  pub fn config_key(&self) -> &'static str {
    match self {
      ResourceCategory::RateLimit => "rate_limit_resources",
      ResourceCategory::Cache => "cache_resources",
      ResourceCategory::Processor => "processor_resources",
      ResourceCategory::Input => "input_resources",
      ResourceCategory::Output => "output_resources",
    }
  }

  /// Looks a category up by its resource file key.
  pub fn from_config_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|c| c.config_key() == key)
  }

  /// The not-found error for `label` in this category.
  pub fn not_found(&self, label: &str) -> ComponentError {
    let label = label.to_string();
    match self {
      ResourceCategory::RateLimit => ComponentError::RateLimitNotFound(label),
      ResourceCategory::Cache => ComponentError::CacheNotFound(label),
      ResourceCategory::Processor => ComponentError::ProcessorNotFound(label),
      ResourceCategory::Input => ComponentError::InputNotFound(label),
      ResourceCategory::Output => ComponentError::OutputNotFound(label),
    }
  }
}

impl fmt::Display for ResourceCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Settings shared by input and output workers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerConfig {
  /// In-flight bound used when a component does not declare its own.
  pub max_in_flight: usize,
  /// Reconnect and retry backoff.
  pub backoff: BackoffConfig,
  /// How long a closing worker waits for outstanding work.
  pub close_timeout: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self::from(&EngineConfig::default())
  }
}

impl From<&EngineConfig> for WorkerConfig {
  fn from(cfg: &EngineConfig) -> Self {
    Self {
      max_in_flight: cfg.max_in_flight,
      backoff: cfg.reconnect_backoff,
      close_timeout: cfg.close_timeout,
    }
  }
}

impl WorkerConfig {
  /// Sets the default in-flight bound.
  pub fn with_max_in_flight(mut self, max: usize) -> Self {
    self.max_in_flight = max;
    self
  }

  /// Sets the backoff.
  pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
    self.backoff = backoff;
    self
  }

  /// Sets the close timeout.
  pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
    self.close_timeout = timeout;
    self
  }
}

#[cfg(test)]
mod input_test;
