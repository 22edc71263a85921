//! # Error Handling System
//!
//! Error taxonomy shared by every component, the registry, and the
//! reconfiguration engine.
//!
//! ## Overview
//!
//! All fallible operations in weaveflow return [`ComponentError`]. Callers are
//! expected to branch on the *class* of an error rather than on individual
//! variants:
//!
//! - **Transient**: timeouts, lost connections, transport failures. The caller
//!   retries with its own backoff and never treats these as fatal.
//! - **Terminal**: the component instance was closed. The owning stage must
//!   rebuild (or re-resolve) the component before continuing.
//! - **Configuration**: unknown component types, missing resources, invalid
//!   options. These are rejected before the registry is touched.
//! - **Other**: data-level conditions such as a missing cache key.
//!
//! ## Example
//!
//! ```rust
//! use weaveflow::error::{ComponentError, ErrorClass};
//!
//! let err = ComponentError::Timeout;
//! assert_eq!(err.class(), ErrorClass::Transient);
//! assert!(err.is_recoverable());
//! assert!(ComponentError::TypeClosed.is_terminal());
//! ```

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by components and the resource registry.
#[derive(Debug, Clone, Error)]
pub enum ComponentError {
  /// The operation context expired or was cancelled before completion.
  #[error("action timed out")]
  Timeout,
  /// The component was closed and will not produce or accept further data.
  #[error("type was closed")]
  TypeClosed,
  /// The component has no live connection to its source or sink.
  #[error("not connected to target source or sink")]
  NotConnected,
  /// An input or output was started a second time.
  #[error("type has already been started")]
  AlreadyStarted,
  /// An acknowledgement was expected but never arrived.
  #[error("failed to receive acknowledgement")]
  NoAck,
  /// A message could not be delivered to its destination.
  #[error("message failed to reach a target destination")]
  FailedSend,
  /// A component was configured with an unrecognised implementation.
  #[error("{type_str} type of '{tried}' was not recognised")]
  InvalidType {
    /// The component category, e.g. `input`.
    type_str: String,
    /// The implementation name that was requested.
    tried: String,
  },
  /// No input resource exists under the label.
  #[error("input resource '{0}' not found")]
  InputNotFound(String),
  /// No processor resource exists under the label.
  #[error("processor resource '{0}' not found")]
  ProcessorNotFound(String),
  /// No output resource exists under the label.
  #[error("output resource '{0}' not found")]
  OutputNotFound(String),
  /// No cache resource exists under the label.
  #[error("cache resource '{0}' not found")]
  CacheNotFound(String),
  /// No rate limit resource exists under the label.
  #[error("rate limit resource '{0}' not found")]
  RateLimitNotFound(String),
  /// A cache `add` found the key already present.
  #[error("key already exists")]
  KeyAlreadyExists,
  /// A cache lookup found no value for the key.
  #[error("key does not exist")]
  KeyNotFound,
  /// Component options were invalid.
  #[error("configuration error: {0}")]
  Config(String),
  /// The underlying transport reported a failure.
  #[error("transport error: {0}")]
  Transport(String),
  /// Filesystem or socket I/O failed.
  #[error("io error: {0}")]
  Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ComponentError {
  fn from(err: std::io::Error) -> Self {
    ComponentError::Io(Arc::new(err))
  }
}

/// Broad classification of a [`ComponentError`], used to decide between
/// retrying, rebuilding, and rejecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Retry the same instance after a backoff.
  Transient,
  /// The instance is finished; a fresh connect or a new instance is required.
  Terminal,
  /// Reject the configuration; retrying will not help.
  Configuration,
  /// Data-level outcome that the caller interprets.
  Other,
}

impl ComponentError {
  /// Returns the class of this error.
  pub fn class(&self) -> ErrorClass {
    match self {
      ComponentError::Timeout
      | ComponentError::NotConnected
      | ComponentError::NoAck
      | ComponentError::FailedSend
      | ComponentError::Transport(_)
      | ComponentError::Io(_) => ErrorClass::Transient,
      ComponentError::TypeClosed => ErrorClass::Terminal,
      ComponentError::InvalidType { .. }
      | ComponentError::InputNotFound(_)
      | ComponentError::ProcessorNotFound(_)
      | ComponentError::OutputNotFound(_)
      | ComponentError::CacheNotFound(_)
      | ComponentError::RateLimitNotFound(_)
      | ComponentError::Config(_) => ErrorClass::Configuration,
      ComponentError::AlreadyStarted
      | ComponentError::KeyAlreadyExists
      | ComponentError::KeyNotFound => ErrorClass::Other,
    }
  }

  /// True for errors the caller should retry without restarting the component.
  pub fn is_recoverable(&self) -> bool {
    self.class() == ErrorClass::Transient
  }

  /// True when the component instance is closed for good.
  pub fn is_terminal(&self) -> bool {
    self.class() == ErrorClass::Terminal
  }

  /// Builds an [`ComponentError::InvalidType`] error.
  pub fn invalid_type(type_str: impl Into<String>, tried: impl Into<String>) -> Self {
    ComponentError::InvalidType {
      type_str: type_str.into(),
      tried: tried.into(),
    }
  }

  /// Wraps any displayable transport failure.
  pub fn transport(err: impl fmt::Display) -> Self {
    ComponentError::Transport(err.to_string())
  }
}

/// Identifying information about a running component, used in log fields
/// and error reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
  /// Resource category, e.g. `input`.
  pub category: String,
  /// Registry label of the resource.
  pub label: String,
  /// Implementation name, e.g. `memory_queue`.
  pub type_name: String,
}

impl ComponentInfo {
  /// Creates a new `ComponentInfo`.
  pub fn new(
    category: impl Into<String>,
    label: impl Into<String>,
    type_name: impl Into<String>,
  ) -> Self {
    Self {
      category: category.into(),
      label: label.into(),
      type_name: type_name.into(),
    }
  }
}

impl Default for ComponentInfo {
  fn default() -> Self {
    Self::new("component", "default", "default")
  }
}

impl fmt::Display for ComponentInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} '{}' ({})", self.category, self.label, self.type_name)
  }
}
