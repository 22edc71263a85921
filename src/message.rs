//! Messages and batches.
//!
//! # Overview
//!
//! - [`Message`]: a byte payload plus string metadata, optionally carrying a
//!   processing error set by a failed stage.
//! - [`Batch`]: an ordered group of messages that share one acknowledgement
//!   outcome. An empty batch is the "no output" signal of a processor.
//!
//! A message is owned by whichever stage currently holds it and moves forward
//! by value; stages mutate it in place.
//!
//! # Example
//!
//! ```rust
//! use weaveflow::message::{Batch, Message};
//!
//! let mut msg = Message::new("hello").with_meta("source", "test");
//! msg.set_error("boom");
//! assert_eq!(msg.get_meta("source"), Some("test"));
//! assert_eq!(msg.error(), Some("boom"));
//!
//! let batch = Batch::from_payloads(["a", "b"]);
//! assert_eq!(batch.len(), 2);
//! assert!(!batch.has_errors());
//! ```

use crate::error::ComponentError;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single unit of data flowing through a pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
  payload: Bytes,
  metadata: BTreeMap<String, String>,
  error: Option<String>,
}

impl Message {
  /// Creates a message with the given payload and no metadata.
  pub fn new(payload: impl Into<Bytes>) -> Self {
    Self {
      payload: payload.into(),
      metadata: BTreeMap::new(),
      error: None,
    }
  }

  /// Adds a metadata entry, builder style.
  #[must_use]
  pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.metadata.insert(key.into(), value.into());
    self
  }

  /// The raw payload.
  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  /// Replaces the payload.
  pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
    self.payload = payload.into();
  }

  /// Consumes the message and returns its payload.
  pub fn into_payload(self) -> Bytes {
    self.payload
  }

  /// All metadata entries.
  pub fn metadata(&self) -> &BTreeMap<String, String> {
    &self.metadata
  }

  /// Looks up a single metadata value.
  pub fn get_meta(&self, key: &str) -> Option<&str> {
    self.metadata.get(key).map(String::as_str)
  }

  /// Sets a metadata value, replacing any previous one.
  pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.metadata.insert(key.into(), value.into());
  }

  /// Removes a metadata value and returns it.
  pub fn remove_meta(&mut self, key: &str) -> Option<String> {
    self.metadata.remove(key)
  }

  /// Flags the message as failed by a processing stage.
  pub fn set_error(&mut self, err: impl fmt::Display) {
    self.error = Some(err.to_string());
  }

  /// The attached processing error, if any.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// Clears the attached processing error.
  pub fn clear_error(&mut self) {
    self.error = None;
  }

  /// Parses the payload as JSON.
  pub fn as_structured(&self) -> Result<serde_json::Value, ComponentError> {
    serde_json::from_slice(&self.payload)
      .map_err(|e| ComponentError::Transport(format!("payload is not valid JSON: {e}")))
  }

  /// Serializes `value` as JSON and stores it as the payload.
  pub fn set_structured<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ComponentError> {
    let bytes = serde_json::to_vec(value)
      .map_err(|e| ComponentError::Transport(format!("failed to serialize payload: {e}")))?;
    self.payload = Bytes::from(bytes);
    Ok(())
  }
}

/// An ordered group of messages sharing one acknowledgement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch(Vec<Message>);

impl Batch {
  /// Creates a batch from messages.
  pub fn new(messages: Vec<Message>) -> Self {
    Self(messages)
  }

  /// Creates a batch of metadata-free messages from payloads.
  pub fn from_payloads<I, P>(payloads: I) -> Self
  where
    I: IntoIterator<Item = P>,
    P: Into<Bytes>,
  {
    Self(payloads.into_iter().map(Message::new).collect())
  }

  /// Number of messages.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// True when the batch carries no messages.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Appends a message.
  pub fn push(&mut self, msg: Message) {
    self.0.push(msg);
  }

  /// Message at `index`.
  pub fn get(&self, index: usize) -> Option<&Message> {
    self.0.get(index)
  }

  /// Iterates over the messages in order.
  pub fn iter(&self) -> std::slice::Iter<'_, Message> {
    self.0.iter()
  }

  /// Iterates mutably over the messages in order.
  pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Message> {
    self.0.iter_mut()
  }

  /// True if any message carries a processing error.
  pub fn has_errors(&self) -> bool {
    self.0.iter().any(|m| m.error.is_some())
  }

  /// Consumes the batch.
  pub fn into_messages(self) -> Vec<Message> {
    self.0
  }
}

impl From<Vec<Message>> for Batch {
  fn from(messages: Vec<Message>) -> Self {
    Self(messages)
  }
}

impl FromIterator<Message> for Batch {
  fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl IntoIterator for Batch {
  type Item = Message;
  type IntoIter = std::vec::IntoIter<Message>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

impl<'a> IntoIterator for &'a Batch {
  type Item = &'a Message;
  type IntoIter = std::slice::Iter<'a, Message>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}
