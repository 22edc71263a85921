use crate::message::{Batch, Message};
use serde_json::json;

// ============================================================================
// Message
// ============================================================================

#[test]
fn test_message_metadata() {
  let mut msg = Message::new("payload").with_meta("a", "1");
  msg.set_meta("b", "2");
  assert_eq!(msg.get_meta("a"), Some("1"));
  assert_eq!(msg.get_meta("b"), Some("2"));
  assert_eq!(msg.remove_meta("a"), Some("1".to_string()));
  assert_eq!(msg.get_meta("a"), None);
  assert_eq!(msg.metadata().len(), 1);
}

#[test]
fn test_message_error_flag() {
  let mut msg = Message::new("x");
  assert_eq!(msg.error(), None);
  msg.set_error(crate::error::ComponentError::KeyNotFound);
  assert_eq!(msg.error(), Some("key does not exist"));
  msg.clear_error();
  assert_eq!(msg.error(), None);
}

#[test]
fn test_message_structured_payload() {
  let mut msg = Message::new(r#"{"id":3}"#);
  assert_eq!(msg.as_structured().unwrap(), json!({"id": 3}));

  msg.set_structured(&json!({"id": 4, "ok": true})).unwrap();
  assert_eq!(msg.as_structured().unwrap()["id"], 4);

  msg.set_payload("not json");
  assert!(msg.as_structured().is_err());
}

// ============================================================================
// Batch
// ============================================================================

#[test]
fn test_empty_batch() {
  let batch = Batch::default();
  assert!(batch.is_empty());
  assert_eq!(batch.len(), 0);
  assert!(!batch.has_errors());
}

#[test]
fn test_batch_preserves_order() {
  let batch = Batch::from_payloads(["1", "2", "3"]);
  let payloads: Vec<_> = batch.iter().map(|m| m.payload().clone()).collect();
  assert_eq!(payloads, vec!["1", "2", "3"]);
  assert_eq!(batch.get(1).unwrap().payload(), "2");
}

#[test]
fn test_batch_has_errors() {
  let mut batch = Batch::from_payloads(["a", "b"]);
  batch.iter_mut().nth(1).unwrap().set_error("failed");
  assert!(batch.has_errors());

  let collected: Batch = batch.into_iter().filter(|m| m.error().is_none()).collect();
  assert_eq!(collected.len(), 1);
}
