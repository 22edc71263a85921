//! In-process message origin and sink used by the `memory_queue` input and
//! the `memory` output.
//!
//! A [`QueueOrigin`] tracks every delivery through `pending → in flight →
//! finished`. Deliveries can be requeued while in flight, which is how a
//! failed acknowledgement makes a message observably redeliverable.

use crate::message::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named queues and sinks shared by everything built from one manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
  queues: Arc<Mutex<HashMap<String, Arc<QueueOrigin>>>>,
  sinks: Arc<Mutex<HashMap<String, Arc<MemorySink>>>>,
}

impl MemoryBroker {
  /// Creates an empty broker.
  pub fn new() -> Self {
    Self::default()
  }

  /// The queue called `name`, created on first use.
  pub fn queue(&self, name: &str) -> Arc<QueueOrigin> {
    Arc::clone(lock(&self.queues).entry(name.to_string()).or_default())
  }

  /// The sink called `name`, created on first use.
  pub fn sink(&self, name: &str) -> Arc<MemorySink> {
    Arc::clone(lock(&self.sinks).entry(name.to_string()).or_default())
  }
}

/// A message handed out by a [`QueueOrigin`].
#[derive(Debug, Clone)]
pub struct Delivery {
  /// Origin-assigned id.
  pub id: u64,
  /// The message.
  pub message: Message,
  /// How many times this message has been handed out, including this one.
  pub attempts: u32,
}

/// Counters describing a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
  /// Waiting to be received.
  pub pending: usize,
  /// Received and not yet finished or requeued.
  pub in_flight: usize,
  /// Finished for good.
  pub finished: u64,
  /// Times a delivery was put back for redelivery.
  pub requeued: u64,
  /// Finish or requeue calls for ids that were not in flight.
  pub stale_acks: u64,
}

#[derive(Debug, Default)]
struct QueueState {
  next_id: u64,
  pending: VecDeque<Delivery>,
  in_flight: HashMap<u64, Delivery>,
  finished: u64,
  requeued: u64,
  stale_acks: u64,
}

/// An in-memory queue with explicit finish and requeue.
#[derive(Debug, Default)]
pub struct QueueOrigin {
  state: Mutex<QueueState>,
  available: Notify,
}

impl QueueOrigin {
  /// Appends a message.
  pub fn publish(&self, message: Message) {
    {
      let mut state = lock(&self.state);
      state.next_id += 1;
      let id = state.next_id;
      state.pending.push_back(Delivery {
        id,
        message,
        attempts: 0,
      });
    }
    self.available.notify_waiters();
  }

  /// Takes up to `max` pending deliveries without waiting.
  pub fn try_receive(&self, max: usize) -> Vec<Delivery> {
    let mut state = lock(&self.state);
    let mut out = Vec::new();
    while out.len() < max {
      let Some(mut delivery) = state.pending.pop_front() else {
        break;
      };
      delivery.attempts += 1;
      state.in_flight.insert(delivery.id, delivery.clone());
      out.push(delivery);
    }
    out
  }

  /// Waits until at least one delivery is pending, then takes up to `max`.
  ///
  /// Cancel safe: dropping the future never loses a delivery.
  pub async fn receive(&self, max: usize) -> Vec<Delivery> {
    let max = max.max(1);
    loop {
      let notified = self.available.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      let batch = self.try_receive(max);
      if !batch.is_empty() {
        return batch;
      }
      notified.await;
    }
  }

  /// Marks an in-flight delivery finished.
  ///
  /// # Returns
  ///
  /// `false` if the id was not in flight.
  pub fn finish(&self, id: u64) -> bool {
    let mut state = lock(&self.state);
    if state.in_flight.remove(&id).is_some() {
      state.finished += 1;
      true
    } else {
      state.stale_acks += 1;
      false
    }
  }

  /// Puts in-flight deliveries back at the front of the queue, keeping their
  /// relative order.
  ///
  /// # Returns
  ///
  /// How many ids were actually in flight.
  pub fn requeue(&self, ids: &[u64]) -> usize {
    let count = {
      let mut state = lock(&self.state);
      let mut count = 0;
      for id in ids.iter().rev() {
        match state.in_flight.remove(id) {
          Some(delivery) => {
            state.pending.push_front(delivery);
            state.requeued += 1;
            count += 1;
          }
          None => state.stale_acks += 1,
        }
      }
      count
    };
    if count > 0 {
      self.available.notify_waiters();
    }
    count
  }

  /// Current counters.
  pub fn stats(&self) -> QueueStats {
    let state = lock(&self.state);
    QueueStats {
      pending: state.pending.len(),
      in_flight: state.in_flight.len(),
      finished: state.finished,
      requeued: state.requeued,
      stale_acks: state.stale_acks,
    }
  }
}

/// Collects messages written by `memory` outputs.
#[derive(Debug, Default)]
pub struct MemorySink {
  messages: Mutex<Vec<Message>>,
  written: Notify,
}

impl MemorySink {
  /// Appends a whole batch atomically.
  pub fn extend(&self, messages: impl IntoIterator<Item = Message>) {
    lock(&self.messages).extend(messages);
    self.written.notify_waiters();
  }

  /// Copies of every message received so far.
  pub fn messages(&self) -> Vec<Message> {
    lock(&self.messages).clone()
  }

  /// Number of messages received so far.
  pub fn len(&self) -> usize {
    lock(&self.messages).len()
  }

  /// True when nothing has been written.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Waits until at least `n` messages have been written.
  pub async fn wait_for(&self, n: usize) {
    loop {
      let notified = self.written.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.len() >= n {
        return;
      }
      notified.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_requeue_then_finish() {
    let q = QueueOrigin::default();
    q.publish(Message::new("a"));
    q.publish(Message::new("b"));

    let first = q.try_receive(2);
    assert_eq!(first.len(), 2);
    assert_eq!(q.stats().in_flight, 2);

    assert_eq!(q.requeue(&[first[0].id, first[1].id]), 2);
    let again = q.try_receive(2);
    assert_eq!(again[0].message.payload(), "a");
    assert_eq!(again[0].attempts, 2);

    assert!(q.finish(again[0].id));
    assert!(q.finish(again[1].id));
    assert!(!q.finish(again[1].id));
    let stats = q.stats();
    assert_eq!(stats.finished, 2);
    assert_eq!(stats.requeued, 2);
    assert_eq!(stats.stale_acks, 1);
    assert_eq!(stats.pending + stats.in_flight, 0);
  }

  #[tokio::test]
  async fn test_receive_wakes_on_publish() {
    let broker = MemoryBroker::new();
    let q = broker.queue("q");
    let waiter = {
      let q = Arc::clone(&q);
      tokio::spawn(async move { q.receive(1).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    broker.queue("q").publish(Message::new("late"));
    let got = waiter.await.unwrap();
    assert_eq!(got[0].message.payload(), "late");
  }
}
