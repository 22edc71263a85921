use super::WorkerConfig;
use super::ack::AckFn;
use super::backoff::BackoffConfig;
use super::input::{AsyncInput, InputWorker};
use crate::context::Context;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Serves pre-loaded batches and records every acknowledgement.
#[derive(Default)]
struct ScriptedInput {
  batches: Mutex<VecDeque<Batch>>,
  acks: Arc<Mutex<Vec<(usize, bool)>>>,
  reads: AtomicUsize,
  connect_failures: AtomicUsize,
  connects: AtomicUsize,
  closes: AtomicUsize,
}

impl ScriptedInput {
  fn with_batches(n: usize) -> Self {
    let input = Self::default();
    {
      let mut batches = input.batches.lock().unwrap();
      for i in 0..n {
        batches.push_back(Batch::from_payloads([format!("msg-{i}")]));
      }
    }
    input
  }
}

#[async_trait]
impl AsyncInput for ScriptedInput {
  async fn connect(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.connects.fetch_add(1, Ordering::SeqCst);
    let remaining = self.connect_failures.load(Ordering::SeqCst);
    if remaining > 0 {
      self.connect_failures.store(remaining - 1, Ordering::SeqCst);
      return Err(ComponentError::transport("refused"));
    }
    Ok(())
  }

  async fn read_batch(&self, ctx: &Context) -> Result<(Batch, AckFn), ComponentError> {
    let next = self.batches.lock().unwrap().pop_front();
    let Some(batch) = next else {
      ctx.done().await;
      return Err(ComponentError::Timeout);
    };
    let id = self.reads.fetch_add(1, Ordering::SeqCst);
    let acks = Arc::clone(&self.acks);
    let ack = AckFn::new(move |res| async move {
      acks.lock().unwrap().push((id, res.is_ok()));
      Ok(())
    });
    Ok((batch, ack))
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

fn fast_config(max_in_flight: usize) -> WorkerConfig {
  WorkerConfig::default()
    .with_max_in_flight(max_in_flight)
    .with_backoff(
      BackoffConfig::default()
        .with_initial(Duration::from_millis(5))
        .with_max(Duration::from_millis(20)),
    )
    .with_close_timeout(Duration::from_secs(2))
}

fn short_ctx() -> Context {
  Context::background().with_timeout(Duration::from_millis(100))
}

#[tokio::test]
async fn test_worker_delivers_in_order_and_acks() {
  let input = Arc::new(ScriptedInput::with_batches(3));
  let worker = InputWorker::spawn("in", input.clone(), fast_config(4));

  for i in 0..3 {
    let txn = worker
      .next_transaction(&Context::background().with_timeout(Duration::from_secs(2)))
      .await
      .unwrap();
    assert_eq!(txn.batch.get(0).unwrap().payload(), format!("msg-{i}").as_str());
    txn.ack.ack(Ok(())).await.unwrap();
  }
  assert_eq!(*input.acks.lock().unwrap(), vec![(0, true), (1, true), (2, true)]);

  let res = worker.next_transaction(&short_ctx()).await;
  assert!(matches!(res, Err(ComponentError::Timeout)));
}

#[tokio::test]
async fn test_in_flight_bound_applies_backpressure() {
  let input = Arc::new(ScriptedInput::with_batches(5));
  let worker = InputWorker::spawn("in", input.clone(), fast_config(2));
  let ctx = Context::background().with_timeout(Duration::from_secs(2));

  let first = worker.next_transaction(&ctx).await.unwrap();
  let _second = worker.next_transaction(&ctx).await.unwrap();
  assert!(matches!(
    worker.next_transaction(&short_ctx()).await,
    Err(ComponentError::Timeout)
  ));
  assert_eq!(input.reads.load(Ordering::SeqCst), 2);

  first.ack.ack(Ok(())).await.unwrap();
  let third = worker.next_transaction(&ctx).await.unwrap();
  assert_eq!(third.batch.get(0).unwrap().payload(), "msg-2");
  third.ack.ack(Ok(())).await.unwrap();
}

#[tokio::test]
async fn test_input_max_in_flight_overrides_default() {
  struct Bounded(ScriptedInput);

  #[async_trait]
  impl AsyncInput for Bounded {
    async fn connect(&self, ctx: &Context) -> Result<(), ComponentError> {
      self.0.connect(ctx).await
    }
    async fn read_batch(&self, ctx: &Context) -> Result<(Batch, AckFn), ComponentError> {
      self.0.read_batch(ctx).await
    }
    async fn close(&self, ctx: &Context) -> Result<(), ComponentError> {
      self.0.close(ctx).await
    }
    fn max_in_flight(&self) -> Option<usize> {
      Some(3)
    }
  }

  let worker = InputWorker::spawn("in", Arc::new(Bounded(ScriptedInput::default())), fast_config(64));
  assert_eq!(worker.max_in_flight(), 3);
}

#[tokio::test]
async fn test_reconnects_after_connect_failures() {
  let input = ScriptedInput::with_batches(1);
  input.connect_failures.store(2, Ordering::SeqCst);
  let input = Arc::new(input);
  let worker = InputWorker::spawn("in", input.clone(), fast_config(1));

  let txn = worker
    .next_transaction(&Context::background().with_timeout(Duration::from_secs(2)))
    .await
    .unwrap();
  txn.ack.ack(Ok(())).await.unwrap();
  assert_eq!(input.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_close_waits_for_outstanding_ack() {
  let input = Arc::new(ScriptedInput::with_batches(2));
  let worker = InputWorker::spawn("in", input.clone(), fast_config(1));
  let txn = worker
    .next_transaction(&Context::background().with_timeout(Duration::from_secs(2)))
    .await
    .unwrap();

  worker.trigger_close();
  worker.trigger_close();
  assert!(
    worker
      .wait_for_close(&Context::background().with_timeout(Duration::from_millis(50)))
      .await
      .is_err()
  );
  assert_eq!(input.closes.load(Ordering::SeqCst), 0);

  txn.ack.ack(Err(ComponentError::FailedSend)).await.unwrap();
  worker
    .wait_for_close(&Context::background().with_timeout(Duration::from_secs(2)))
    .await
    .unwrap();
  assert!(worker.is_closed());
  assert_eq!(input.closes.load(Ordering::SeqCst), 1);
  assert_eq!(*input.acks.lock().unwrap(), vec![(0, false)]);
  assert!(matches!(
    worker.next_transaction(&short_ctx()).await,
    Err(ComponentError::TypeClosed)
  ));
}

#[tokio::test]
async fn test_concurrent_close_tears_down_once() {
  let input = Arc::new(ScriptedInput::default());
  let worker = Arc::new(InputWorker::spawn("in", input.clone(), fast_config(1)));

  let mut handles = Vec::new();
  for _ in 0..16 {
    let worker = Arc::clone(&worker);
    handles.push(tokio::spawn(async move {
      worker.trigger_close();
      worker
        .wait_for_close(&Context::background().with_timeout(Duration::from_secs(2)))
        .await
    }));
  }
  for h in handles {
    h.await.unwrap().unwrap();
  }
  assert_eq!(input.closes.load(Ordering::SeqCst), 1);
}
