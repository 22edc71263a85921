use super::*;
use crate::docs::ComponentSpec;
use crate::message::Message;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

struct CountingProcessor {
  closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for CountingProcessor {
  async fn process_batch(&self, _ctx: &Context, batch: Batch) -> Result<Batch, ComponentError> {
    Ok(batch)
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

fn conf(label: &str, type_name: &str, yaml: &str) -> ComponentConfig {
  ComponentConfig::from_yaml(label, type_name, yaml).unwrap()
}

fn timeout_ctx() -> Context {
  Context::background().with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_store_and_lookup() {
  let manager = Manager::new(Arc::new(Environment::builtin()));
  let ctx = timeout_ctx();
  manager
    .store_cache(&ctx, "users", &conf("users", "memory", "{}"))
    .await
    .unwrap();

  assert!(manager.probe(ResourceCategory::Cache, "users"));
  assert!(!manager.probe(ResourceCategory::Processor, "users"));
  assert_eq!(manager.labels(ResourceCategory::Cache), vec!["users".to_string()]);

  let err = manager.get_cache("missing").err().unwrap();
  assert_eq!(err.to_string(), "cache resource 'missing' not found");
}

#[tokio::test]
async fn test_failed_build_keeps_previous() {
  let manager = Manager::new(Arc::new(Environment::builtin()));
  let ctx = timeout_ctx();
  manager
    .store_rate_limit(&ctx, "rl", &conf("rl", "local", "count: 5"))
    .await
    .unwrap();
  let before = manager.get_rate_limit("rl").unwrap();

  let err = manager
    .store_rate_limit(&ctx, "rl", &conf("rl", "local", "count: 0"))
    .await
    .unwrap_err();
  assert!(matches!(err, ComponentError::Config(_)));
  let err = manager
    .store_rate_limit(&ctx, "rl", &conf("rl", "redis", "{}"))
    .await
    .unwrap_err();
  assert!(matches!(err, ComponentError::InvalidType { .. }));

  let after = manager.get_rate_limit("rl").unwrap();
  assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_replacing_closes_previous() {
  let closes = Arc::new(AtomicUsize::new(0));
  let mut env = Environment::builtin();
  let counter = Arc::clone(&closes);
  env.register_processor(ComponentSpec::new("counting"), move |_ctx| {
    let closes = Arc::clone(&counter);
    async move { Ok(Arc::new(CountingProcessor { closes }) as Arc<dyn Processor>) }
  });
  let manager = Manager::new(Arc::new(env));
  let ctx = timeout_ctx();

  let p = conf("p", "counting", "{}");
  manager.store_processor(&ctx, "p", &p).await.unwrap();
  assert_eq!(closes.load(Ordering::SeqCst), 0);
  manager.store(&ctx, ResourceCategory::Processor, &p).await.unwrap();
  assert_eq!(closes.load(Ordering::SeqCst), 1);

  let out = manager
    .process(&ctx, "p", Batch::from_payloads(["a"]))
    .await
    .unwrap();
  assert_eq!(out.len(), 1);
}

#[tokio::test]
async fn test_stores_on_different_labels_do_not_block() {
  let release = Arc::new(Notify::new());
  let mut env = Environment::builtin();
  let gate = Arc::clone(&release);
  env.register_cache(ComponentSpec::new("slow"), move |ctx| {
    let gate = Arc::clone(&gate);
    async move {
      gate.notified().await;
      crate::connectors::memory_cache::build(ctx).await
    }
  });
  let manager = Manager::new(Arc::new(env));

  let slow_manager = manager.clone();
  let slow = tokio::spawn(async move {
    slow_manager
      .store_cache(&timeout_ctx(), "a", &conf("a", "slow", "{}"))
      .await
  });

  manager
    .store_cache(&timeout_ctx(), "b", &conf("b", "memory", "{}"))
    .await
    .unwrap();
  assert!(manager.probe(ResourceCategory::Cache, "b"));
  assert!(!manager.probe(ResourceCategory::Cache, "a"));

  release.notify_one();
  slow.await.unwrap().unwrap();
  assert!(manager.probe(ResourceCategory::Cache, "a"));
}

#[tokio::test]
async fn test_store_respects_context() {
  let mut env = Environment::builtin();
  env.register_cache(ComponentSpec::new("never"), |_ctx| async {
    futures::future::pending::<Result<Arc<dyn Cache>, ComponentError>>().await
  });
  let manager = Manager::new(Arc::new(env));
  let ctx = Context::background().with_timeout(Duration::from_millis(30));
  let err = manager
    .store_cache(&ctx, "c", &conf("c", "never", "{}"))
    .await
    .unwrap_err();
  assert!(matches!(err, ComponentError::Timeout));
  assert!(!manager.probe(ResourceCategory::Cache, "c"));
}

#[tokio::test]
async fn test_cache_processor_requires_cache() {
  let manager = Manager::new(Arc::new(Environment::builtin()));
  let ctx = timeout_ctx();
  let lookup = conf("lookup", "cache", "resource: users\noperator: get\nkey: k\n");
  let err = manager.store_processor(&ctx, "lookup", &lookup).await.unwrap_err();
  assert!(matches!(err, ComponentError::CacheNotFound(ref l) if l == "users"));

  manager
    .store_cache(&ctx, "users", &conf("users", "memory", "init_values:\n  k: hello\n"))
    .await
    .unwrap();
  manager.store_processor(&ctx, "lookup", &lookup).await.unwrap();
  let out = manager
    .process(&ctx, "lookup", Batch::from_payloads(["ignored"]))
    .await
    .unwrap();
  assert_eq!(out.get(0).unwrap().payload().as_ref(), b"hello");
}

#[tokio::test]
async fn test_read_input_follows_replacement() {
  let manager = Manager::new(Arc::new(Environment::builtin()));
  let ctx = timeout_ctx();
  let input = conf("in", "memory_queue", "queue: q");
  manager.store_input(&ctx, "in", &input).await.unwrap();
  let first = manager.get_input("in").unwrap();

  manager.store_input(&ctx, "in", &input).await.unwrap();
  assert!(first.is_closed());

  manager.broker().queue("q").publish(Message::new("after"));
  let txn = manager.read_input(&ctx, "in").await.unwrap();
  assert_eq!(txn.batch.get(0).unwrap().payload().as_ref(), b"after");
  txn.ack.ack(Ok(())).await.unwrap();
  assert_eq!(manager.broker().queue("q").stats().finished, 1);
}

#[tokio::test]
async fn test_write_output_and_close_all() {
  let manager = Manager::new(Arc::new(Environment::builtin()));
  let ctx = timeout_ctx();
  manager
    .store_output(&ctx, "out", &conf("out", "memory", "sink: s"))
    .await
    .unwrap();
  manager
    .write_output(&ctx, "out", Batch::from_payloads(["x", "y"]))
    .await
    .unwrap();
  assert_eq!(manager.broker().sink("s").len(), 2);

  let err = manager
    .write_output(&ctx, "nope", Batch::from_payloads(["x"]))
    .await
    .unwrap_err();
  assert!(matches!(err, ComponentError::OutputNotFound(_)));

  let output = manager.get_output("out").unwrap();
  manager.close_all(&ctx).await;
  assert!(output.is_closed());
  assert!(manager.labels(ResourceCategory::Output).is_empty());
}

#[test]
fn test_weak_manager_does_not_keep_registry_alive() {
  let manager = Manager::new(Arc::new(Environment::new()));
  let weak = manager.downgrade();
  assert!(weak.upgrade().is_some());
  drop(manager);
  assert!(weak.upgrade().is_none());
}
