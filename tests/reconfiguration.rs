use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use weaveflow::component::{Cache, ResourceCategory};
use weaveflow::config::{ConfigError, EngineConfig};
use weaveflow::context::Context;
use weaveflow::docs::ComponentSpec;
use weaveflow::environment::Environment;
use weaveflow::error::ComponentError;
use weaveflow::lint::SchemaLinter;
use weaveflow::manager::Manager;
use weaveflow::message::Batch;
use weaveflow::reconfig::{ResourceReader, ResourceWatcher};

struct Harness {
  _dir: TempDir,
  path: PathBuf,
  manager: Manager,
  reader: Arc<ResourceReader>,
}

impl Harness {
  async fn new(initial: &str, strict: bool) -> Self {
    Self::with_env(Environment::builtin(), initial, base_config().with_strict(strict)).await
  }

  async fn with_env(env: Environment, initial: &str, config: EngineConfig) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resources.yaml");
    std::fs::write(&path, initial).unwrap();
    let config = config.with_resource_path(dir.path().join("*.yaml").to_string_lossy());

    let env = Arc::new(env);
    let manager = Manager::from_config(Arc::clone(&env), &config);
    let reader = Arc::new(ResourceReader::new(config, Arc::new(SchemaLinter::new(env))));
    reader.load(&manager).await.unwrap();
    Self {
      _dir: dir,
      path,
      manager,
      reader,
    }
  }

  async fn rewrite(&self, contents: &str) -> bool {
    std::fs::write(&self.path, contents).unwrap();
    self.reader.react_resource_update(&self.manager, &self.path).await
  }

  fn labels(&self, category: ResourceCategory) -> Vec<String> {
    self.manager.labels(category)
  }
}

fn base_config() -> EngineConfig {
  EngineConfig::default()
    .with_close_timeout(Duration::from_secs(2))
    .with_update_timeout(Duration::from_secs(10))
}

const CACHE_AND_LOOKUP: &str = r#"
cache_resources:
  - label: users
    memory:
      init_values:
        alice: admin
processor_resources:
  - label: lookup
    cache:
      resource: users
      operator: get
      key: ${!content}
"#;

#[tokio::test]
async fn test_load_applies_dependencies_first() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  assert_eq!(h.labels(ResourceCategory::Cache), vec!["users"]);
  assert_eq!(h.labels(ResourceCategory::Processor), vec!["lookup"]);

  let out = h
    .manager
    .process(&Context::background(), "lookup", Batch::from_payloads(["alice"]))
    .await
    .unwrap();
  assert_eq!(out.get(0).unwrap().payload().as_ref(), b"admin");

  let snapshot = h.reader.snapshot(&h.path).await.unwrap();
  assert_eq!(snapshot.len(), 2);
  assert_eq!(h.reader.tracked_paths(), vec![h.path.clone()]);
}

/// Environment whose `recorded` cache and processor log each build.
fn recording_env(builds: &Arc<Mutex<Vec<String>>>) -> Environment {
  let mut env = Environment::builtin();
  let log = Arc::clone(builds);
  env.register_cache(ComponentSpec::new("recorded").lenient(), move |ctx| {
    log.lock().unwrap().push(format!("cache:{}", ctx.label));
    async move { weaveflow::connectors::memory_cache::build(ctx).await }
  });
  let log = Arc::clone(builds);
  env.register_processor(ComponentSpec::new("recorded").lenient(), move |ctx| {
    log.lock().unwrap().push(format!("processor:{}", ctx.label));
    async move { weaveflow::connectors::noop_processor::build(ctx).await }
  });
  env
}

#[tokio::test]
async fn test_update_applies_cache_before_processor() {
  let builds = Arc::new(Mutex::new(Vec::new()));
  let h = Harness::with_env(recording_env(&builds), "", base_config()).await;
  assert!(h.reader.snapshot(&h.path).await.unwrap().is_empty());

  let file = "processor_resources:\n  - label: p\n    recorded: {}\ncache_resources:\n  - label: c\n    recorded: {}\n";
  assert!(h.rewrite(file).await);
  assert_eq!(*builds.lock().unwrap(), vec!["cache:c", "processor:p"]);
  assert!(h.manager.probe(ResourceCategory::Cache, "c"));
  assert!(h.manager.probe(ResourceCategory::Processor, "p"));
  assert_eq!(h.reader.snapshot(&h.path).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_revert_after_partial_failure_restores_resources() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  let ctx = Context::background();
  let lookup = h.manager.get_processor("lookup").unwrap();

  let failing = r#"
cache_resources:
  - label: users
    memory:
      init_values:
        alice: guest
processor_resources:
  - label: lookup
    cache:
      resource: ghost
      operator: get
      key: ${!content}
"#;
  assert!(!h.rewrite(failing).await);
  let cache = h.manager.get_cache("users").unwrap();
  assert_eq!(cache.get(&ctx, "alice").await.unwrap(), "guest");

  assert!(h.rewrite(CACHE_AND_LOOKUP).await);
  let cache = h.manager.get_cache("users").unwrap();
  assert_eq!(cache.get(&ctx, "alice").await.unwrap(), "admin");
  assert!(Arc::ptr_eq(&lookup, &h.manager.get_processor("lookup").unwrap()));

  let out = h
    .manager
    .process(&ctx, "lookup", Batch::from_payloads(["alice"]))
    .await
    .unwrap();
  assert_eq!(out.get(0).unwrap().payload().as_ref(), b"admin");
}

#[tokio::test]
async fn test_unknown_path_is_skipped() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  let before = h.reader.snapshot(&h.path).await.unwrap();
  assert!(
    h.reader
      .react_resource_update(&h.manager, Path::new("/not/loaded.yaml"))
      .await
  );
  assert_eq!(h.reader.snapshot(&h.path).await.unwrap(), before);
}

#[tokio::test]
async fn test_strict_mode_rejects_lints() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  let processor = h.manager.get_processor("lookup").unwrap();
  let before = h.reader.snapshot(&h.path).await.unwrap();

  let with_lint = format!("{CACHE_AND_LOOKUP}\nrate_limit_resources:\n  - label: rl\n    local:\n      burst: 4\n");
  assert!(h.rewrite(&with_lint).await);

  assert!(h.labels(ResourceCategory::RateLimit).is_empty());
  assert!(Arc::ptr_eq(&processor, &h.manager.get_processor("lookup").unwrap()));
  assert_eq!(h.reader.snapshot(&h.path).await.unwrap(), before);
}

#[tokio::test]
async fn test_chilled_mode_applies_despite_lints() {
  let h = Harness::new("", false).await;
  let with_lint = "cache_resources:\n  - label: c\n    memory: {}\n    # leftover\nunexpected_key: true\n";
  assert!(h.rewrite(with_lint).await);
  assert!(h.manager.probe(ResourceCategory::Cache, "c"));
}

#[tokio::test]
async fn test_partial_failure_keeps_earlier_categories() {
  let h = Harness::new("", true).await;
  let failing = r#"
rate_limit_resources:
  - label: r
    local: {}
cache_resources:
  - label: c
    memory: {}
processor_resources:
  - label: p
    cache:
      resource: ghost
      operator: get
      key: k
input_resources:
  - label: i
    memory_queue:
      queue: q
output_resources:
  - label: o
    drop: {}
"#;
  assert!(!h.rewrite(failing).await);

  assert!(h.manager.probe(ResourceCategory::RateLimit, "r"));
  assert!(h.manager.probe(ResourceCategory::Cache, "c"));
  assert!(!h.manager.probe(ResourceCategory::Processor, "p"));
  assert!(!h.manager.probe(ResourceCategory::Input, "i"));
  assert!(!h.manager.probe(ResourceCategory::Output, "o"));
  assert!(h.reader.snapshot(&h.path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unchanged_resources_are_not_restarted() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  let cache = h.manager.get_cache("users").unwrap();
  let processor = h.manager.get_processor("lookup").unwrap();

  let edited = CACHE_AND_LOOKUP.replace("key: ${!content}", "key: ${!meta:user}");
  assert!(h.rewrite(&edited).await);

  assert!(Arc::ptr_eq(&cache, &h.manager.get_cache("users").unwrap()));
  assert!(!Arc::ptr_eq(&processor, &h.manager.get_processor("lookup").unwrap()));
}

#[tokio::test]
async fn test_removed_labels_keep_running() {
  let h = Harness::new(CACHE_AND_LOOKUP, true).await;
  let only_cache = "cache_resources:\n  - label: users\n    memory:\n      init_values:\n        alice: admin\n";
  assert!(h.rewrite(only_cache).await);

  assert!(h.manager.probe(ResourceCategory::Processor, "lookup"));
  let snapshot = h.reader.snapshot(&h.path).await.unwrap();
  assert!(snapshot.category(ResourceCategory::Processor).is_empty());
}

#[tokio::test]
async fn test_update_shares_one_timeout() {
  let mut env = Environment::builtin();
  env.register_cache(ComponentSpec::new("slow").lenient(), |ctx| async move {
    tokio::time::sleep(Duration::from_millis(150)).await;
    weaveflow::connectors::memory_cache::build(ctx).await
  });
  let config = base_config().with_update_timeout(Duration::from_millis(250));
  let h = Harness::with_env(env, "", config).await;

  let one = "cache_resources:\n  - label: a\n    slow: {}\n";
  assert!(h.rewrite(one).await);

  let two = "cache_resources:\n  - label: b\n    slow: {}\n  - label: c\n    slow: {}\n";
  assert!(!h.rewrite(two).await);
  assert!(h.manager.probe(ResourceCategory::Cache, "b"));
  assert!(!h.manager.probe(ResourceCategory::Cache, "c"));
}

#[tokio::test]
async fn test_load_rejects_collisions_and_strict_lints() {
  let dir = tempfile::tempdir().unwrap();
  let cache = "cache_resources:\n  - label: shared\n    memory: {}\n";
  std::fs::write(dir.path().join("a.yaml"), cache).unwrap();
  std::fs::write(dir.path().join("b.yaml"), cache).unwrap();

  let env = Arc::new(Environment::builtin());
  let config = base_config().with_resource_path(dir.path().join("*.yaml").to_string_lossy());
  let manager = Manager::from_config(Arc::clone(&env), &config);
  let reader = ResourceReader::new(config, Arc::new(SchemaLinter::new(Arc::clone(&env))));
  let err = reader.load(&manager).await.unwrap_err();
  assert!(matches!(err, ConfigError::LabelCollision { ref label, .. } if label == "shared"));
  assert!(manager.labels(ResourceCategory::Cache).is_empty());

  std::fs::write(dir.path().join("b.yaml"), "cache_resources:\n  - label: other\n    memory:\n      ttl: 1s\n").unwrap();
  let err = reader.load(&manager).await.unwrap_err();
  assert!(matches!(err, ConfigError::LintRejected { count: 1, .. }));
}

#[tokio::test]
async fn test_watcher_reapplies_modified_files() {
  let config = base_config().with_watch_interval(Duration::from_millis(20));
  let h = Harness::with_env(Environment::builtin(), "", config.clone()).await;
  let watcher = ResourceWatcher::spawn(Arc::clone(&h.reader), h.manager.clone(), config.watch_interval);
  tokio::time::sleep(Duration::from_millis(50)).await;

  std::fs::write(&h.path, "cache_resources:\n  - label: late\n    memory: {}\n").unwrap();
  let file = std::fs::File::options().write(true).open(&h.path).unwrap();
  file
    .set_modified(SystemTime::now() + Duration::from_secs(5))
    .unwrap();
  drop(file);

  tokio::time::timeout(Duration::from_secs(5), async {
    while !h.manager.probe(ResourceCategory::Cache, "late") {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();
  watcher.stop().await;
}

#[tokio::test]
async fn test_failed_store_registers_nothing() {
  let h = Harness::new("", true).await;
  let ctx = Context::background();
  let conf = weaveflow::config::ComponentConfig::from_yaml("bad", "memory", "default_ttl: 5m").unwrap();
  let err = h
    .manager
    .store(&ctx, ResourceCategory::Output, &conf)
    .await
    .unwrap_err();
  assert!(matches!(err, ComponentError::Config(_)));
  assert!(!h.manager.probe(ResourceCategory::Output, "bad"));
  assert!(matches!(
    h.manager.get_output("bad"),
    Err(ComponentError::OutputNotFound(_))
  ));
}
