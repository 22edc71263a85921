//! # Registry
//!
//! The process-wide mapping from (category, label) to live components.
//!
//! ## Overview
//!
//! A [`Manager`] holds one slot table per [`ResourceCategory`]. Each label
//! gets its own slot with its own store lock, so stores to different labels
//! never wait on each other, and readers never wait on stores at all.
//!
//! `store_*` builds a component from its [`ComponentConfig`], swaps it into
//! the slot and then retires the previous occupant. Inputs and outputs are
//! started on their own [`InputWorker`] / [`OutputWorker`]. If building
//! fails the previous occupant is left untouched. Every step is bounded by
//! the supplied [`Context`].
//!
//! Consumers address components by label (`read_input`, `write_output`,
//! `process`, `access_cache`, `access_rate_limit`), so a replaced component
//! is picked up on the next call without re-wiring anything.

mod slots;

use crate::component::{
  Cache, InputWorker, OutputWorker, Processor, RateLimit, ResourceCategory, Transaction,
  WorkerConfig,
};
use crate::config::{ComponentConfig, EngineConfig};
use crate::connectors::MemoryBroker;
use crate::context::Context;
use crate::environment::{BuildContext, Environment};
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use futures::future::join_all;
use slots::SlotTable;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Options for a [`Manager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
  /// Settings of spawned input and output workers.
  pub worker: WorkerConfig,
  /// Broker shared by the in-process connectors.
  pub broker: MemoryBroker,
}

impl ManagerOptions {
  /// Sets the worker settings.
  pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
    self.worker = worker;
    self
  }

  /// Sets the broker.
  pub fn with_broker(mut self, broker: MemoryBroker) -> Self {
    self.broker = broker;
    self
  }
}

struct ManagerInner {
  env: Arc<Environment>,
  broker: MemoryBroker,
  worker: WorkerConfig,
  inputs: SlotTable<InputWorker>,
  outputs: SlotTable<OutputWorker>,
  processors: SlotTable<dyn Processor>,
  caches: SlotTable<dyn Cache>,
  rate_limits: SlotTable<dyn RateLimit>,
}

/// The component registry. Cloning shares it.
#[derive(Clone)]
pub struct Manager {
  inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for Manager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Manager")
      .field("inputs", &self.inner.inputs.labels())
      .field("outputs", &self.inner.outputs.labels())
      .field("processors", &self.inner.processors.labels())
      .field("caches", &self.inner.caches.labels())
      .field("rate_limits", &self.inner.rate_limits.labels())
      .finish()
  }
}

/// A non-owning handle to a [`Manager`].
///
/// Components that call back into the registry hold this instead of a
/// [`Manager`] so the registry does not keep itself alive.
#[derive(Debug, Clone)]
pub struct WeakManager {
  inner: Weak<ManagerInner>,
}

impl WeakManager {
  /// The manager, if it still exists.
  pub fn upgrade(&self) -> Option<Manager> {
    self.inner.upgrade().map(|inner| Manager { inner })
  }
}

/// Closing a component that is leaving the registry.
#[async_trait]
trait Retire: Send + Sync {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError>;
}

#[async_trait]
impl Retire for InputWorker {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError> {
    self.trigger_close();
    self.wait_for_close(ctx).await
  }
}

#[async_trait]
impl Retire for OutputWorker {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError> {
    self.trigger_close();
    self.wait_for_close(ctx).await
  }
}

#[async_trait]
impl Retire for dyn Processor {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError> {
    ctx.run(self.close(ctx)).await
  }
}

#[async_trait]
impl Retire for dyn Cache {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError> {
    ctx.run(self.close(ctx)).await
  }
}

#[async_trait]
impl Retire for dyn RateLimit {
  async fn retire(&self, ctx: &Context) -> Result<(), ComponentError> {
    ctx.run(self.close(ctx)).await
  }
}

impl Manager {
  /// Creates an empty registry with default options.
  pub fn new(env: Arc<Environment>) -> Self {
    Self::with_options(env, ManagerOptions::default())
  }

  /// Creates an empty registry.
  pub fn with_options(env: Arc<Environment>, options: ManagerOptions) -> Self {
    Self {
      inner: Arc::new(ManagerInner {
        env,
        broker: options.broker,
        worker: options.worker,
        inputs: SlotTable::default(),
        outputs: SlotTable::default(),
        processors: SlotTable::default(),
        caches: SlotTable::default(),
        rate_limits: SlotTable::default(),
      }),
    }
  }

  /// Creates an empty registry using the worker settings of `config`.
  pub fn from_config(env: Arc<Environment>, config: &EngineConfig) -> Self {
    Self::with_options(
      env,
      ManagerOptions::default().with_worker(WorkerConfig::from(config)),
    )
  }

  /// The implementations components are built from.
  pub fn environment(&self) -> &Arc<Environment> {
    &self.inner.env
  }

  /// Broker shared by the in-process connectors.
  pub fn broker(&self) -> &MemoryBroker {
    &self.inner.broker
  }

  /// A non-owning handle.
  pub fn downgrade(&self) -> WeakManager {
    WeakManager {
      inner: Arc::downgrade(&self.inner),
    }
  }

  fn build_context(&self, label: &str, options: &serde_yaml::Value) -> BuildContext {
    BuildContext::new(label, options.clone(), self.clone())
  }

  async fn install<T, F>(
    &self,
    ctx: &Context,
    category: ResourceCategory,
    table: &SlotTable<T>,
    label: &str,
    build: F,
  ) -> Result<(), ComponentError>
  where
    T: ?Sized + Retire,
    F: Future<Output = Result<Arc<T>, ComponentError>>,
  {
    let slot = table.slot(label);
    let _guard = ctx
      .run(async { Ok::<_, ComponentError>(slot.store_lock.lock().await) })
      .await?;
    let next = ctx.run(build).await?;

    match slot.swap(next) {
      Some(previous) => {
        debug!(category = %category, label = %label, "Retiring previous resource");
        if let Err(e) = previous.retire(ctx).await {
          warn!(
            category = %category,
            label = %label,
            error = %e,
            "Previous resource did not close cleanly"
          );
        }
      }
      None => debug!(category = %category, label = %label, "Registered new resource"),
    }
    Ok(())
  }

  /// Builds an input from `conf`, starts it and stores it under `label`.
  pub async fn store_input(
    &self,
    ctx: &Context,
    label: &str,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let (type_name, options) = conf.plugin()?;
    let build_ctx = self.build_context(label, options);
    let worker = self.inner.worker;
    let build = async {
      let input = self.inner.env.build_input(type_name, build_ctx).await?;
      Ok::<_, ComponentError>(Arc::new(InputWorker::spawn(label, input, worker)))
    };
    self
      .install(ctx, ResourceCategory::Input, &self.inner.inputs, label, build)
      .await
  }

  /// Builds an output from `conf`, starts it and stores it under `label`.
  pub async fn store_output(
    &self,
    ctx: &Context,
    label: &str,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let (type_name, options) = conf.plugin()?;
    let build_ctx = self.build_context(label, options);
    let worker = self.inner.worker;
    let build = async {
      let output = self.inner.env.build_output(type_name, build_ctx).await?;
      Ok::<_, ComponentError>(Arc::new(OutputWorker::spawn(label, output, worker)))
    };
    self
      .install(ctx, ResourceCategory::Output, &self.inner.outputs, label, build)
      .await
  }

  /// Builds a processor from `conf` and stores it under `label`.
  pub async fn store_processor(
    &self,
    ctx: &Context,
    label: &str,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let (type_name, options) = conf.plugin()?;
    let build = self
      .inner
      .env
      .build_processor(type_name, self.build_context(label, options));
    self
      .install(ctx, ResourceCategory::Processor, &self.inner.processors, label, build)
      .await
  }

  /// Builds a cache from `conf` and stores it under `label`.
  pub async fn store_cache(
    &self,
    ctx: &Context,
    label: &str,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let (type_name, options) = conf.plugin()?;
    let build = self
      .inner
      .env
      .build_cache(type_name, self.build_context(label, options));
    self
      .install(ctx, ResourceCategory::Cache, &self.inner.caches, label, build)
      .await
  }

  /// Builds a rate limit from `conf` and stores it under `label`.
  pub async fn store_rate_limit(
    &self,
    ctx: &Context,
    label: &str,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let (type_name, options) = conf.plugin()?;
    let build = self
      .inner
      .env
      .build_rate_limit(type_name, self.build_context(label, options));
    self
      .install(ctx, ResourceCategory::RateLimit, &self.inner.rate_limits, label, build)
      .await
  }

  /// Stores `conf` under its own label in `category`.
  pub async fn store(
    &self,
    ctx: &Context,
    category: ResourceCategory,
    conf: &ComponentConfig,
  ) -> Result<(), ComponentError> {
    let label = conf.label.as_str();
    match category {
      ResourceCategory::RateLimit => self.store_rate_limit(ctx, label, conf).await,
      ResourceCategory::Cache => self.store_cache(ctx, label, conf).await,
      ResourceCategory::Processor => self.store_processor(ctx, label, conf).await,
      ResourceCategory::Input => self.store_input(ctx, label, conf).await,
      ResourceCategory::Output => self.store_output(ctx, label, conf).await,
    }
  }

  /// True if `label` is registered in `category`.
  pub fn probe(&self, category: ResourceCategory, label: &str) -> bool {
    match category {
      ResourceCategory::RateLimit => self.inner.rate_limits.contains(label),
      ResourceCategory::Cache => self.inner.caches.contains(label),
      ResourceCategory::Processor => self.inner.processors.contains(label),
      ResourceCategory::Input => self.inner.inputs.contains(label),
      ResourceCategory::Output => self.inner.outputs.contains(label),
    }
  }

  /// Registered labels of `category`, sorted.
  pub fn labels(&self, category: ResourceCategory) -> Vec<String> {
    match category {
      ResourceCategory::RateLimit => self.inner.rate_limits.labels(),
      ResourceCategory::Cache => self.inner.caches.labels(),
      ResourceCategory::Processor => self.inner.processors.labels(),
      ResourceCategory::Input => self.inner.inputs.labels(),
      ResourceCategory::Output => self.inner.outputs.labels(),
    }
  }

  /// The input worker under `label`.
  pub fn get_input(&self, label: &str) -> Result<Arc<InputWorker>, ComponentError> {
    self
      .inner
      .inputs
      .get(label)
      .ok_or_else(|| ResourceCategory::Input.not_found(label))
  }

  /// The output worker under `label`.
  pub fn get_output(&self, label: &str) -> Result<Arc<OutputWorker>, ComponentError> {
    self
      .inner
      .outputs
      .get(label)
      .ok_or_else(|| ResourceCategory::Output.not_found(label))
  }

  /// The processor under `label`.
  pub fn get_processor(&self, label: &str) -> Result<Arc<dyn Processor>, ComponentError> {
    self
      .inner
      .processors
      .get(label)
      .ok_or_else(|| ResourceCategory::Processor.not_found(label))
  }

  /// The cache under `label`.
  pub fn get_cache(&self, label: &str) -> Result<Arc<dyn Cache>, ComponentError> {
    self
      .inner
      .caches
      .get(label)
      .ok_or_else(|| ResourceCategory::Cache.not_found(label))
  }

  /// The rate limit under `label`.
  pub fn get_rate_limit(&self, label: &str) -> Result<Arc<dyn RateLimit>, ComponentError> {
    self
      .inner
      .rate_limits
      .get(label)
      .ok_or_else(|| ResourceCategory::RateLimit.not_found(label))
  }

  /// Reads the next transaction from the input under `label`.
  ///
  /// If that input is closed because it was replaced, reading moves on to
  /// the replacement.
  pub async fn read_input(&self, ctx: &Context, label: &str) -> Result<Transaction, ComponentError> {
    let mut worker = self.get_input(label)?;
    loop {
      match worker.next_transaction(ctx).await {
        Err(ComponentError::TypeClosed) => {
          let current = self.get_input(label)?;
          if Arc::ptr_eq(&current, &worker) {
            return Err(ComponentError::TypeClosed);
          }
          worker = current;
        }
        res => return res,
      }
    }
  }

  /// Writes `batch` through the output under `label` and waits for the
  /// outcome.
  ///
  /// A write rejected because the output was replaced is retried against
  /// the replacement.
  pub async fn write_output(
    &self,
    ctx: &Context,
    label: &str,
    batch: Batch,
  ) -> Result<(), ComponentError> {
    let mut worker = self.get_output(label)?;
    loop {
      match worker.write(ctx, batch.clone()).await {
        Err(ComponentError::TypeClosed) => {
          let current = self.get_output(label)?;
          if Arc::ptr_eq(&current, &worker) {
            return Err(ComponentError::TypeClosed);
          }
          worker = current;
        }
        res => return res,
      }
    }
  }

  /// Runs `batch` through the processor under `label`.
  pub async fn process(
    &self,
    ctx: &Context,
    label: &str,
    batch: Batch,
  ) -> Result<Batch, ComponentError> {
    let processor = self.get_processor(label)?;
    processor.process_batch(ctx, batch).await
  }

  /// Calls `f` with the cache under `label`.
  pub async fn access_cache<F, Fut, T>(
    &self,
    ctx: &Context,
    label: &str,
    f: F,
  ) -> Result<T, ComponentError>
  where
    F: FnOnce(Arc<dyn Cache>) -> Fut,
    Fut: Future<Output = Result<T, ComponentError>>,
  {
    let cache = self.get_cache(label)?;
    ctx.run(f(cache)).await
  }

  /// Asks the rate limit under `label` for access. `Duration::ZERO` means
  /// granted, anything else is how long to wait before asking again.
  pub async fn access_rate_limit(
    &self,
    ctx: &Context,
    label: &str,
  ) -> Result<Duration, ComponentError> {
    let rate_limit = self.get_rate_limit(label)?;
    ctx.run(rate_limit.access(ctx)).await
  }

  /// Closes every registered component: inputs first, then processors,
  /// outputs, caches and rate limits.
  ///
  /// Components that fail to close within `ctx` are logged and skipped.
  pub async fn close_all(&self, ctx: &Context) {
    let inputs = self.inner.inputs.drain();
    for (_, input) in &inputs {
      input.trigger_close();
    }
    retire_all(ctx, ResourceCategory::Input, inputs).await;
    retire_all(ctx, ResourceCategory::Processor, self.inner.processors.drain()).await;

    let outputs = self.inner.outputs.drain();
    for (_, output) in &outputs {
      output.trigger_close();
    }
    retire_all(ctx, ResourceCategory::Output, outputs).await;
    retire_all(ctx, ResourceCategory::Cache, self.inner.caches.drain()).await;
    retire_all(ctx, ResourceCategory::RateLimit, self.inner.rate_limits.drain()).await;
    info!("All resources closed");
  }
}

async fn retire_all<T: ?Sized + Retire>(
  ctx: &Context,
  category: ResourceCategory,
  resources: Vec<(String, Arc<T>)>,
) {
  let results = join_all(resources.iter().map(|(_, r)| r.retire(ctx))).await;
  for ((label, _), res) in resources.iter().zip(results) {
    if let Err(e) = res {
      warn!(category = %category, label = %label, error = %e, "Failed to close resource");
    }
  }
}

#[cfg(test)]
mod manager_test;
