//! # Environment
//!
//! The set of component implementations available to a [`crate::manager::Manager`].
//!
//! An implementation is registered under a category and a type name
//! together with its [`ComponentSpec`] and an async constructor. The
//! constructor receives a [`BuildContext`] carrying the resource label, the
//! raw options and a handle to the manager, so that a component can check
//! for the resources it references while it is being built.
//!
//! ```rust
//! use weaveflow::environment::Environment;
//! use weaveflow::component::ResourceCategory;
//!
//! let env = Environment::builtin();
//! assert!(env.spec(ResourceCategory::Cache, "memory").is_some());
//! assert!(env.spec(ResourceCategory::Cache, "redis").is_none());
//! ```

use crate::component::{AsyncInput, AsyncOutput, Cache, Processor, RateLimit, ResourceCategory};
use crate::connectors;
use crate::docs::ComponentSpec;
use crate::error::ComponentError;
use crate::manager::Manager;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Everything a constructor gets to build one component.
#[derive(Debug, Clone)]
pub struct BuildContext {
  /// Label the component will be registered under.
  pub label: String,
  /// Raw options of the implementation.
  pub options: serde_yaml::Value,
  /// The manager the component is being built for.
  pub manager: Manager,
}

impl BuildContext {
  /// Creates a build context.
  pub fn new(label: impl Into<String>, options: serde_yaml::Value, manager: Manager) -> Self {
    Self {
      label: label.into(),
      options,
      manager,
    }
  }

  /// Deserializes the options. Missing options parse as an empty mapping.
  pub fn parse_options<T: DeserializeOwned>(&self) -> Result<T, ComponentError> {
    let options = match &self.options {
      serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
      other => other.clone(),
    };
    serde_yaml::from_value(options)
      .map_err(|e| ComponentError::Config(format!("resource '{}': {e}", self.label)))
  }
}

type Constructor<T> =
  Arc<dyn Fn(BuildContext) -> BoxFuture<'static, Result<Arc<T>, ComponentError>> + Send + Sync>;

struct Registration<T: ?Sized> {
  spec: ComponentSpec,
  constructor: Constructor<T>,
}

struct Registry<T: ?Sized> {
  category: ResourceCategory,
  entries: BTreeMap<String, Registration<T>>,
}

impl<T: ?Sized + 'static> Registry<T> {
  fn new(category: ResourceCategory) -> Self {
    Self {
      category,
      entries: BTreeMap::new(),
    }
  }

  fn register<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<T>, ComponentError>> + Send + 'static,
  {
    let constructor: Constructor<T> = Arc::new(move |ctx| Box::pin(constructor(ctx)));
    self
      .entries
      .insert(spec.name.clone(), Registration { spec, constructor });
  }

  async fn build(&self, type_name: &str, ctx: BuildContext) -> Result<Arc<T>, ComponentError> {
    let registration = self
      .entries
      .get(type_name)
      .ok_or_else(|| ComponentError::invalid_type(self.category.as_str(), type_name))?;
    (registration.constructor)(ctx).await
  }

  fn spec(&self, type_name: &str) -> Option<&ComponentSpec> {
    self.entries.get(type_name).map(|r| &r.spec)
  }

  fn names(&self) -> Vec<&str> {
    self.entries.keys().map(String::as_str).collect()
  }
}

/// Registered component implementations, per category.
pub struct Environment {
  inputs: Registry<dyn AsyncInput>,
  outputs: Registry<dyn AsyncOutput>,
  processors: Registry<dyn Processor>,
  caches: Registry<dyn Cache>,
  rate_limits: Registry<dyn RateLimit>,
}

impl std::fmt::Debug for Environment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Environment")
      .field("inputs", &self.inputs.names())
      .field("outputs", &self.outputs.names())
      .field("processors", &self.processors.names())
      .field("caches", &self.caches.names())
      .field("rate_limits", &self.rate_limits.names())
      .finish()
  }
}

impl Default for Environment {
  fn default() -> Self {
    Self::builtin()
  }
}

impl Environment {
  /// An environment with nothing registered.
  pub fn new() -> Self {
    Self {
      inputs: Registry::new(ResourceCategory::Input),
      outputs: Registry::new(ResourceCategory::Output),
      processors: Registry::new(ResourceCategory::Processor),
      caches: Registry::new(ResourceCategory::Cache),
      rate_limits: Registry::new(ResourceCategory::RateLimit),
    }
  }

  /// An environment with every implementation in [`crate::connectors`].
  pub fn builtin() -> Self {
    let mut env = Self::new();
    env.register_input(connectors::memory_queue::spec(), connectors::memory_queue::build);

    env.register_output(connectors::memory_output::spec(), connectors::memory_output::build);
    env.register_output(connectors::drop_output::spec(), connectors::drop_output::build);
    env.register_output(connectors::files_output::spec(), connectors::files_output::build);

    env.register_processor(connectors::noop_processor::spec(), connectors::noop_processor::build);
    env.register_processor(
      connectors::metadata_processor::spec(),
      connectors::metadata_processor::build,
    );
    env.register_processor(connectors::cache_processor::spec(), connectors::cache_processor::build);
    env.register_processor(
      connectors::rate_limit_processor::spec(),
      connectors::rate_limit_processor::build,
    );

    env.register_cache(connectors::memory_cache::spec(), connectors::memory_cache::build);
    env.register_rate_limit(
      connectors::local_rate_limit::spec(),
      connectors::local_rate_limit::build,
    );
    env
  }

  /// Registers an input implementation, replacing any with the same name.
  pub fn register_input<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn AsyncInput>, ComponentError>> + Send + 'static,
  {
    self.inputs.register(spec, constructor);
  }

  /// Registers an output implementation.
  pub fn register_output<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn AsyncOutput>, ComponentError>> + Send + 'static,
  {
    self.outputs.register(spec, constructor);
  }

  /// Registers a processor implementation.
  pub fn register_processor<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Processor>, ComponentError>> + Send + 'static,
  {
    self.processors.register(spec, constructor);
  }

  /// Registers a cache implementation.
  pub fn register_cache<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Cache>, ComponentError>> + Send + 'static,
  {
    self.caches.register(spec, constructor);
  }

  /// Registers a rate limit implementation.
  pub fn register_rate_limit<F, Fut>(&mut self, spec: ComponentSpec, constructor: F)
  where
    F: Fn(BuildContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn RateLimit>, ComponentError>> + Send + 'static,
  {
    self.rate_limits.register(spec, constructor);
  }

  /// Builds an input of implementation `type_name`.
  pub async fn build_input(
    &self,
    type_name: &str,
    ctx: BuildContext,
  ) -> Result<Arc<dyn AsyncInput>, ComponentError> {
    self.inputs.build(type_name, ctx).await
  }

  /// Builds an output of implementation `type_name`.
  pub async fn build_output(
    &self,
    type_name: &str,
    ctx: BuildContext,
  ) -> Result<Arc<dyn AsyncOutput>, ComponentError> {
    self.outputs.build(type_name, ctx).await
  }

  /// Builds a processor of implementation `type_name`.
  pub async fn build_processor(
    &self,
    type_name: &str,
    ctx: BuildContext,
  ) -> Result<Arc<dyn Processor>, ComponentError> {
    self.processors.build(type_name, ctx).await
  }

  /// Builds a cache of implementation `type_name`.
  pub async fn build_cache(
    &self,
    type_name: &str,
    ctx: BuildContext,
  ) -> Result<Arc<dyn Cache>, ComponentError> {
    self.caches.build(type_name, ctx).await
  }

  /// Builds a rate limit of implementation `type_name`.
  pub async fn build_rate_limit(
    &self,
    type_name: &str,
    ctx: BuildContext,
  ) -> Result<Arc<dyn RateLimit>, ComponentError> {
    self.rate_limits.build(type_name, ctx).await
  }

  /// Documentation of an implementation, if registered.
  pub fn spec(&self, category: ResourceCategory, type_name: &str) -> Option<&ComponentSpec> {
    match category {
      ResourceCategory::Input => self.inputs.spec(type_name),
      ResourceCategory::Output => self.outputs.spec(type_name),
      ResourceCategory::Processor => self.processors.spec(type_name),
      ResourceCategory::Cache => self.caches.spec(type_name),
      ResourceCategory::RateLimit => self.rate_limits.spec(type_name),
    }
  }

  /// Registered implementation names of a category, sorted.
  pub fn names(&self, category: ResourceCategory) -> Vec<&str> {
    match category {
      ResourceCategory::Input => self.inputs.names(),
      ResourceCategory::Output => self.outputs.names(),
      ResourceCategory::Processor => self.processors.names(),
      ResourceCategory::Cache => self.caches.names(),
      ResourceCategory::RateLimit => self.rate_limits.names(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::docs::FieldSpec;
  use serde::Deserialize;

  #[test]
  fn test_builtin_names() {
    let env = Environment::builtin();
    assert_eq!(env.names(ResourceCategory::Input), vec!["memory_queue"]);
    assert_eq!(
      env.names(ResourceCategory::Processor),
      vec!["cache", "metadata", "noop", "rate_limit"]
    );
    assert_eq!(env.names(ResourceCategory::RateLimit), vec!["local"]);
  }

  #[tokio::test]
  async fn test_unknown_type_is_rejected() {
    let env = Arc::new(Environment::new());
    let manager = Manager::new(Arc::clone(&env));
    let err = env
      .build_cache("redis", BuildContext::new("c", serde_yaml::Value::Null, manager))
      .await
      .err().unwrap();
    assert_eq!(err.to_string(), "cache type of 'redis' was not recognised");
  }

  #[derive(Debug, Deserialize)]
  struct Options {
    #[serde(default)]
    size: u32,
  }

  #[test]
  fn test_parse_options_null_is_empty() {
    let manager = Manager::new(Arc::new(Environment::new()));
    let ctx = BuildContext::new("x", serde_yaml::Value::Null, manager.clone());
    let opts: Options = ctx.parse_options().unwrap();
    assert_eq!(opts.size, 0);

    let ctx = BuildContext::new("x", serde_yaml::from_str("size: nope").unwrap(), manager);
    let err = ctx.parse_options::<Options>().unwrap_err();
    assert!(matches!(err, ComponentError::Config(_)));
  }

  #[tokio::test]
  async fn test_custom_registration() {
    let mut env = Environment::new();
    env.register_processor(
      ComponentSpec::new("custom").with_field(FieldSpec::int("size", "a size").optional()),
      connectors::noop_processor::build,
    );
    let env = Arc::new(env);
    assert!(env.spec(ResourceCategory::Processor, "custom").is_some());
    let manager = Manager::new(Arc::clone(&env));
    env
      .build_processor("custom", BuildContext::new("p", serde_yaml::Value::Null, manager))
      .await
      .unwrap();
  }
}
