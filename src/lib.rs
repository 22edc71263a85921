//! # weaveflow
//!
//! At-least-once stream processing with hot-swappable named resources.
//!
//! weaveflow moves batches of messages from inputs, through processors, to
//! outputs. Every component is registered under a label in a [`Manager`]
//! and can be replaced while streams are running: a resource file is
//! re-read, linted, and its resources are stored again in dependency order.
//!
//! ## Key Features
//!
//! - **At-least-once delivery**: every batch carries an acknowledgement that
//!   finalizes or redelivers it at the origin
//! - **Backpressure**: inputs bound their unacknowledged batches, outputs
//!   bound their concurrent writes
//! - **Hot reconfiguration**: resource files are diffed and re-applied
//!   without restarting streams
//! - **Strict mode**: files with lint findings are rejected before anything
//!   is touched
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weaveflow::config::EngineConfig;
//! use weaveflow::environment::Environment;
//! use weaveflow::lint::SchemaLinter;
//! use weaveflow::manager::Manager;
//! use weaveflow::pipeline::{StreamConfig, StreamHandle};
//! use weaveflow::reconfig::{ResourceReader, ResourceWatcher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_resource_path("./resources/*.yaml");
//! let env = Arc::new(Environment::builtin());
//! let manager = Manager::from_config(Arc::clone(&env), &config);
//!
//! let reader = Arc::new(ResourceReader::new(config.clone(), Arc::new(SchemaLinter::new(env))));
//! reader.load(&manager).await?;
//! let watcher = ResourceWatcher::spawn(Arc::clone(&reader), manager.clone(), config.watch_interval);
//!
//! let stream = StreamHandle::spawn(manager.clone(), StreamConfig::new("in", "out"));
//! // ...
//! stream.stop().await?;
//! watcher.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`Manager`]: manager::Manager

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Component contract: traits, acknowledgements, connections and workers.
pub mod component;
/// Resource file and engine configuration.
pub mod config;
/// Cancellable operation contexts.
pub mod context;
/// Built-in component implementations.
pub mod connectors;
/// Field documentation for component options.
pub mod docs;
/// Registered component implementations.
pub mod environment;
/// Error taxonomy.
pub mod error;
/// Structural checks of resource files.
pub mod lint;
/// Tracing subscriber setup.
pub mod logging;
/// The component registry.
pub mod manager;
/// Messages and batches.
pub mod message;
/// Streams connecting resources by label.
pub mod pipeline;
/// Resource file loading and hot reconfiguration.
pub mod reconfig;
/// Close-once shutdown signal.
pub mod shutdown;

#[cfg(test)]
mod message_test;
