//! Built-in component implementations.
//!
//! | Category | Type | Module |
//! |----------|------|--------|
//! | input | `memory_queue` | [`memory_queue`] |
//! | output | `memory` | [`memory_output`] |
//! | output | `drop` | [`drop_output`] |
//! | output | `files` | [`files_output`] |
//! | processor | `noop` | [`noop_processor`] |
//! | processor | `metadata` | [`metadata_processor`] |
//! | processor | `cache` | [`cache_processor`] |
//! | processor | `rate_limit` | [`rate_limit_processor`] |
//! | cache | `memory` | [`memory_cache`] |
//! | rate_limit | `local` | [`local_rate_limit`] |
//!
//! Each module exposes `spec()` for the linter and `build()` for the
//! [`crate::environment::Environment`].

pub mod cache_processor;
pub mod drop_output;
pub mod files_output;
pub mod interpolate;
pub mod local_rate_limit;
pub mod memory_broker;
pub mod memory_cache;
pub mod memory_output;
pub mod memory_queue;
pub mod metadata_processor;
pub mod noop_processor;
pub mod rate_limit_processor;

pub use memory_broker::{Delivery, MemoryBroker, MemorySink, QueueOrigin, QueueStats};
