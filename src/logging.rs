//! Process-level logging setup.
//!
//! weaveflow itself only emits `tracing` events. Embedding applications
//! normally install their own subscriber; [`init`] is a convenience for
//! binaries and tests that want the default `fmt` output.

use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber filtered at `level`.
///
/// `RUST_LOG` directives, when set, are added on top of `level`. Calling this
/// again after a subscriber is installed is a no-op.
///
/// # Returns
///
/// `true` if this call installed the subscriber.
pub fn init(level: tracing::Level) -> bool {
  let filter = EnvFilter::builder()
    .with_default_directive(level.into())
    .from_env_lossy();
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .try_init()
    .is_ok()
}
