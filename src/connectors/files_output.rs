//! `files` output: writes each message to its own file under a directory,
//! in the manner of an object store writer. The object name comes from the
//! `path` template.

use super::interpolate::Template;
use crate::component::{AsyncOutput, LazyConnection};
use crate::context::Context;
use crate::docs::{ComponentSpec, FieldSpec};
use crate::environment::BuildContext;
use crate::error::ComponentError;
use crate::message::Batch;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Options of the `files` output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesOutputConfig {
  /// Root directory. Created on connect.
  pub directory: String,
  /// Object name template, relative to `directory`.
  #[serde(default = "default_path")]
  pub path: String,
  /// Bound on concurrent writes.
  #[serde(default = "default_max_in_flight")]
  pub max_in_flight: usize,
}

fn default_path() -> String {
  "${!count}-${!timestamp_unix_nano}.txt".to_string()
}

fn default_max_in_flight() -> usize {
  64
}

/// Field documentation used by the linter.
pub fn spec() -> ComponentSpec {
  ComponentSpec::new("files")
    .with_summary("Writes each message as a separate file beneath a directory.")
    .with_field(FieldSpec::string("directory", "Directory to write into."))
    .with_field(FieldSpec::string("path", "Interpolated file name, relative to the directory.").optional())
    .with_field(FieldSpec::int("max_in_flight", "Maximum concurrent writes.").optional())
}

/// Builds the output from its options.
pub async fn build(ctx: BuildContext) -> Result<Arc<dyn AsyncOutput>, ComponentError> {
  let config: FilesOutputConfig = ctx.parse_options()?;
  Ok(Arc::new(FilesOutput::new(config)?))
}

/// Output writing one file per message.
#[derive(Debug)]
pub struct FilesOutput {
  config: FilesOutputConfig,
  path: Template,
  conn: LazyConnection<PathBuf>,
}

impl FilesOutput {
  /// Validates the options.
  pub fn new(config: FilesOutputConfig) -> Result<Self, ComponentError> {
    if config.directory.is_empty() {
      return Err(ComponentError::Config("directory must not be empty".to_string()));
    }
    let path = Template::parse(&config.path)?;
    Ok(Self {
      config,
      path,
      conn: LazyConnection::new(),
    })
  }
}

fn object_path(root: &Path, name: &str) -> Result<PathBuf, ComponentError> {
  let rel = Path::new(name);
  let escapes = rel
    .components()
    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
  if name.is_empty() || escapes {
    return Err(ComponentError::Config(format!(
      "object path '{name}' must be relative and stay inside the directory"
    )));
  }
  Ok(root.join(rel))
}

#[async_trait]
impl AsyncOutput for FilesOutput {
  async fn connect(&self, ctx: &Context) -> Result<(), ComponentError> {
    let dir = PathBuf::from(&self.config.directory);
    self
      .conn
      .connect(ctx, || async move {
        tokio::fs::create_dir_all(&dir).await?;
        Ok::<_, ComponentError>(dir)
      })
      .await
      .map(|_| ())
  }

  async fn write_batch(&self, ctx: &Context, batch: &Batch) -> Result<(), ComponentError> {
    let root = self.conn.get().await?;
    for msg in batch {
      let target = object_path(&root, &self.path.render(msg))?;
      let payload = msg.payload().clone();
      ctx
        .run(async {
          if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
          }
          tokio::fs::write(&target, &payload).await?;
          Ok::<_, ComponentError>(())
        })
        .await?;
      debug!(path = %target.display(), "Wrote object");
    }
    Ok(())
  }

  async fn close(&self, _ctx: &Context) -> Result<(), ComponentError> {
    self.conn.close_with(|_| async {}).await;
    Ok(())
  }

  fn max_in_flight(&self) -> Option<usize> {
    Some(self.config.max_in_flight)
  }
}
