//! Build step for compiled submission types.

mod compiler;
mod csharp;
mod error;
mod kotlin;
mod workspace;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use box_common::SourceBundle;

pub use csharp::Csharp;
pub use error::ToolchainError;
pub use kotlin::Kotlin;

/// Result of a build that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Success { binary: Vec<u8> },
    /// The submission does not compile; `diagnostics` is the compiler output.
    Failed { diagnostics: String },
}

/// One language's Prep/Build/Clean over a per-exercise workspace.
///
/// Callers serialize `prep` and `build` on the same instance; `clean` runs
/// only after the instance has left the cache.
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn language(&self) -> &str;
    fn workspace(&self) -> &Path;
    /// Materialize the workspace (template copied once) and write the bundle.
    async fn prep(&self, bundle: &SourceBundle) -> Result<(), ToolchainError>;
    /// Compile, then delete the bundle's files from the workspace.
    async fn build(&self, bundle: &SourceBundle) -> Result<BuildOutcome, ToolchainError>;
    /// Remove the whole workspace.
    async fn clean(&self) -> Result<(), ToolchainError>;
}

/// What a toolchain needs to know about where it lives.
#[derive(Debug, Clone)]
pub struct ToolchainContext {
    pub exercise_id: String,
    pub templates_dir: PathBuf,
    pub work_dir: PathBuf,
    pub build_timeout: Duration,
}

impl ToolchainContext {
    /// Fresh directory per instance: `<work_dir>/<exercise_id>-<suffix>`.
    pub(crate) fn workspace_root(&self) -> PathBuf {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let suffix = suffix.get(..8).unwrap_or(&suffix);
        self.work_dir.join(format!("{}-{suffix}", self.exercise_id))
    }

    pub(crate) fn template(&self, language: &str) -> PathBuf {
        self.templates_dir.join(language)
    }
}

pub type ToolchainFactory =
    Arc<dyn Fn(&ToolchainContext) -> Result<Arc<dyn Toolchain>, ToolchainError> + Send + Sync>;

/// Submission type -> toolchain constructor. A type with an entry is
/// compiled; every other supported type is interpreted.
#[derive(Clone, Default)]
pub struct ToolchainRegistry {
    factories: HashMap<String, ToolchainFactory>,
}

impl ToolchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// csharp and kotlin, resolved on `PATH` when first used.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("csharp", |ctx| Ok(Arc::new(Csharp::new(ctx)?)));
        registry.register("kotlin", |ctx| Ok(Arc::new(Kotlin::new(ctx)?)));
        registry
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ToolchainContext) -> Result<Arc<dyn Toolchain>, ToolchainError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn is_compiled(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// `None` when `kind` is not a compiled type.
    pub fn create(
        &self,
        kind: &str,
        ctx: &ToolchainContext,
    ) -> Option<Result<Arc<dyn Toolchain>, ToolchainError>> {
        self.factories.get(kind).map(|factory| factory(ctx))
    }
}
