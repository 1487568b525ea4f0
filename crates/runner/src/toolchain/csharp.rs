use std::path::PathBuf;

use async_trait::async_trait;
use box_common::SourceBundle;

use super::compiler::{CompilerExit, run_compiler};
use super::workspace::Workspace;
use super::{BuildOutcome, Toolchain, ToolchainContext, ToolchainError};

const COMPILER: &str = "dotnet";
const PROJECT: &str = "box.csproj";
const OUTPUT_DIR: &str = "output";
const ARTIFACT: &str = "box";

/// `dotnet publish` against a pre-restored project template.
pub struct Csharp {
    compiler: PathBuf,
    workspace: Workspace,
    build_timeout: std::time::Duration,
}

impl Csharp {
    pub fn new(ctx: &ToolchainContext) -> Result<Self, ToolchainError> {
        let compiler = which::which(COMPILER).map_err(|source| ToolchainError::NotInstalled {
            program: COMPILER.to_string(),
            source,
        })?;
        Ok(Self::with_compiler(ctx, compiler))
    }

    pub fn with_compiler(ctx: &ToolchainContext, compiler: PathBuf) -> Self {
        Self {
            compiler,
            workspace: Workspace::new(ctx.workspace_root(), ctx.template("csharp"), true),
            build_timeout: ctx.build_timeout,
        }
    }
}

#[async_trait]
impl Toolchain for Csharp {
    fn language(&self) -> &str {
        "csharp"
    }

    fn workspace(&self) -> &std::path::Path {
        self.workspace.root()
    }

    async fn prep(&self, bundle: &SourceBundle) -> Result<(), ToolchainError> {
        self.workspace.materialize().await?;
        self.workspace.write_sources(bundle).await
    }

    async fn build(&self, bundle: &SourceBundle) -> Result<BuildOutcome, ToolchainError> {
        let artifact = self.workspace.root().join(OUTPUT_DIR).join(ARTIFACT);
        match tokio::fs::remove_file(&artifact).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                self.workspace.remove_sources(bundle).await;
                return Err(ToolchainError::Workspace {
                    path: artifact,
                    source,
                });
            }
        }

        let args = [
            "publish",
            "-o",
            OUTPUT_DIR,
            PROJECT,
            "--no-restore",
            "--nologo",
            "-v",
            "q",
        ];
        let exit = run_compiler(
            &self.compiler,
            args,
            self.workspace.root(),
            self.build_timeout,
        )
        .await;
        self.workspace.remove_sources(bundle).await;

        match exit? {
            CompilerExit::Rejected { diagnostics } => Ok(BuildOutcome::Failed { diagnostics }),
            CompilerExit::Success => {
                let binary = tokio::fs::read(&artifact)
                    .await
                    .map_err(|source| ToolchainError::Artifact {
                        path: artifact.clone(),
                        source,
                    })?;
                Ok(BuildOutcome::Success { binary })
            }
        }
    }

    async fn clean(&self) -> Result<(), ToolchainError> {
        self.workspace.remove().await
    }
}
