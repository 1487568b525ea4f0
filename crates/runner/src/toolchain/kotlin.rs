use std::path::{Path, PathBuf};

use async_trait::async_trait;
use box_common::SourceBundle;

use super::compiler::{CompilerExit, run_compiler};
use super::workspace::Workspace;
use super::{BuildOutcome, Toolchain, ToolchainContext, ToolchainError};

const COMPILER: &str = "kotlinc-native";
const OUTPUT: &str = "Main";
const ARTIFACT: &str = "Main.kexe";

/// Kotlin/Native: every submitted file goes on the command line, anchored
/// at `./` so no name reads as an option.
pub struct Kotlin {
    compiler: PathBuf,
    workspace: Workspace,
    build_timeout: std::time::Duration,
}

impl Kotlin {
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
            workspace: Workspace::new(ctx.workspace_root(), ctx.template("kotlin"), false),
            build_timeout: ctx.build_timeout,
        }
    }
}

#[async_trait]
impl Toolchain for Kotlin {
    fn language(&self) -> &str {
        "kotlin"
    }

    fn workspace(&self) -> &std::path::Path {
        self.workspace.root()
    }

    async fn prep(&self, bundle: &SourceBundle) -> Result<(), ToolchainError> {
        self.workspace.materialize().await?;
        self.workspace.write_sources(bundle).await
    }

    async fn build(&self, bundle: &SourceBundle) -> Result<BuildOutcome, ToolchainError> {
        let mut args = vec!["-nowarn".to_string(), "-o".to_string(), OUTPUT.to_string()];
        args.extend(
            bundle
                .files()
                .map(|f| Path::new(".").join(f.path()).to_string_lossy().into_owned()),
        );

        let artifact = self.workspace.root().join(ARTIFACT);
        // A stale artifact from the previous submission must not pass for this one.
        let _ = tokio::fs::remove_file(&artifact).await;

        let exit = run_compiler(
            &self.compiler,
            &args,
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

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use box_common::SourceFile;

    use super::*;

    /// Records its argv and emits it as the artifact.
    const FAKE_KOTLINC: &str = r#"#!/bin/sh
echo "$@" > Main.kexe
"#;

    #[tokio::test]
    async fn passes_every_file_and_reads_kexe() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("kotlinc-native");
        std::fs::write(&compiler, FAKE_KOTLINC).unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let ctx = ToolchainContext {
            exercise_id: "kt".into(),
            templates_dir: dir.path().join("templates"),
            work_dir: dir.path().join("work"),
            build_timeout: Duration::from_secs(10),
        };
        let kt = Kotlin::with_compiler(&ctx, compiler);
        let bundle = SourceBundle {
            src: vec![SourceFile::new("Main.kt", "fun main() {}")],
            src_test: vec![SourceFile::new("MainTest.kt", "")],
        };

        kt.prep(&bundle).await.unwrap();
        let BuildOutcome::Success { binary } = kt.build(&bundle).await.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(binary, b"-nowarn -o Main ./Main.kt ./MainTest.kt\n");
        assert!(!kt.workspace().join("Main.kt").exists());
    }

    #[tokio::test]
    async fn option_like_names_stay_file_operands() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = dir.path().join("kotlinc-native");
        std::fs::write(&compiler, FAKE_KOTLINC).unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();
        let ctx = ToolchainContext {
            exercise_id: "kt".into(),
            templates_dir: dir.path().join("templates"),
            work_dir: dir.path().join("work"),
            build_timeout: Duration::from_secs(10),
        };
        let kt = Kotlin::with_compiler(&ctx, compiler);
        let bundle = SourceBundle {
            src: vec![SourceFile::new("-Xplugin=evil.jar", "")],
            src_test: vec![],
        };

        kt.prep(&bundle).await.unwrap();
        let BuildOutcome::Success { binary } = kt.build(&bundle).await.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(binary, b"-nowarn -o Main ./-Xplugin=evil.jar\n");
    }
}
