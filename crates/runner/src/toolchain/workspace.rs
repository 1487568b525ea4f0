//! Per-exercise build directory shared by every toolchain variant.

use std::path::{Path, PathBuf};

use box_common::SourceBundle;
use tracing::{debug, warn};

use super::ToolchainError;

pub(crate) struct Workspace {
    root: PathBuf,
    template: PathBuf,
    template_required: bool,
}

impl Workspace {
    /// `root` is unique per toolchain instance so a workspace being cleaned
    /// after eviction is never one a fresh instance is using.
    pub(crate) fn new(root: PathBuf, template: PathBuf, template_required: bool) -> Self {
        Self {
            root,
            template,
            template_required,
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    fn err(&self, path: &Path) -> impl Fn(std::io::Error) -> ToolchainError {
        let path = path.to_path_buf();
        move |source| ToolchainError::Workspace {
            path: path.clone(),
            source,
        }
    }

    /// Create the workspace from the template, once.
    pub(crate) async fn materialize(&self) -> Result<(), ToolchainError> {
        let exists = tokio::fs::try_exists(&self.root)
            .await
            .map_err(self.err(&self.root))?;
        if exists {
            return Ok(());
        }

        let has_template = tokio::fs::try_exists(&self.template)
            .await
            .map_err(self.err(&self.template))?;
        if !has_template && self.template_required {
            return Err(ToolchainError::MissingTemplate {
                path: self.template.clone(),
            });
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(self.err(&self.root))?;
        if has_template {
            copy_tree(&self.template, &self.root).await?;
            debug!(template = %self.template.display(), workspace = %self.root.display(), "template copied");
        }
        Ok(())
    }

    /// Write every submission file, replacing any left by an earlier submission.
    /// Nothing is written if any name would shadow a template entry.
    pub(crate) async fn write_sources(&self, bundle: &SourceBundle) -> Result<(), ToolchainError> {
        for file in bundle.files() {
            self.check_not_template(file.path()).await?;
        }
        for file in bundle.files() {
            let path = self.root.join(file.path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(self.err(parent))?;
            }
            tokio::fs::write(&path, file.source.as_bytes())
                .await
                .map_err(self.err(&path))?;
        }
        Ok(())
    }

    /// Template files survive across builds, so a submission may neither
    /// replace one nor nest a file beneath one.
    async fn check_not_template(&self, relative: &Path) -> Result<(), ToolchainError> {
        let mut prefix = self.template.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            prefix.push(component);
            let meta = match tokio::fs::symlink_metadata(&prefix).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(self.err(&prefix)(e)),
            };
            if components.peek().is_none() || !meta.is_dir() {
                return Err(ToolchainError::Reserved {
                    path: relative.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    /// Remove the submission's files, leaving template and build caches.
    pub(crate) async fn remove_sources(&self, bundle: &SourceBundle) {
        for file in bundle.files() {
            let path = self.root.join(file.path());
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "source cleanup failed"),
            }
        }
    }

    pub(crate) async fn remove(&self) -> Result<(), ToolchainError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.err(&self.root)(e)),
        }
    }
}

/// Recursive copy of a directory tree; symlinks are not followed.
async fn copy_tree(from: &Path, to: &Path) -> Result<(), ToolchainError> {
    let err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ToolchainError::Workspace { path, source }
    };

    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&src).await.map_err(err(&src))?;
        while let Some(entry) = entries.next_entry().await.map_err(err(&src))? {
            let target = dst.join(entry.file_name());
            let kind = entry.file_type().await.map_err(err(&entry.path()))?;
            if kind.is_dir() {
                tokio::fs::create_dir_all(&target).await.map_err(err(&target))?;
                pending.push((entry.path(), target));
            } else if kind.is_file() {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(err(&target))?;
            }
        }
    }
    Ok(())
}
