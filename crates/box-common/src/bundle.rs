use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    #[error("empty filename")]
    EmptyName,

    #[error("filename must be a relative path inside the workspace: {0}")]
    Escapes(String),

    #[error("duplicate filename: {0}")]
    Duplicate(String),

    #[error("filename component may not start with '-': {0}")]
    LeadingDash(String),
}

/// One named source file. `filename` is always a relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub filename: String,
    #[serde(alias = "src")]
    pub source: String,
}

impl SourceFile {
    pub fn new(filename: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: source.into(),
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.filename)
    }
}

/// Submission sources plus the test sources run against them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    pub src: Vec<SourceFile>,
    #[serde(default)]
    pub src_test: Vec<SourceFile>,
}

impl SourceBundle {
    /// Sources first, then tests, each in submission order.
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.src.iter().chain(self.src_test.iter())
    }

    /// Reject names that are empty, absolute, climb out of the workspace,
    /// read as a command-line option, or name the same path as another
    /// file in the bundle.
    pub fn validate(&self) -> Result<(), BundleError> {
        let mut seen = HashSet::new();
        for file in self.files() {
            let normalized = normalize(&file.filename)?;
            if !seen.insert(normalized) {
                return Err(BundleError::Duplicate(file.filename.clone()));
            }
        }
        Ok(())
    }
}

/// The name's `Normal` components, so `./a//b` and `a/b` compare equal.
fn normalize(name: &str) -> Result<PathBuf, BundleError> {
    if name.is_empty() {
        return Err(BundleError::EmptyName);
    }
    if name.contains('\0') {
        return Err(BundleError::Escapes(name.escape_default().to_string()));
    }
    let mut normalized = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                if part.as_encoded_bytes().starts_with(b"-") {
                    return Err(BundleError::LeadingDash(name.to_string()));
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::Escapes(name.to_string()));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(BundleError::Escapes(name.to_string()));
    }
    Ok(normalized)
}
