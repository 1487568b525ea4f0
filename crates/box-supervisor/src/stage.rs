//! Staging: move the payload from stdin onto the local filesystem.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use box_common::{SourceBundle, log_info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::cli::Args;
use crate::error::SetupError;

const LOG_TAG: &str = box_common::log::SUPERVISOR_TAG;

/// Upper bound on a payload read from stdin.
pub const MAX_PAYLOAD: u64 = 256 * 1024 * 1024;
/// Read buffer size for streaming stdin to disk.
const CHUNK: usize = 4 * 1024 * 1024;

/// What to execute once staging is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Stdin was consumed by staging; the child gets none.
    pub stdin_consumed: bool,
    pub staged_bytes: u64,
}

pub async fn prepare(args: &Args) -> Result<Plan, SetupError> {
    let mut stdin = tokio::io::stdin();

    if let Some(target) = &args.stage_binary {
        let staged_bytes = stage_binary(&mut stdin, target, MAX_PAYLOAD).await?;
        return Ok(Plan {
            program: target.clone(),
            args: args.command.clone(),
            cwd: None,
            stdin_consumed: true,
            staged_bytes,
        });
    }

    let (program, rest) = args.command.split_first().ok_or(SetupError::NoProgram)?;

    if let Some(dir) = &args.stage_bundle {
        let staged_bytes = stage_bundle(&mut stdin, dir, MAX_PAYLOAD).await?;
        return Ok(Plan {
            program: PathBuf::from(program),
            args: rest.to_vec(),
            cwd: Some(dir.clone()),
            stdin_consumed: true,
            staged_bytes,
        });
    }

    let program = PathBuf::from(program);
    ensure_executable(&program).await?;
    Ok(Plan {
        program,
        args: rest.to_vec(),
        cwd: None,
        stdin_consumed: false,
        staged_bytes: 0,
    })
}

/// Stream `input` into `target` with mode 0755, refusing more than `limit` bytes.
///
/// The file handle is closed before returning so the kernel will not refuse
/// to execute it as busy.
pub async fn stage_binary<R>(input: &mut R, target: &Path, limit: u64) -> Result<u64, SetupError>
where
    R: AsyncRead + Unpin,
{
    let stage_err = |source| SetupError::Stage {
        path: target.display().to_string(),
        source,
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(stage_err)?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(target)
        .await
        .map_err(stage_err)?;

    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await.map_err(SetupError::Stdin)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > limit {
            return Err(SetupError::PayloadTooLarge { limit });
        }
        let chunk = buf.get(..n).unwrap_or_default();
        file.write_all(chunk).await.map_err(stage_err)?;
    }
    if total == 0 {
        return Err(SetupError::EmptyPayload);
    }

    file.flush().await.map_err(stage_err)?;
    file.sync_all().await.map_err(stage_err)?;
    drop(file);

    // umask may have stripped bits from the create mode.
    tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(stage_err)?;
    log_info!(LOG_TAG, "wrote {total} bytes to {}", target.display());
    Ok(total)
}

/// Decode a JSON [`SourceBundle`] from `input` and write every file under `dir`.
pub async fn stage_bundle<R>(input: &mut R, dir: &Path, limit: u64) -> Result<u64, SetupError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    let read = input
        .take(limit + 1)
        .read_to_end(&mut raw)
        .await
        .map_err(SetupError::Stdin)?;
    if read as u64 > limit {
        return Err(SetupError::PayloadTooLarge { limit });
    }
    if raw.is_empty() {
        return Err(SetupError::EmptyPayload);
    }

    let bundle: SourceBundle =
        serde_json::from_slice(&raw).map_err(|e| SetupError::Bundle(e.to_string()))?;
    bundle
        .validate()
        .map_err(|e| SetupError::Bundle(e.to_string()))?;

    for file in bundle.files() {
        let path = dir.join(file.path());
        let stage_err = |source| SetupError::Stage {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(stage_err)?;
        }
        tokio::fs::write(&path, file.source.as_bytes())
            .await
            .map_err(stage_err)?;
    }
    Ok(read as u64)
}

/// Workspace-delivered programs arrive as 0644; add the execute bits.
/// Bare command names are left for `PATH` lookup.
pub async fn ensure_executable(program: &Path) -> Result<(), SetupError> {
    if program.components().count() < 2 {
        return Ok(());
    }
    let Ok(meta) = tokio::fs::metadata(program).await else {
        return Ok(());
    };
    let mode = meta.permissions().mode();
    if !meta.is_file() || mode & 0o111 != 0 {
        return Ok(());
    }
    tokio::fs::set_permissions(program, std::fs::Permissions::from_mode(mode | 0o111))
        .await
        .map_err(|source| SetupError::Stage {
            path: program.display().to_string(),
            source,
        })
}
