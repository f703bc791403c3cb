//! Tamper-evident node state and crash recovery
//!
//! - `chain`: hash-linked, bounded log of state checkpoints
//! - `recovery`: persists mode + latest snapshot + cached updates, restores at boot
//!
//! Recovery files are staged and renamed into place:
//!
//! ```text
//! <data_dir>/recovery/        (0700)
//!   ├── state.json            (0600, the live record)
//!   └── state.json.tmp        (only present during a write)
//! ```

pub mod chain;
pub mod recovery;

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

pub use chain::{ChainFault, ChainVerdict, SharedChain, Snapshot, SnapshotChain};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryRecord, RecoveryStatus};

/// Write `data` to `path` so that readers see either the old file or the new
/// one, never a torn write. Missing parent directories are created owner-only.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        create_private_dir(parent).await?;
    }

    let staged = staging_path(path);
    {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&staged).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }

    if let Err(e) = tokio::fs::rename(&staged, path).await {
        tokio::fs::remove_file(&staged).await.ok();
        return Err(e);
    }
    Ok(())
}

/// Create `dir` and any missing ancestors, each restricted to the owner
async fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut missing = Vec::new();
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || tokio::fs::try_exists(ancestor).await? {
            break;
        }
        missing.push(ancestor);
    }
    if missing.is_empty() {
        return Ok(());
    }

    tokio::fs::create_dir_all(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for created in missing {
            tokio::fs::set_permissions(created, std::fs::Permissions::from_mode(0o700)).await?;
        }
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
