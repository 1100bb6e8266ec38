// src/utils/artifact.rs

//! Report artifact locations and overwrite-safe writes.
//!
//! Layout: `{root}/{test_id}/{test_id}_testresult.html` for the cumulative report,
//! `{root}/{test_id}/individual/{user_uuid}_{test_id}_testresult.html` per candidate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::AppError;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn cumulative_path(root: &Path, test_id: i64) -> PathBuf {
    root.join(test_id.to_string())
        .join(format!("{}_testresult.html", test_id))
}

pub fn individual_path(root: &Path, test_id: i64, user_uuid: &str) -> PathBuf {
    root.join(test_id.to_string())
        .join("individual")
        .join(format!("{}_{}_testresult.html", user_uuid, test_id))
}

/// Writes `contents` next to `path` and renames it into place, so readers never
/// observe a half-written report. Parent directories are created as needed.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), AppError> {
    let parent = path.parent().ok_or_else(|| {
        AppError::InternalServerError(format!("artifact path {} has no parent", path.display()))
    })?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AppError::InternalServerError(format!("invalid artifact path {}", path.display()))
        })?;
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp = parent.join(format!(".{}.{}.{}.tmp", file_name, std::process::id(), seq));

    tokio::fs::write(&temp, contents).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}
