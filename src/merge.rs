// src/merge.rs

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::fetch::DownloadError;

/// Concatenates the part files into `dest` in the order given (callers pass
/// them in ascending range order, which is independent of completion order)
/// and removes each part after it is copied.
///
/// Fails fast on the first I/O error, leaving the remaining part files in
/// place for inspection. Returns the number of bytes written.
pub async fn merge_parts(parts: &[PathBuf], dest: &Path) -> Result<u64, DownloadError> {
    let mut out = File::create(dest).await?;
    let mut total = 0u64;
    for part in parts {
        let mut src = File::open(part).await?;
        total += tokio::io::copy(&mut src, &mut out).await?;
        drop(src);
        tokio::fs::remove_file(part).await?;
    }
    out.flush().await?;
    Ok(total)
}

/// Best-effort removal of leftover part files after a cancel or failure.
pub async fn discard_parts(parts: &[PathBuf]) {
    for part in parts {
        let _ = tokio::fs::remove_file(part).await;
    }
}
