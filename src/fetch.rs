// src/fetch.rs

use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::control::JobControl;
use crate::limiter::SpeedLimiter;
use crate::models::ByteRange;

/// Errors surfaced by the transfer path.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Not a failure: a deliberate terminal outcome, kept distinct from
    /// `Failed` all the way up.
    #[error("download canceled")]
    Canceled,
}

/// Fetches one byte range into a private temp file.
///
/// Issues a ranged GET and streams the body to `dest`, checking the
/// cancellation signal and the pause signal on every iteration, charging
/// the bandwidth limiter per chunk, and emitting a progress delta after
/// each successful write. On cancellation the partial temp file is left
/// for the caller to clean up. Chunk errors are reported, never retried
/// here.
pub async fn fetch_range(
    client: &Client,
    url: &str,
    range: ByteRange,
    dest: &Path,
    ctl: &JobControl,
    limiter: &SpeedLimiter,
    progress: &mpsc::UnboundedSender<u64>,
) -> Result<u64, DownloadError> {
    let resp = client
        .get(url)
        .header(reqwest::header::RANGE, range.header_value())
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(DownloadError::HttpStatus(resp.status()));
    }
    let mut file = File::create(dest).await?;
    let written = copy_stream(resp, &mut file, ctl, limiter, progress).await?;
    file.flush().await?;
    Ok(written)
}

/// Single-stream fallback: plain GET written straight to the final file.
/// Used when the server does not accept ranges or the resource is small.
pub async fn fetch_single(
    client: &Client,
    url: &str,
    dest: &Path,
    ctl: &JobControl,
    limiter: &SpeedLimiter,
    progress: &mpsc::UnboundedSender<u64>,
) -> Result<u64, DownloadError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(DownloadError::HttpStatus(resp.status()));
    }
    let mut file = File::create(dest).await?;
    let written = copy_stream(resp, &mut file, ctl, limiter, progress).await?;
    file.flush().await?;
    Ok(written)
}

async fn copy_stream(
    resp: reqwest::Response,
    file: &mut File,
    ctl: &JobControl,
    limiter: &SpeedLimiter,
    progress: &mpsc::UnboundedSender<u64>,
) -> Result<u64, DownloadError> {
    let mut pause_rx = ctl.pause_watcher();
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;

    loop {
        if ctl.is_canceled() {
            return Err(DownloadError::Canceled);
        }
        ctl.wait_while_paused(&mut pause_rx).await?;

        let chunk = tokio::select! {
            _ = ctl.canceled() => return Err(DownloadError::Canceled),
            next = stream.next() => match next {
                Some(chunk) => chunk?,
                None => break,
            },
        };

        // Bandwidth tokens are acquired per chunk; cancellation interrupts
        // the wait so a throttled transfer still stops promptly.
        tokio::select! {
            _ = ctl.canceled() => return Err(DownloadError::Canceled),
            _ = limiter.acquire(chunk.len() as u64) => {}
        }

        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        // A closed channel only means nobody is aggregating anymore.
        let _ = progress.send(chunk.len() as u64);
    }
    Ok(written)
}
