// src/models.rs

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config;

/// An inclusive `[start, end]` span of a resource's bytes, as addressed by
/// the HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by this range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// The status of a download job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Canceled,
    Failed,
}

impl JobStatus {
    /// Completed, Canceled and Failed admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Failed
        )
    }
}

/// The persisted record of a single download job. Runtime-only state (the
/// cancellation token, the pause signal, live byte counters) lives in
/// [`crate::control::JobControl`], related to this record by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Assigned by the store on first save; 0 until then.
    pub id: u64,
    /// Immutable after creation.
    pub url: String,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Resolved output path; empty until the metadata probe completes and
    /// never overwritten mid-transfer.
    pub file_name: Option<PathBuf>,
    pub status: JobStatus,
    /// Total expected bytes; 0 when the server omitted the header.
    pub content_length: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// Bytes durably written so far; monotonically non-decreasing and never
    /// above `content_length` once that is known.
    pub progress: u64,
    /// Human-readable last error, for display.
    pub error: Option<String>,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            id: 0,
            url: url.into(),
            queue: queue.into(),
            file_name: None,
            status: JobStatus::Queued,
            content_length: 0,
            accept_ranges: false,
            progress: 0,
            error: None,
        }
    }

    /// Whole-number progress percentage. Multiplies before dividing so the
    /// value does not truncate to zero for partial transfers.
    pub fn percent(&self) -> u8 {
        if self.content_length == 0 {
            return 0;
        }
        let written = self.progress.min(self.content_length);
        (written as u128 * 100 / self.content_length as u128) as u8
    }

    fn advance(&mut self, next: JobStatus, from: &[JobStatus]) -> bool {
        // Already there, or already terminal: idempotent no-op.
        if self.status == next || self.status.is_terminal() {
            return false;
        }
        if !from.contains(&self.status) {
            return false;
        }
        self.status = next;
        true
    }

    /// Queued/Paused -> Downloading.
    pub fn mark_downloading(&mut self) -> bool {
        self.advance(JobStatus::Downloading, &[JobStatus::Queued, JobStatus::Paused])
    }

    /// Downloading -> Paused. Pause is only meaningful mid-transfer.
    pub fn mark_paused(&mut self) -> bool {
        self.advance(JobStatus::Paused, &[JobStatus::Downloading])
    }

    pub fn mark_completed(&mut self) -> bool {
        self.advance(
            JobStatus::Completed,
            &[JobStatus::Queued, JobStatus::Downloading, JobStatus::Paused],
        )
    }

    /// Cancel applies from any non-terminal state, including a job still
    /// waiting for admission.
    pub fn mark_canceled(&mut self) -> bool {
        self.advance(
            JobStatus::Canceled,
            &[JobStatus::Queued, JobStatus::Downloading, JobStatus::Paused],
        )
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.advance(
            JobStatus::Failed,
            &[JobStatus::Queued, JobStatus::Downloading, JobStatus::Paused],
        ) {
            self.error = Some(reason.into());
            true
        } else {
            false
        }
    }
}

/// Daily time-of-day span during which a queue admits jobs. Inclusive on
/// both ends; a span with `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveWindow {
    /// Parses a pair of `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end, "%H:%M").ok()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// Configuration of a named queue. The runtime pieces (active count,
/// admission controller, shared bandwidth limiter) live in
/// [`crate::queue::QueueState`] and are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Unique key.
    pub name: String,
    /// Default output directory; a leading `~` is expanded.
    pub storage_folder: PathBuf,
    /// Cap on simultaneously running jobs.
    pub max_simultaneous: usize,
    /// Aggregate bytes/sec budget for the queue; 0 means unlimited.
    pub max_download_speed: u64,
    /// Daily admission window; `None` means always active.
    pub active_window: Option<ActiveWindow>,
    /// Configured but not enforced by the engine; kept as an extension
    /// point for per-chunk retry.
    pub max_retry_attempts: u32,
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: config::DEFAULT_QUEUE_NAME.to_string(),
            storage_folder: PathBuf::from(config::DEFAULT_STORAGE_FOLDER),
            max_simultaneous: config::DEFAULT_MAX_SIMULTANEOUS,
            max_download_speed: config::DEFAULT_DOWNLOAD_SPEED,
            active_window: None,
            max_retry_attempts: config::DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}
