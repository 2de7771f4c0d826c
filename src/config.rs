// src/config.rs

/// Name of the queue that always exists.
pub const DEFAULT_QUEUE_NAME: &str = "default";
/// Default output directory; `~` is expanded at transfer time.
pub const DEFAULT_STORAGE_FOLDER: &str = "~/Downloads/qfetch";
/// Default per-queue cap on simultaneously running jobs.
pub const DEFAULT_MAX_SIMULTANEOUS: usize = 3;
/// Default per-queue bandwidth budget in bytes/sec; 0 means unlimited.
pub const DEFAULT_DOWNLOAD_SPEED: u64 = 0;
/// Carried on every queue record; retry is an extension point the engine
/// does not drive yet.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Transfers larger than this use the multi-part strategy (when the server
/// accepts ranges).
pub const MULTIPART_THRESHOLD: u64 = 10 * 1024 * 1024;
/// Target size of one byte range in a multi-part transfer.
pub const CHUNK_SIZE: u64 = 2 * 1024 * 1024;
/// Cap on the number of concurrent parts per job.
pub const MAX_PARTS: usize = 4;

/// Last-resort output file name when nothing can be derived from the URL or
/// the response headers.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

/// Tunables for the transfer engine. The reference constants above are
/// policy, not hard constraints.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size cutoff above which a range-capable server gets a multi-part
    /// transfer.
    pub multipart_threshold: u64,
    /// Target bytes per range.
    pub chunk_size: u64,
    /// Maximum concurrent parts for one job.
    pub max_parts: usize,
    /// User-Agent sent on every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_THRESHOLD,
            chunk_size: CHUNK_SIZE,
            max_parts: MAX_PARTS,
            user_agent: format!("qfetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
