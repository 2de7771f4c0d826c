//! qfetch: a queue-based download accelerator.
//!
//! Given a URL, the engine probes the server for byte-range support, splits
//! large transfers into concurrent segments, reassembles them into one file,
//! and tracks progress so a front end can display and control the job
//! (pause, resume, cancel). Jobs are organized into named queues, each with
//! its own concurrency limit, active-time window, and bandwidth cap: the
//! queue decides *when* a job may run, the transfer engine decides *how*.

pub mod config;
pub mod control;
pub mod engine;
pub mod fetch;
pub mod limiter;
pub mod manager;
pub mod merge;
pub mod models;
pub mod naming;
pub mod progress;
pub mod queue;
pub mod split;
pub mod store;

/// Convenient re-exports of the common types.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::control::JobControl;
    pub use crate::engine::TransferEngine;
    pub use crate::fetch::DownloadError;
    pub use crate::limiter::SpeedLimiter;
    pub use crate::manager::{DownloadManager, ManagerError};
    pub use crate::models::{ActiveWindow, ByteRange, DownloadJob, JobStatus, QueueConfig};
    pub use crate::queue::{AdmissionController, QueueState};
    pub use crate::store::{JobStore, MemoryStore, SqliteStore, StoreError};
}
