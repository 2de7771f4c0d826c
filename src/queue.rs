// src/queue.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fetch::DownloadError;
use crate::limiter::SpeedLimiter;
use crate::models::{ActiveWindow, QueueConfig};

/// How often a blocked job re-checks the active-time window. Waking after a
/// slot release is event-driven and does not wait on this.
const WINDOW_POLL: Duration = Duration::from_secs(10);

/// Per-queue gatekeeper: decides whether a queued job may start running
/// now, bounding simultaneous jobs and honoring the optional daily
/// active-time window.
#[derive(Debug)]
pub struct AdmissionController {
    max_simultaneous: usize,
    window: Option<ActiveWindow>,
    active: AtomicUsize,
    released: Notify,
}

impl AdmissionController {
    pub fn new(max_simultaneous: usize, window: Option<ActiveWindow>) -> Arc<Self> {
        Arc::new(Self {
            max_simultaneous,
            window,
            active: AtomicUsize::new(0),
            released: Notify::new(),
        })
    }

    /// Currently admitted jobs.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Admits the job now if the window is open and a slot is free. The
    /// check and the increment are one atomic step, so concurrent attempts
    /// can never push `active` past the cap.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        if !self.window_open() {
            return None;
        }
        if self.try_acquire_slot() {
            Some(AdmissionPermit {
                controller: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Waits until the job is admitted, waking when a running job releases
    /// its slot (with a coarse fallback poll for the window reopening).
    /// Returns `Canceled` if the token fires while still queued.
    pub async fn admit(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<AdmissionPermit, DownloadError> {
        loop {
            if let Some(permit) = self.try_admit() {
                return Ok(permit);
            }
            debug!(
                active = self.active_count(),
                cap = self.max_simultaneous,
                "admission blocked; waiting"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Canceled),
                _ = self.released.notified() => {}
                _ = tokio::time::sleep(WINDOW_POLL) => {}
            }
        }
    }

    fn try_acquire_slot(&self) -> bool {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max_simultaneous {
                return false;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        // One slot freed, one waiter woken; the permit is stored if nobody
        // is waiting yet.
        self.released.notify_one();
    }

    fn window_open(&self) -> bool {
        match self.window {
            Some(window) => window.contains(Local::now().time()),
            None => true,
        }
    }
}

/// Occupancy of one admission slot. Dropping it releases the slot and wakes
/// a blocked job, so release happens on every exit path: completion,
/// failure, cancellation, or panic.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}

/// Runtime state of one named queue: its configuration, the admission
/// controller, and the bandwidth limiter shared by all of its transfers.
#[derive(Debug)]
pub struct QueueState {
    pub config: QueueConfig,
    pub admission: Arc<AdmissionController>,
    pub limiter: SpeedLimiter,
}

impl QueueState {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let admission = AdmissionController::new(config.max_simultaneous, config.active_window);
        let limiter = SpeedLimiter::new(config.max_download_speed);
        Arc::new(Self {
            config,
            admission,
            limiter,
        })
    }
}
