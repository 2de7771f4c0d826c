// src/progress.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Live byte counters for one job, shared between the transfer execution
/// (which writes) and the front end (which only reads).
#[derive(Debug, Default)]
pub struct Progress {
    written: AtomicU64,
    total: AtomicU64,
    started: OnceLock<Instant>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Records the wall-clock start of the transfer; later calls are no-ops
    /// so pause/resume does not reset throughput.
    pub fn mark_started(&self) {
        let _ = self.started.set(Instant::now());
    }

    pub fn add(&self, delta: u64) -> u64 {
        self.written.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Whole-number percentage; multiplies before dividing to avoid
    /// truncating partial progress to zero.
    pub fn percent(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let written = self.written().min(total);
        (written as u128 * 100 / total as u128) as u8
    }

    /// Derived throughput in bytes/sec since the transfer started; not
    /// stored anywhere.
    pub fn throughput(&self) -> f64 {
        match self.started.get() {
            Some(started) => {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    self.written() as f64 / secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

/// Fan-in aggregation: per-chunk deltas from any number of concurrent
/// fetchers are delivered through one channel and summed by a single
/// accumulating task, so no update is ever lost to a concurrent increment.
///
/// Returns the delta sender and the accumulator handle; the task ends (and
/// yields the total it saw) once every sender has been dropped.
pub fn fan_in(progress: Arc<Progress>) -> (mpsc::UnboundedSender<u64>, JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut summed = 0u64;
        while let Some(delta) = rx.recv().await {
            summed += delta;
            progress.add(delta);
        }
        summed
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_multiplies_before_dividing() {
        let p = Progress::new();
        p.set_total(10_000);
        p.add(99);
        assert_eq!(p.percent(), 0);
        p.add(9_800);
        assert_eq!(p.percent(), 98);
        p.add(101);
        assert_eq!(p.percent(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_in_loses_no_deltas() {
        let progress = Arc::new(Progress::new());
        let (tx, handle) = fan_in(progress.clone());

        let mut writers = Vec::new();
        for _ in 0..8 {
            let tx = tx.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..1_000 {
                    tx.send(3).unwrap();
                }
            }));
        }
        drop(tx);
        for w in writers {
            w.await.unwrap();
        }
        let summed = handle.await.unwrap();
        assert_eq!(summed, 8 * 1_000 * 3);
        assert_eq!(progress.written(), summed);
    }

    #[test]
    fn written_is_monotonic() {
        let p = Progress::new();
        let mut last = 0;
        for _ in 0..100 {
            let now = p.add(7);
            assert!(now > last);
            last = now;
        }
        assert_eq!(p.written(), 700);
    }

    #[test]
    fn throughput_needs_a_start_mark() {
        let p = Progress::new();
        p.add(1_000);
        assert_eq!(p.throughput(), 0.0);
        p.mark_started();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(p.throughput() > 0.0);
    }
}
