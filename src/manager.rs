// src/manager.rs

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::control::JobControl;
use crate::engine::TransferEngine;
use crate::fetch::DownloadError;
use crate::models::{DownloadJob, JobStatus, QueueConfig};
use crate::queue::QueueState;
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no queue named {0:?}")]
    UnknownQueue(String),
    #[error("no job with id {0}")]
    UnknownJob(u64),
    #[error("queue {0:?} still has non-terminal jobs")]
    QueueBusy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// One tracked job: its shared persisted record, its runtime control, and
/// the handle of the task driving it.
struct JobEntry {
    record: Arc<Mutex<DownloadJob>>,
    ctl: JobControl,
    runner: Option<JoinHandle<()>>,
}

/// Front-end facade over the whole system. Owns the queues and the live
/// job table, submits work to the [`TransferEngine`], and routes pause,
/// resume and cancel signals to the right [`JobControl`].
pub struct DownloadManager {
    engine: TransferEngine,
    store: Arc<dyn JobStore>,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    jobs: Mutex<HashMap<u64, JobEntry>>,
}

impl DownloadManager {
    /// Builds a manager with a single default queue.
    pub fn new(store: Arc<dyn JobStore>, config: EngineConfig) -> Result<Arc<Self>, ManagerError> {
        Self::with_queues(store, config, vec![QueueConfig::default()])
    }

    /// Builds a manager with the given queues (the default queue is added
    /// if absent, so `submit` with no queue name always has a target).
    pub fn with_queues(
        store: Arc<dyn JobStore>,
        config: EngineConfig,
        queues: Vec<QueueConfig>,
    ) -> Result<Arc<Self>, ManagerError> {
        let engine = TransferEngine::new(Arc::clone(&store), config)?;
        let mut map = HashMap::new();
        for queue in queues {
            map.insert(queue.name.clone(), QueueState::new(queue));
        }
        map.entry(QueueConfig::default().name)
            .or_insert_with(|| QueueState::new(QueueConfig::default()));
        Ok(Arc::new(Self {
            engine,
            store,
            queues: Mutex::new(map),
            jobs: Mutex::new(HashMap::new()),
        }))
    }

    /// Registers a queue, replacing any existing configuration under the
    /// same name. Jobs already running keep the state they started with.
    pub async fn add_queue(&self, config: QueueConfig) {
        let name = config.name.clone();
        self.queues.lock().await.insert(name.clone(), QueueState::new(config));
        info!(queue = %name, "queue registered");
    }

    /// Removes a queue. Refused while any of its jobs is still live, so a
    /// queued job can never lose the admission controller it waits on.
    pub async fn remove_queue(&self, name: &str) -> Result<(), ManagerError> {
        {
            let jobs = self.jobs.lock().await;
            for entry in jobs.values() {
                let job = entry.record.lock().await;
                if job.queue == name && !job.status.is_terminal() {
                    return Err(ManagerError::QueueBusy(name.to_string()));
                }
            }
        }
        let mut queues = self.queues.lock().await;
        if queues.remove(name).is_none() {
            return Err(ManagerError::UnknownQueue(name.to_string()));
        }
        info!(queue = name, "queue removed");
        Ok(())
    }

    pub async fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.queues.lock().await.get(name).cloned()
    }

    /// Creates a job on the named queue and, if the metadata probe
    /// succeeded, spawns its runner. The returned record reflects the state
    /// at submission time; a probe failure shows up as a `Failed` job
    /// rather than an error here.
    pub async fn submit(
        self: &Arc<Self>,
        url: &str,
        queue_name: &str,
        file_name: Option<String>,
    ) -> Result<DownloadJob, ManagerError> {
        let queue = self
            .queue(queue_name)
            .await
            .ok_or_else(|| ManagerError::UnknownQueue(queue_name.to_string()))?;

        let job = self.engine.create_job(url, &queue.config, file_name).await?;
        let snapshot = job.clone();
        let record = Arc::new(Mutex::new(job));
        let ctl = JobControl::new();

        let runner = if snapshot.status == JobStatus::Queued {
            Some(self.spawn_runner(Arc::clone(&record), ctl.clone(), queue))
        } else {
            None
        };

        self.jobs.lock().await.insert(
            snapshot.id,
            JobEntry {
                record,
                ctl,
                runner,
            },
        );
        Ok(snapshot)
    }

    fn spawn_runner(
        self: &Arc<Self>,
        record: Arc<Mutex<DownloadJob>>,
        ctl: JobControl,
        queue: Arc<QueueState>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let permit = match queue.admission.admit(ctl.token()).await {
                Ok(permit) => permit,
                Err(_) => {
                    // Canceled while still waiting in the queue.
                    let mut job = record.lock().await;
                    job.mark_canceled();
                    manager.persist(&job).await;
                    return;
                }
            };

            {
                let mut job = record.lock().await;
                job.mark_downloading();
                manager.persist(&job).await;
            }

            let result = manager.engine.execute(&record, &ctl, &queue.limiter).await;

            let mut job = record.lock().await;
            job.progress = ctl.progress().written();
            match result {
                Ok(()) => {
                    job.mark_completed();
                }
                Err(DownloadError::Canceled) => {
                    job.mark_canceled();
                }
                Err(e) => {
                    job.mark_failed(e.to_string());
                }
            }
            manager.persist(&job).await;
            drop(permit);
        })
    }

    /// Raises the pause signal for a downloading job. Fetchers finish their
    /// in-flight chunk and then block until resumed.
    pub async fn pause(&self, id: u64) -> Result<(), ManagerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(&id).ok_or(ManagerError::UnknownJob(id))?;
        let mut job = entry.record.lock().await;
        if job.mark_paused() {
            entry.ctl.pause();
            self.persist(&job).await;
        }
        Ok(())
    }

    /// Lowers the pause signal; every blocked fetcher wakes and continues
    /// from exactly where it stopped.
    pub async fn resume(&self, id: u64) -> Result<(), ManagerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(&id).ok_or(ManagerError::UnknownJob(id))?;
        let mut job = entry.record.lock().await;
        if job.status == JobStatus::Paused && job.mark_downloading() {
            entry.ctl.resume();
            self.persist(&job).await;
        }
        Ok(())
    }

    /// Fires the job's cancellation token. A job still queued stops
    /// waiting for admission; a running one aborts its fetches and removes
    /// its partial output. The terminal status is recorded by the runner,
    /// or here for jobs that never got one.
    pub async fn cancel(&self, id: u64) -> Result<(), ManagerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(&id).ok_or(ManagerError::UnknownJob(id))?;
        entry.ctl.cancel();
        // A paused job sits inside wait_while_paused; the token wakes it,
        // nothing else to do.
        if entry.runner.is_none() {
            let mut job = entry.record.lock().await;
            if job.mark_canceled() {
                self.persist(&job).await;
            }
        }
        Ok(())
    }

    /// Snapshot of one job, with live byte counters folded in while it
    /// runs.
    pub async fn job(&self, id: u64) -> Result<DownloadJob, ManagerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(&id).ok_or(ManagerError::UnknownJob(id))?;
        Ok(Self::snapshot(entry).await)
    }

    /// Snapshots every tracked job, sorted by id.
    pub async fn jobs(&self) -> Vec<DownloadJob> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for entry in jobs.values() {
            out.push(Self::snapshot(entry).await);
        }
        out.sort_by_key(|j| j.id);
        out
    }

    /// Current transfer rate in bytes/sec, 0 for jobs not running.
    pub async fn throughput(&self, id: u64) -> Result<f64, ManagerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(&id).ok_or(ManagerError::UnknownJob(id))?;
        Ok(entry.ctl.progress().throughput())
    }

    /// Every record the store knows, including jobs from earlier runs.
    pub async fn history(&self) -> Result<Vec<DownloadJob>, ManagerError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Waits for the job's runner to finish. Jobs that never started a
    /// runner return immediately.
    pub async fn wait(&self, id: u64) -> Result<(), ManagerError> {
        let handle = {
            let mut jobs = self.jobs.lock().await;
            let entry = jobs.get_mut(&id).ok_or(ManagerError::UnknownJob(id))?;
            entry.runner.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(id, error = %e, "runner task aborted");
            }
        }
        Ok(())
    }

    async fn snapshot(entry: &JobEntry) -> DownloadJob {
        let mut job = entry.record.lock().await.clone();
        if matches!(job.status, JobStatus::Downloading | JobStatus::Paused) {
            job.progress = entry.ctl.progress().written();
        }
        job
    }

    /// Store writes are advisory for the in-memory lifecycle: a failed
    /// update is logged and the transfer carries on.
    async fn persist(&self, job: &DownloadJob) {
        if let Err(e) = self.store.update_job(job).await {
            warn!(id = job.id, error = %e, "failed to persist job update");
        }
    }
}
