// src/engine.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::control::JobControl;
use crate::fetch::{self, DownloadError};
use crate::limiter::SpeedLimiter;
use crate::merge;
use crate::models::{DownloadJob, JobStatus, QueueConfig};
use crate::naming;
use crate::progress;
use crate::split::split_ranges;
use crate::store::{JobStore, StoreError};

/// Header facts gathered by the metadata probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeInfo {
    pub content_length: u64,
    pub accept_ranges: bool,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

/// Orchestrates one job's transfer: metadata probe, single-stream vs.
/// multi-part strategy, range splitting, concurrent fetch, merge, and
/// progress aggregation. Holds no job state of its own; everything
/// per-job travels in the record and its [`JobControl`].
pub struct TransferEngine {
    client: Client,
    store: Arc<dyn JobStore>,
    config: EngineConfig,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn JobStore>, config: EngineConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            store,
            config,
        })
    }

    /// Metadata probe: a plain GET (not HEAD, since some servers omit
    /// headers on HEAD) whose body is never read.
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus(status));
        }
        let headers = resp.headers();

        let content_length = match headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(len) => len,
            None => {
                warn!(url, "missing or unparsable Content-Length; forcing single-stream");
                0
            }
        };
        let accept_ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let content_disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ProbeInfo {
            content_length,
            accept_ranges,
            content_disposition,
            content_type,
        })
    }

    /// Probes the URL and builds the persisted job record.
    ///
    /// On probe failure the job is recorded as `Failed` with the error
    /// attached and no transfer is ever attempted for it. A store failure
    /// on this first save is fatal to creation: without it the job has no
    /// identity to track.
    pub async fn create_job(
        &self,
        url: &str,
        queue: &QueueConfig,
        file_name: Option<String>,
    ) -> Result<DownloadJob, StoreError> {
        let mut job = DownloadJob::new(url, &queue.name);

        match self.probe(url).await {
            Ok(info) => {
                job.content_length = info.content_length;
                job.accept_ranges = info.accept_ranges;

                let name = file_name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| {
                        naming::resolve_file_name(
                            url,
                            info.content_disposition.as_deref(),
                            info.content_type.as_deref(),
                        )
                    });
                let requested = if Path::new(&name).is_absolute() {
                    PathBuf::from(&name)
                } else {
                    naming::expand_home(&queue.storage_folder).join(&name)
                };
                info!(
                    url,
                    file = %requested.display(),
                    size = job.content_length,
                    ranges = job.accept_ranges,
                    "created download job"
                );
                job.file_name = Some(requested);
            }
            Err(e) => {
                error!(url, error = %e, "metadata probe failed");
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }

        job.id = self.store.save_job(&job).await?;
        Ok(job)
    }

    /// Whether this job takes the multi-part path.
    pub fn is_multipart(&self, job: &DownloadJob) -> bool {
        job.accept_ranges && job.content_length > self.config.multipart_threshold
    }

    /// Runs the transfer for an already-admitted job. The caller owns the
    /// status transitions around this call; `execute` resolves the final
    /// output path, drives the chosen strategy, and feeds the control's
    /// progress counters.
    pub async fn execute(
        &self,
        record: &Arc<Mutex<DownloadJob>>,
        ctl: &JobControl,
        limiter: &SpeedLimiter,
    ) -> Result<(), DownloadError> {
        let (url, requested, multipart, content_length) = {
            let job = record.lock().await;
            let requested = job.file_name.clone().ok_or_else(|| {
                DownloadError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "no output path resolved for job",
                ))
            })?;
            (job.url.clone(), requested, self.is_multipart(&job), job.content_length)
        };

        if let Some(parent) = requested.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Resolve collisions and immediately reserve the name, so a sibling
        // job cannot claim it before the merge.
        let dest = naming::unique_path(&requested);
        tokio::fs::File::create(&dest).await?;
        {
            let mut job = record.lock().await;
            job.file_name = Some(dest.clone());
        }

        ctl.progress().set_total(content_length);
        ctl.progress().mark_started();

        let result = if multipart {
            self.run_multipart(&url, &dest, content_length, ctl, limiter)
                .await
        } else {
            self.run_single(&url, &dest, ctl, limiter).await
        };

        match result {
            Ok(total) => {
                info!(url, file = %dest.display(), bytes = total, "transfer complete");
                Ok(())
            }
            Err(DownloadError::Canceled) => {
                // A canceled job leaves no partial output behind.
                let _ = tokio::fs::remove_file(&dest).await;
                Err(DownloadError::Canceled)
            }
            Err(e) => {
                error!(url, error = %e, "transfer failed");
                Err(e)
            }
        }
    }

    async fn run_multipart(
        &self,
        url: &str,
        dest: &Path,
        content_length: u64,
        ctl: &JobControl,
        limiter: &SpeedLimiter,
    ) -> Result<u64, DownloadError> {
        let ranges = split_ranges(content_length, self.config.chunk_size, self.config.max_parts);
        info!(url, parts = ranges.len(), "starting multi-part transfer");

        let (delta_tx, aggregator) = progress::fan_in(Arc::clone(ctl.progress()));
        // Chunk fetchers observe a child token: a chunk failure cancels the
        // siblings without marking the whole job user-canceled.
        let run_ctl = ctl.child();

        let mut parts = Vec::with_capacity(ranges.len());
        let mut tasks = Vec::with_capacity(ranges.len());
        for (i, range) in ranges.iter().copied().enumerate() {
            let part = part_path(dest, i);
            parts.push(part.clone());

            let client = self.client.clone();
            let url = url.to_string();
            let ctl = run_ctl.clone();
            let limiter = limiter.clone();
            let tx = delta_tx.clone();
            tasks.push(tokio::spawn(async move {
                fetch::fetch_range(&client, &url, range, &part, &ctl, &limiter, &tx).await
            }));
        }
        drop(delta_tx);

        let mut first_error: Option<DownloadError> = None;
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => {}
                Ok(Err(DownloadError::Canceled)) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        run_ctl.cancel();
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        run_ctl.cancel();
                        first_error = Some(DownloadError::Io(std::io::Error::other(join_err)));
                    }
                }
            }
        }
        let _ = aggregator.await;

        if ctl.is_canceled() {
            merge::discard_parts(&parts).await;
            return Err(DownloadError::Canceled);
        }
        if let Some(e) = first_error {
            merge::discard_parts(&parts).await;
            // The reserved output file holds no merged bytes yet.
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }

        // Ranges were spawned in ascending start order, so `parts` is
        // already the merge order whatever order the fetches finished in.
        merge::merge_parts(&parts, dest).await
    }

    async fn run_single(
        &self,
        url: &str,
        dest: &Path,
        ctl: &JobControl,
        limiter: &SpeedLimiter,
    ) -> Result<u64, DownloadError> {
        info!(url, "starting single-stream transfer");
        let (delta_tx, aggregator) = progress::fan_in(Arc::clone(ctl.progress()));
        let result = fetch::fetch_single(&self.client, url, dest, ctl, limiter, &delta_tx).await;
        drop(delta_tx);
        let _ = aggregator.await;
        result
    }
}

fn part_path(dest: &Path, index: usize) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".part{index}"));
    dest.with_file_name(name)
}
