// src/control.rs

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::fetch::DownloadError;
use crate::progress::Progress;

/// Runtime execution context for one job: the one-shot cancellation token,
/// the pause signal, and the live progress counters.
///
/// Deliberately separate from the persisted [`crate::models::DownloadJob`]
/// record; the two are related by job id. Cloning yields another handle to
/// the same signals.
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
    progress: Arc<Progress>,
}

impl JobControl {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(pause),
            progress: Arc::new(Progress::new()),
        }
    }

    /// A view whose cancellation also fires when this control is canceled,
    /// but which can additionally be canceled on its own. The engine hands
    /// one of these to the chunk fetchers so it can pull the remaining
    /// fetches down after a chunk failure without marking the job canceled.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            pause: Arc::clone(&self.pause),
            progress: Arc::clone(&self.progress),
        }
    }

    /// Fires the one-shot cancellation signal; every in-flight fetch for
    /// the job observes it on its next loop iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is canceled.
    pub async fn canceled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn pause(&self) {
        let _ = self.pause.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn pause_watcher(&self) -> watch::Receiver<bool> {
        self.pause.subscribe()
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Cooperative pause: blocks while the pause signal is raised, waking on
    /// resume. Cancellation interrupts the wait immediately.
    pub async fn wait_while_paused(
        &self,
        rx: &mut watch::Receiver<bool>,
    ) -> Result<(), DownloadError> {
        while *rx.borrow() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DownloadError::Canceled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_while_paused_passes_through_when_running() {
        let ctl = JobControl::new();
        let mut rx = ctl.pause_watcher();
        ctl.wait_while_paused(&mut rx).await.unwrap();
    }

    #[tokio::test]
    async fn resume_wakes_a_paused_waiter() {
        let ctl = JobControl::new();
        ctl.pause();

        let waiter = {
            let ctl = ctl.clone();
            tokio::spawn(async move {
                let mut rx = ctl.pause_watcher();
                ctl.wait_while_paused(&mut rx).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ctl.resume();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_a_paused_waiter() {
        let ctl = JobControl::new();
        ctl.pause();

        let waiter = {
            let ctl = ctl.clone();
            tokio::spawn(async move {
                let mut rx = ctl.pause_watcher();
                ctl.wait_while_paused(&mut rx).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctl.cancel();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(DownloadError::Canceled)
        ));
    }

    #[tokio::test]
    async fn child_cancel_does_not_cancel_the_parent() {
        let ctl = JobControl::new();
        let child = ctl.child();
        child.cancel();
        assert!(child.is_canceled());
        assert!(!ctl.is_canceled());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_the_child() {
        let ctl = JobControl::new();
        let child = ctl.child();
        ctl.cancel();
        assert!(child.is_canceled());
    }
}
