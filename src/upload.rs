//! Sequential chapter upload with classified failure handling.
//!
//! Jobs are uploaded one at a time, never concurrently, because the
//! remote service's session model assumes a single active upload session
//! per credential. Remote failures are classified by HTTP status and
//! turned into run-state transitions; nothing escapes as an unhandled
//! error.

use crate::config::UploadConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status of a job or one of its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    NotStarted,
    Uploading,
    Completed,
    Failed,
}

/// One page of a chapter upload.
#[derive(Debug, Clone, Serialize)]
pub struct PageUpload {
    /// Filename the page is committed under.
    pub filename: String,

    /// Local path to read the page bytes from.
    pub path: std::path::PathBuf,

    pub status: JobStatus,

    /// Last error for this page, if any.
    pub error: Option<String>,
}

impl PageUpload {
    pub fn new(filename: impl Into<String>, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
            status: JobStatus::NotStarted,
            error: None,
        }
    }
}

/// Final, already-corrected chapter state to publish.
///
/// The orchestrator does not care how these values were produced; the
/// change engine has already run by the time a draft exists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChapterDraft {
    pub series_id: String,
    pub volume: Option<String>,
    pub chapter: Option<String>,
    pub title: Option<String>,
    pub group_ids: Vec<String>,
    pub language: String,
}

/// A chapter plus its pages, owned by the orchestrator during a run.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub draft: ChapterDraft,
    pub pages: Vec<PageUpload>,
    pub status: JobStatus,

    /// Last error for the whole job, kept for display.
    pub error: Option<String>,

    /// Upload session the job is running under, if any.
    pub session_id: Option<String>,
}

impl UploadJob {
    pub fn new(draft: ChapterDraft, pages: Vec<PageUpload>) -> Self {
        Self {
            draft,
            pages,
            status: JobStatus::NotStarted,
            error: None,
            session_id: None,
        }
    }

    /// Fraction of this job that has uploaded, in `0.0..=1.0`. Partial
    /// page progress counts.
    pub fn progress(&self) -> f64 {
        if self.status == JobStatus::Completed {
            return 1.0;
        }
        if self.pages.is_empty() {
            return 0.0;
        }
        let completed = self
            .pages
            .iter()
            .filter(|p| p.status == JobStatus::Completed)
            .count();
        completed as f64 / self.pages.len() as f64
    }

    /// Clears page-level progress ahead of a retry attempt.
    fn reset_pages(&mut self) {
        for page in &mut self.pages {
            page.status = JobStatus::NotStarted;
            page.error = None;
        }
    }

    /// Restores the job to its pristine state.
    pub fn reset(&mut self) {
        self.status = JobStatus::NotStarted;
        self.error = None;
        self.session_id = None;
        self.reset_pages();
    }
}

/// State of one upload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    NotStarted,
    InProgress,
    Completed,

    /// A non-network, non-403 failure aborted the run.
    Failed,

    /// A network error persisted through all retries. The run may be
    /// resumed as-is; job state is left in place.
    Paused,

    /// The remote service explicitly denied access (HTTP 403). Must not
    /// be retried without operator intervention.
    Stopped,
}

/// Result of an upload run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub state: RunState,

    /// Mean of per-job fractional progress at the time the run ended.
    pub progress: f64,
}

/// Transport seam the orchestrator drives. The production implementation
/// lives in [`crate::api`] and routes every call through the chained rate
/// limiter.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Returns the id of an upload session already open for this
    /// credential, if one exists.
    async fn active_session(&self) -> Result<Option<String>, TransportError>;

    /// Deletes a stale upload session.
    async fn delete_session(&self, session_id: &str) -> Result<(), TransportError>;

    /// Uploads one chapter end to end, updating the job's pages and
    /// session id as it goes.
    async fn upload_chapter(&self, job: &mut UploadJob) -> Result<(), TransportError>;
}

/// Options controlling upload retry behavior.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Consecutive network failures tolerated per job before the run
    /// pauses.
    pub network_retry_limit: u32,

    /// Delays applied before each network retry. When the retry limit
    /// exceeds the table length, the last entry repeats.
    pub network_retry_delays: Vec<Duration>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            network_retry_limit: 3,
            network_retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            network_retry_limit: config.network_retry_limit,
            network_retry_delays: config.retry_delays(),
        }
    }
}

/// How one job's upload ended, from the run's point of view.
enum JobOutcome {
    Completed,
    Stopped,
    Paused,
    Failed,
}

/// Drives chapter uploads through the transport, one job at a time.
pub struct Uploader {
    transport: Box<dyn UploadTransport>,
    options: UploadOptions,
    state: RunState,
}

impl Uploader {
    pub fn new(transport: Box<dyn UploadTransport>, options: UploadOptions) -> Self {
        Self {
            transport,
            options,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Mean of per-job fractional progress.
    pub fn progress(jobs: &[UploadJob]) -> f64 {
        if jobs.is_empty() {
            return 0.0;
        }
        jobs.iter().map(UploadJob::progress).sum::<f64>() / jobs.len() as f64
    }

    /// Restores the uploader and every job to a pristine state. Required
    /// before retrying a run.
    pub fn reset(&mut self, jobs: &mut [UploadJob]) {
        self.state = RunState::NotStarted;
        for job in jobs {
            job.reset();
        }
    }

    /// Runs the upload sequence over the given jobs.
    ///
    /// Jobs already `Completed` are skipped, which is what makes resuming
    /// a `Paused` run work without a reset.
    pub async fn run(&mut self, jobs: &mut [UploadJob]) -> RunOutcome {
        self.state = RunState::InProgress;

        // Clear any upload session left over from a previous run. Best
        // effort, except a denial means the credential is no good at all.
        match self.cleanup_stale_session().await {
            Ok(()) => {}
            Err(TransportError::Forbidden) => {
                return self.finish(RunState::Stopped, jobs);
            }
            Err(e) => {
                warn!("could not clean up stale upload session: {e}");
            }
        }

        for i in 0..jobs.len() {
            if jobs[i].status == JobStatus::Completed {
                continue;
            }

            let outcome = self.upload_with_retry(&mut jobs[i]).await;
            match outcome {
                JobOutcome::Completed => {}
                JobOutcome::Stopped => return self.finish(RunState::Stopped, jobs),
                JobOutcome::Paused => return self.finish(RunState::Paused, jobs),
                JobOutcome::Failed => return self.finish(RunState::Failed, jobs),
            }
            debug!("aggregate progress now {:.3}", Self::progress(jobs));
        }

        self.state = RunState::Completed;
        info!("upload run completed");
        RunOutcome {
            state: RunState::Completed,
            progress: 1.0,
        }
    }

    fn finish(&mut self, state: RunState, jobs: &[UploadJob]) -> RunOutcome {
        self.state = state;
        RunOutcome {
            state,
            progress: Self::progress(jobs),
        }
    }

    async fn cleanup_stale_session(&self) -> Result<(), TransportError> {
        let Some(session_id) = self.transport.active_session().await? else {
            return Ok(());
        };
        debug!("deleting stale upload session {session_id}");
        self.transport.delete_session(&session_id).await
    }

    /// Uploads one job, retrying network-classified failures with the
    /// configured delay ladder.
    async fn upload_with_retry(&self, job: &mut UploadJob) -> JobOutcome {
        let mut network_failures: u32 = 0;

        loop {
            job.status = JobStatus::Uploading;

            match self.transport.upload_chapter(job).await {
                Ok(()) => {
                    job.status = JobStatus::Completed;
                    job.error = None;
                    return JobOutcome::Completed;
                }
                Err(TransportError::Forbidden) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(TransportError::Forbidden.to_string());
                    return JobOutcome::Stopped;
                }
                Err(e) if e.is_retryable() => {
                    network_failures += 1;
                    if network_failures >= self.options.network_retry_limit {
                        job.status = JobStatus::Failed;
                        job.error = Some(e.to_string());
                        warn!(
                            "network error persisted through {} attempts, pausing run: {e}",
                            network_failures
                        );
                        return JobOutcome::Paused;
                    }

                    let delay = self.retry_delay(network_failures);
                    warn!(
                        "network error (attempt {}/{}), retrying in {:?}: {e}",
                        network_failures, self.options.network_retry_limit, delay
                    );
                    job.reset_pages();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(e.to_string());
                    return JobOutcome::Failed;
                }
            }
        }
    }

    /// Delay before the given retry (1-based failure count), clamped to
    /// the last entry of the ladder.
    fn retry_delay(&self, failures: u32) -> Duration {
        let ladder = &self.options.network_retry_delays;
        let index = (failures as usize - 1).min(ladder.len().saturating_sub(1));
        ladder.get(index).copied().unwrap_or(Duration::from_secs(2))
    }
}
