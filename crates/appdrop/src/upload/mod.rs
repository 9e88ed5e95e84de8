//! Release upload orchestration.
//!
//! [`UploadOrchestrator`] drives a [`DistributionApi`] through one upload:
//!
//! ```text
//! Idle -> Preparing -> MetadataSent -> Uploading -> Finishing -> Committing
//!      -> Polling(n) -> Ready | Failed | TimedOut
//! ```
//!
//! Steps run strictly in order. Only chunk uploads may overlap, and all of
//! them complete (or the first failure is seen) before the upload is
//! finished. Any error ends the attempt; the artifact is never re-sent as a
//! whole.

mod chunks;
mod error;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use appdrop_distribution::{DistributionApi, ProtocolStep, UploadTarget};
use appdrop_retry::{Deadline, PollSchedule, RetryStrategyConfig};
use appdrop_types::ReleaseRecord;

use crate::Reporter;
use chunks::ChunkJob;

pub use chunks::{ChunkPlan, plan_chunks, read_chunk};
pub use error::UploadError;

/// What to upload and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub owner: String,
    pub app: String,
    pub artifact: PathBuf,
    /// Name declared to the service; the artifact's file name when `None`
    pub file_name: Option<String>,
    pub content_type: String,
    pub tester_groups: Vec<String>,
    pub release_notes: String,
}

impl UploadRequest {
    fn validate(&self) -> Result<String, UploadError> {
        if self.owner.trim().is_empty() {
            return Err(UploadError::Configuration("owner name is empty".to_string()));
        }
        if self.app.trim().is_empty() {
            return Err(UploadError::Configuration("app name is empty".to_string()));
        }
        if self.content_type.trim().is_empty() {
            return Err(UploadError::Configuration("content type is empty".to_string()));
        }
        if !self.artifact.is_file() {
            return Err(UploadError::Configuration(format!(
                "artifact not found: {}",
                self.artifact.display()
            )));
        }

        match &self.file_name {
            Some(name) if !name.trim().is_empty() => Ok(name.clone()),
            _ => self
                .artifact
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    UploadError::Configuration(format!(
                        "artifact path has no file name: {}",
                        self.artifact.display()
                    ))
                }),
        }
    }
}

/// Tuning knobs of one upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub poll: PollSchedule,
    /// Chunks uploaded at once
    pub concurrency: usize,
    /// Retry behavior of a single chunk
    pub chunk_retry: RetryStrategyConfig,
    /// Overall time budget
    pub deadline: Deadline,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            poll: PollSchedule::default(),
            concurrency: 1,
            chunk_retry: RetryStrategyConfig::default(),
            deadline: Deadline::none(),
        }
    }
}

/// Server-side upload session, owned by one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub prepared_upload_id: String,
    pub target: UploadTarget,
    pub chunk_size: u64,
    pub chunk_numbers: Vec<u32>,
}

/// Upload state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Preparing,
    MetadataSent,
    Uploading { chunks: usize },
    Finishing,
    Committing,
    Polling { attempt: u32 },
    Ready,
    Failed,
    TimedOut,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Idle => f.write_str("idle"),
            UploadState::Preparing => f.write_str("preparing"),
            UploadState::MetadataSent => f.write_str("metadata sent"),
            UploadState::Uploading { chunks } => write!(f, "uploading {chunks} chunks"),
            UploadState::Finishing => f.write_str("finishing"),
            UploadState::Committing => f.write_str("committing"),
            UploadState::Polling { attempt } => write!(f, "polling (attempt {attempt})"),
            UploadState::Ready => f.write_str("ready"),
            UploadState::Failed => f.write_str("failed"),
            UploadState::TimedOut => f.write_str("timed out"),
        }
    }
}

/// How a successful upload ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Uploaded and distributed to testers
    Success,
    /// Uploaded, but testers were not notified
    PartialSuccess { warning: String },
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub upload_id: String,
    pub release_id: Option<String>,
    pub outcome: UploadOutcome,
    pub chunk_count: usize,
    pub poll_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one artifact through the release upload protocol.
pub struct UploadOrchestrator<'a, A> {
    api: &'a A,
    options: UploadOptions,
}

struct Progress<'r> {
    state: UploadState,
    reporter: &'r mut dyn Reporter,
}

impl Progress<'_> {
    fn enter(&mut self, state: UploadState) {
        self.state = state;
        self.reporter.info(&format!("upload: {state}"));
    }
}

impl<'a, A: DistributionApi> UploadOrchestrator<'a, A> {
    pub fn new(api: &'a A, options: UploadOptions) -> Self {
        Self { api, options }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Upload, commit and distribute the artifact in `request`.
    pub fn upload(
        &self,
        request: &UploadRequest,
        reporter: &mut dyn Reporter,
    ) -> Result<UploadReport, UploadError> {
        let mut progress = Progress {
            state: UploadState::Idle,
            reporter,
        };

        match self.run(request, &mut progress) {
            Ok(report) => Ok(report),
            Err(err) => {
                let terminal = match &err {
                    UploadError::TimedOut { .. } => UploadState::TimedOut,
                    _ => UploadState::Failed,
                };
                progress.reporter.error(&format!(
                    "upload failed while {}: {err}",
                    progress.state
                ));
                progress.enter(terminal);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        request: &UploadRequest,
        progress: &mut Progress<'_>,
    ) -> Result<UploadReport, UploadError> {
        let file_name = request.validate()?;
        if self.options.poll.max_requests == 0 {
            return Err(UploadError::Configuration(
                "status request budget must be at least 1".to_string(),
            ));
        }

        let started_at = Utc::now();
        let file_len = std::fs::metadata(&request.artifact)
            .map_err(|source| UploadError::Artifact {
                path: request.artifact.clone(),
                source,
            })?
            .len();

        self.check_deadline(ProtocolStep::Prepare)?;
        progress.enter(UploadState::Preparing);
        let prepared = self.api.prepare_release(&request.owner, &request.app)?;

        self.check_deadline(ProtocolStep::SetMetadata)?;
        let target = prepared.target();
        let metadata =
            self.api
                .send_metadata(&target, &file_name, file_len, &request.content_type)?;
        let session = open_session(
            prepared.upload_id,
            target,
            metadata.chunk_size,
            metadata.chunk_numbers,
            file_len,
        )?;
        progress.enter(UploadState::MetadataSent);

        let plans = plan_chunks(file_len, session.chunk_size, &session.chunk_numbers);
        progress.enter(UploadState::Uploading {
            chunks: plans.len(),
        });
        let job = ChunkJob {
            target: &session.target,
            artifact: &request.artifact,
            plans: &plans,
            concurrency: self.options.concurrency,
            retry: &self.options.chunk_retry,
            deadline: self.options.deadline,
        };
        chunks::upload_chunks(self.api, &job, progress.reporter)?;

        self.check_deadline(ProtocolStep::FinishUpload)?;
        progress.enter(UploadState::Finishing);
        self.api.finish_upload(&session.target)?;

        self.check_deadline(ProtocolStep::Commit)?;
        progress.enter(UploadState::Committing);
        self.api
            .commit_upload(&request.owner, &request.app, &session.prepared_upload_id)?;

        let (record, poll_attempts) =
            self.poll_until_ready(request, &session, file_len, progress)?;
        progress.enter(UploadState::Ready);

        let outcome = match &record.release_id {
            Some(release_id) => {
                self.check_deadline(ProtocolStep::Distribute)?;
                self.api.distribute(
                    &request.owner,
                    &request.app,
                    release_id,
                    &request.tester_groups,
                    &request.release_notes,
                )?;
                progress.reporter.info(&format!(
                    "release {release_id} distributed to {} tester group(s)",
                    request.tester_groups.len()
                ));
                UploadOutcome::Success
            }
            None => {
                let warning =
                    "artifact was uploaded, but no release id was returned; testers will not be notified"
                        .to_string();
                progress.reporter.warn(&warning);
                UploadOutcome::PartialSuccess { warning }
            }
        };

        Ok(UploadReport {
            upload_id: session.prepared_upload_id,
            release_id: record.release_id,
            outcome,
            chunk_count: plans.len(),
            poll_attempts,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn poll_until_ready(
        &self,
        request: &UploadRequest,
        session: &UploadSession,
        file_len: u64,
        progress: &mut Progress<'_>,
    ) -> Result<(ReleaseRecord, u32), UploadError> {
        let max = self.options.poll.max_requests;
        let delay = self.options.poll.delay_for(file_len);
        let mut last_status = None;

        for attempt in 1..=max {
            self.check_deadline(ProtocolStep::UploadStatus)?;
            progress.enter(UploadState::Polling { attempt });

            let record = self.api.get_upload_status(
                &request.owner,
                &request.app,
                &session.prepared_upload_id,
            )?;
            if record.upload_status.is_ready() {
                return Ok((record, attempt));
            }
            if record.upload_status.is_fatal() {
                return Err(UploadError::UploadRejected {
                    status: record.upload_status,
                    detail: record.error_detail,
                });
            }
            progress
                .reporter
                .info(&format!("upload status: {}", record.upload_status));
            last_status = Some(record.upload_status);

            if attempt < max && !self.options.deadline.sleep(delay) {
                return Err(UploadError::TimedOut {
                    step: ProtocolStep::UploadStatus,
                });
            }
        }

        Err(UploadError::PollingExhausted {
            attempts: max,
            last_status,
        })
    }

    fn check_deadline(&self, step: ProtocolStep) -> Result<(), UploadError> {
        if self.options.deadline.is_expired() {
            return Err(UploadError::TimedOut { step });
        }
        Ok(())
    }
}

fn open_session(
    prepared_upload_id: String,
    target: UploadTarget,
    chunk_size: u64,
    chunk_numbers: Vec<u32>,
    file_len: u64,
) -> Result<UploadSession, UploadError> {
    let step = ProtocolStep::SetMetadata;
    if chunk_size == 0 {
        return Err(UploadError::Protocol {
            step,
            detail: "server declared a chunk size of zero".to_string(),
        });
    }
    let covered = (chunk_numbers.len() as u64).saturating_mul(chunk_size);
    if covered < file_len {
        return Err(UploadError::Protocol {
            step,
            detail: format!(
                "{} chunks of {chunk_size} bytes cannot hold a {file_len} byte artifact",
                chunk_numbers.len()
            ),
        });
    }
    let needed = file_len.div_ceil(chunk_size).max(1);
    if chunk_numbers.len() as u64 > needed {
        return Err(UploadError::Protocol {
            step,
            detail: format!(
                "{} chunks listed but a {file_len} byte artifact fills only {needed} of {chunk_size} bytes",
                chunk_numbers.len()
            ),
        });
    }
    Ok(UploadSession {
        prepared_upload_id,
        target,
        chunk_size,
        chunk_numbers,
    })
}

/// Name of the artifact file, for reports.
pub fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
