use std::io;
use std::path::PathBuf;

use thiserror::Error;

use appdrop_distribution::{DistributionError, ProtocolStep};
use appdrop_types::UploadStatus;

/// Why an upload failed. Every variant is terminal for the upload attempt.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload configuration: {0}")]
    Configuration(String),

    #[error("{step}: response field `{field}` is missing or malformed")]
    MalformedResponse { step: ProtocolStep, field: String },

    #[error("{step}: {detail}")]
    Protocol { step: ProtocolStep, detail: String },

    #[error("{step}: server answered {status}: {body}")]
    Http {
        step: ProtocolStep,
        status: u16,
        body: String,
    },

    #[error("{step}: request failed")]
    Transport {
        step: ProtocolStep,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(
        "release still not ready after {attempts} status requests (last status: {})",
        last_status.as_ref().map_or("none", UploadStatus::as_str)
    )]
    PollingExhausted {
        attempts: u32,
        last_status: Option<UploadStatus>,
    },

    #[error(
        "upload rejected with status {status}: {}",
        detail.as_deref().unwrap_or("no detail given")
    )]
    UploadRejected {
        status: UploadStatus,
        detail: Option<String>,
    },

    #[error("deadline passed during {step}")]
    TimedOut { step: ProtocolStep },

    #[error("failed to read artifact {}", path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    /// Whether re-sending the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Transport { .. } => true,
            UploadError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<DistributionError> for UploadError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::MalformedResponse { step, field } => {
                UploadError::MalformedResponse { step, field }
            }
            DistributionError::Protocol { step, detail } => UploadError::Protocol { step, detail },
            DistributionError::Http { step, status, body } => {
                UploadError::Http { step, status, body }
            }
            DistributionError::Transport { step, source } => UploadError::Transport {
                step,
                source: Box::new(source),
            },
        }
    }
}
