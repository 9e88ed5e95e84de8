use std::fmt;

use thiserror::Error;

/// Protocol step a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolStep {
    Prepare,
    SetMetadata,
    UploadChunk,
    FinishUpload,
    Commit,
    UploadStatus,
    Distribute,
}

impl ProtocolStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolStep::Prepare => "prepare release",
            ProtocolStep::SetMetadata => "set metadata",
            ProtocolStep::UploadChunk => "upload chunk",
            ProtocolStep::FinishUpload => "finish upload",
            ProtocolStep::Commit => "commit upload",
            ProtocolStep::UploadStatus => "upload status",
            ProtocolStep::Distribute => "distribute",
        }
    }
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single distribution API request.
#[derive(Debug, Error)]
pub enum DistributionError {
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
        source: reqwest::Error,
    },
}

impl DistributionError {
    pub fn step(&self) -> ProtocolStep {
        match self {
            DistributionError::MalformedResponse { step, .. }
            | DistributionError::Protocol { step, .. }
            | DistributionError::Http { step, .. }
            | DistributionError::Transport { step, .. } => *step,
        }
    }

    pub(crate) fn malformed(step: ProtocolStep, field: &str) -> Self {
        DistributionError::MalformedResponse {
            step,
            field: field.to_string(),
        }
    }
}
