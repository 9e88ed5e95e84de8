//! Decoding of distribution API response bodies.
//!
//! Bodies are read as loose JSON first so a missing or mistyped field can be
//! reported by name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use appdrop_types::{ReleaseRecord, UploadStatus};

use crate::error::{DistributionError, ProtocolStep};

/// Status code the upload domain reports for accepted metadata.
pub const METADATA_SUCCESS: &str = "Success";

/// Upload session issued by `prepare_release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedRelease {
    /// Prepared upload id
    pub upload_id: String,
    pub package_asset_id: String,
    /// Upload host; the default domain applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_domain: Option<String>,
    /// Upload token, already url-encoded by the server
    pub url_encoded_token: String,
}

/// Chunking instructions returned by `send_metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub chunk_size: u64,
    /// Server-assigned chunk numbers, in upload order
    pub chunk_numbers: Vec<u32>,
    pub status_code: String,
}

pub(crate) fn parse_body(step: ProtocolStep, body: &str) -> Result<Value, DistributionError> {
    serde_json::from_str(body).map_err(|_| DistributionError::malformed(step, "<body>"))
}

fn required_str(step: ProtocolStep, value: &Value, field: &str) -> Result<String, DistributionError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DistributionError::malformed(step, field))
}

fn optional_str(step: ProtocolStep, value: &Value, field: &str) -> Result<Option<String>, DistributionError> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DistributionError::malformed(step, field)),
    }
}

pub(crate) fn prepared_release(value: &Value) -> Result<PreparedRelease, DistributionError> {
    let step = ProtocolStep::Prepare;
    Ok(PreparedRelease {
        upload_id: required_str(step, value, "id")?,
        package_asset_id: required_str(step, value, "package_asset_id")?,
        upload_domain: optional_str(step, value, "upload_domain")?.filter(|d| !d.is_empty()),
        url_encoded_token: required_str(step, value, "url_encoded_token")?,
    })
}

pub(crate) fn upload_metadata(value: &Value) -> Result<UploadMetadata, DistributionError> {
    let step = ProtocolStep::SetMetadata;

    let status_code = required_str(step, value, "status_code")?;
    if status_code != METADATA_SUCCESS {
        return Err(DistributionError::Protocol {
            step,
            detail: format!("metadata rejected with status {status_code}"),
        });
    }

    let chunk_size = value
        .get("chunk_size")
        .and_then(Value::as_u64)
        .ok_or_else(|| DistributionError::malformed(step, "chunk_size"))?;

    let chunk_numbers = value
        .get("chunk_list")
        .and_then(Value::as_array)
        .ok_or_else(|| DistributionError::malformed(step, "chunk_list"))?
        .iter()
        .map(|n| {
            n.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| DistributionError::malformed(step, "chunk_list"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UploadMetadata {
        chunk_size,
        chunk_numbers,
        status_code,
    })
}

pub(crate) fn release_record(value: &Value) -> Result<ReleaseRecord, DistributionError> {
    let step = ProtocolStep::UploadStatus;
    Ok(ReleaseRecord {
        upload_id: required_str(step, value, "id")?,
        upload_status: UploadStatus::from(required_str(step, value, "upload_status")?),
        release_id: release_id(value)?,
        error_detail: optional_str(step, value, "error_details")?,
    })
}

// The release id is a string on current servers and a number on some older ones.
fn release_id(value: &Value) -> Result<Option<String>, DistributionError> {
    match value.get("release_distinct_id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(DistributionError::malformed(
            ProtocolStep::UploadStatus,
            "release_distinct_id",
        )),
    }
}
