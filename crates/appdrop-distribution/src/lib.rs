//! Distribution service client for appdrop.
//!
//! This crate speaks the chunked release upload protocol of an
//! App Center style distribution service. Every step is one synchronous
//! request; nothing here retries or keeps state between calls.
//!
//! Steps, in protocol order:
//! 1. [`DistributionApi::prepare_release`] opens an upload session
//! 2. [`DistributionApi::send_metadata`] declares the artifact and receives the chunk layout
//! 3. [`DistributionApi::upload_chunk`] sends each chunk
//! 4. [`DistributionApi::finish_upload`] closes the binary upload
//! 5. [`DistributionApi::commit_upload`] asks the service to build a release
//! 6. [`DistributionApi::get_upload_status`] polls the release record
//! 7. [`DistributionApi::distribute`] hands the release to tester groups
//!
//! # Example
//!
//! ```no_run
//! use appdrop_distribution::{DistributionApi, DistributionClient};
//!
//! let client = DistributionClient::appcenter("api-token");
//! let prepared = client.prepare_release("acme", "Sample-debug")?;
//! let target = prepared.target();
//! println!("uploading to {}", target.domain);
//! # Ok::<(), appdrop_distribution::DistributionError>(())
//! ```

mod error;
mod response;

use std::time::Duration;

use reqwest::blocking::RequestBuilder;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use appdrop_types::ReleaseRecord;

pub use error::{DistributionError, ProtocolStep};
pub use response::{METADATA_SUCCESS, PreparedRelease, UploadMetadata};

/// Default distribution API host
pub const DEFAULT_API_BASE: &str = "https://api.appcenter.ms";

/// Upload host used when `prepare_release` does not name one
pub const DEFAULT_UPLOAD_DOMAIN: &str = "https://file.appcenter.ms";

/// Content type declared for Android packages
pub const APK_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

/// Default timeout for API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for API requests
pub const USER_AGENT: &str = concat!("appdrop/", env!("CARGO_PKG_VERSION"));

const API_TOKEN_HEADER: &str = "X-API-Token";
const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Where the binary part of an upload goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub domain: String,
    pub package_asset_id: String,
    pub url_encoded_token: String,
}

impl PreparedRelease {
    /// Upload target of this session, falling back to the default domain.
    pub fn target(&self) -> UploadTarget {
        UploadTarget {
            domain: self
                .upload_domain
                .clone()
                .unwrap_or_else(|| DEFAULT_UPLOAD_DOMAIN.to_string()),
            package_asset_id: self.package_asset_id.clone(),
            url_encoded_token: self.url_encoded_token.clone(),
        }
    }
}

/// The release upload protocol, one method per request.
pub trait DistributionApi: Send + Sync {
    fn prepare_release(&self, owner: &str, app: &str) -> Result<PreparedRelease, DistributionError>;

    fn send_metadata(
        &self,
        target: &UploadTarget,
        file_name: &str,
        file_size: u64,
        content_type: &str,
    ) -> Result<UploadMetadata, DistributionError>;

    /// Send the bytes of one chunk under its server-assigned number.
    fn upload_chunk(
        &self,
        target: &UploadTarget,
        chunk_number: u32,
        bytes: Vec<u8>,
    ) -> Result<(), DistributionError>;

    fn finish_upload(&self, target: &UploadTarget) -> Result<(), DistributionError>;

    fn commit_upload(&self, owner: &str, app: &str, upload_id: &str) -> Result<(), DistributionError>;

    fn get_upload_status(
        &self,
        owner: &str,
        app: &str,
        upload_id: &str,
    ) -> Result<ReleaseRecord, DistributionError>;

    fn distribute(
        &self,
        owner: &str,
        app: &str,
        release_id: &str,
        tester_groups: &[String],
        release_notes: &str,
    ) -> Result<(), DistributionError>;
}

/// HTTP implementation of [`DistributionApi`].
#[derive(Debug, Clone)]
pub struct DistributionClient {
    api_base: String,
    token: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl DistributionClient {
    /// Create a client for the API at `api_base`, authenticated with `token`.
    pub fn new(api_base: &str, token: &str) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout,
            client: build_http_client(timeout),
        }
    }

    /// Create a client for the public App Center API.
    pub fn appcenter(token: &str) -> Self {
        Self::new(DEFAULT_API_BASE, token)
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_http_client(timeout);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn uploads_url(&self, owner: &str, app: &str) -> String {
        format!("{}/v0.1/apps/{owner}/{app}/uploads/releases", self.api_base)
    }

    fn send(&self, step: ProtocolStep, request: RequestBuilder) -> Result<String, DistributionError> {
        let response = request
            .header(API_TOKEN_HEADER, &self.token)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .send()
            .map_err(|source| DistributionError::Transport { step, source })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|source| DistributionError::Transport { step, source })?;

        if !status.is_success() {
            return Err(DistributionError::Http {
                step,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn build_http_client(timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

// The token is already url-encoded and goes into the query verbatim.
fn upload_url(target: &UploadTarget, action: &str) -> String {
    format!(
        "{}/upload/{action}/{}?token={}",
        target.domain.trim_end_matches('/'),
        target.package_asset_id,
        target.url_encoded_token
    )
}

/// Form value of the `destinations` field.
pub fn destinations_json(tester_groups: &[String]) -> String {
    let groups: Vec<_> = tester_groups
        .iter()
        .map(|name| json!({ "name": name }))
        .collect();
    serde_json::Value::Array(groups).to_string()
}

impl DistributionApi for DistributionClient {
    fn prepare_release(&self, owner: &str, app: &str) -> Result<PreparedRelease, DistributionError> {
        let step = ProtocolStep::Prepare;
        let body = self.send(
            step,
            self.client
                .post(self.uploads_url(owner, app))
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body("{}"),
        )?;
        response::prepared_release(&response::parse_body(step, &body)?)
    }

    fn send_metadata(
        &self,
        target: &UploadTarget,
        file_name: &str,
        file_size: u64,
        content_type: &str,
    ) -> Result<UploadMetadata, DistributionError> {
        let step = ProtocolStep::SetMetadata;
        let file_size = file_size.to_string();
        let body = self.send(
            step,
            self.client
                .post(upload_url(target, "set_metadata"))
                .query(&[
                    ("file_name", file_name),
                    ("file_size", file_size.as_str()),
                    ("content_type", content_type),
                ])
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE),
        )?;
        response::upload_metadata(&response::parse_body(step, &body)?)
    }

    fn upload_chunk(
        &self,
        target: &UploadTarget,
        chunk_number: u32,
        bytes: Vec<u8>,
    ) -> Result<(), DistributionError> {
        self.send(
            ProtocolStep::UploadChunk,
            self.client
                .post(upload_url(target, "upload_chunk"))
                .query(&[("block_number", chunk_number)])
                .header(CONTENT_TYPE, OCTET_STREAM)
                .body(bytes),
        )?;
        Ok(())
    }

    fn finish_upload(&self, target: &UploadTarget) -> Result<(), DistributionError> {
        self.send(
            ProtocolStep::FinishUpload,
            self.client
                .post(upload_url(target, "finished"))
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE),
        )?;
        Ok(())
    }

    fn commit_upload(&self, owner: &str, app: &str, upload_id: &str) -> Result<(), DistributionError> {
        self.send(
            ProtocolStep::Commit,
            self.client
                .patch(format!("{}/{upload_id}", self.uploads_url(owner, app)))
                .form(&[("upload_status", "uploadFinished"), ("id", upload_id)]),
        )?;
        Ok(())
    }

    fn get_upload_status(
        &self,
        owner: &str,
        app: &str,
        upload_id: &str,
    ) -> Result<ReleaseRecord, DistributionError> {
        let step = ProtocolStep::UploadStatus;
        let body = self.send(
            step,
            self.client
                .get(format!("{}/{upload_id}", self.uploads_url(owner, app))),
        )?;
        response::release_record(&response::parse_body(step, &body)?)
    }

    fn distribute(
        &self,
        owner: &str,
        app: &str,
        release_id: &str,
        tester_groups: &[String],
        release_notes: &str,
    ) -> Result<(), DistributionError> {
        let destinations = destinations_json(tester_groups);
        self.send(
            ProtocolStep::Distribute,
            self.client
                .patch(format!(
                    "{}/v0.1/apps/{owner}/{app}/releases/{release_id}",
                    self.api_base
                ))
                .form(&[
                    ("destinations", destinations.as_str()),
                    ("release_notes", release_notes),
                    ("notify_testers", "true"),
                ]),
        )?;
        Ok(())
    }
}
