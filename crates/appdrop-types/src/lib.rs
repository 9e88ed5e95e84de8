//! Core domain types for appdrop.
//!
//! This crate provides the types shared across the appdrop workspace:
//! build tags read from git history, the tag and commit ranges a changelog
//! is built from, and the release record the distribution service reports
//! after an upload is committed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version name used when a variant has no build tag yet.
pub const DEFAULT_VERSION_NAME: &str = "v0.0-dev";

/// Version code used when a variant has no build tag yet.
pub const DEFAULT_VERSION_CODE: u32 = 1;

/// A build tag parsed from a git tag name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTag {
    /// Full tag name, also used as the display/semantic version name
    pub name: String,
    /// Commit the tag points to (peeled for annotated tags)
    pub commit_sha: String,
    /// Annotation message, if the tag is annotated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Monotonic per-variant build number
    pub build_number: u32,
    /// Build variant discriminator encoded in the tag name
    pub build_variant: String,
}

impl BuildTag {
    /// Suggest the next tag for this variant by bumping the build number.
    ///
    /// The last standalone occurrence of the build number in the tag name is
    /// replaced, so `build-feature-42` becomes `build-feature-43` and
    /// `v1.0.42-debug` becomes `v1.0.43-debug`.
    pub fn increment(&self) -> Tag {
        let current = self.build_number.to_string();
        let next = self.build_number.saturating_add(1).to_string();
        let name = match last_standalone_number(&self.name, &current) {
            Some(idx) => format!(
                "{}{}{}",
                &self.name[..idx],
                next,
                &self.name[idx + current.len()..]
            ),
            None => format!("{}-{}", self.name, next),
        };
        Tag::Increment { name }
    }
}

fn last_standalone_number(haystack: &str, number: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    haystack
        .rmatch_indices(number)
        .map(|(idx, _)| idx)
        .find(|&idx| {
            let before = idx.checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(idx + number.len()).copied();
            !before.is_some_and(|b| b.is_ascii_digit()) && !after.is_some_and(|b| b.is_ascii_digit())
        })
}

/// A point in version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tag {
    /// A build tag found in the repository
    Build(BuildTag),
    /// A suggested, not yet created, tag name
    Increment { name: String },
}

impl Tag {
    /// Tag name
    pub fn name(&self) -> &str {
        match self {
            Tag::Build(build) => &build.name,
            Tag::Increment { name } => name,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The (previous, current) build-tag pair bounding one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRange {
    /// Build tag preceding the current one; `None` for the first build
    pub previous_build_tag: Option<BuildTag>,
    /// Most recent build tag of the variant
    pub current_build_tag: BuildTag,
}

impl TagRange {
    /// Whether both ends of the range mark the same commit.
    pub fn is_same_commit(&self) -> bool {
        self.previous_build_tag
            .as_ref()
            .is_some_and(|prev| prev.commit_sha == self.current_build_tag.commit_sha)
    }

    /// Commit range covered by this tag range.
    pub fn as_commit_range(&self) -> CommitRange {
        CommitRange {
            from: self
                .previous_build_tag
                .as_ref()
                .map(|tag| tag.commit_sha.clone()),
            to: self.current_build_tag.commit_sha.clone(),
        }
    }
}

/// Commit range, exclusive start and inclusive end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    /// Exclusive start; `None` means the whole history up to `to`
    pub from: Option<String>,
    /// Inclusive end
    pub to: String,
}

impl CommitRange {
    /// Revision spec understood by `git log`/`git rev-list`.
    pub fn to_revspec(&self) -> String {
        match &self.from {
            Some(from) => format!("{from}..{}", self.to),
            None => self.to.clone(),
        }
    }
}

/// Version code and name derived from the most recent build tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub code: u32,
    pub name: String,
}

/// Derive the version for a build from its most recent tag.
pub fn version_for(tag: Option<&BuildTag>) -> VersionInfo {
    match tag {
        Some(tag) => VersionInfo {
            code: tag.build_number,
            name: tag.name.clone(),
        },
        None => VersionInfo {
            code: DEFAULT_VERSION_CODE,
            name: DEFAULT_VERSION_NAME.to_string(),
        },
    }
}

/// Server-side status of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UploadStatus {
    Pending,
    UploadStarted,
    UploadFinished,
    Processing,
    ReadyToBePublished,
    MalwareDetected,
    Error,
    /// Any status this client does not know about
    Other(String),
}

impl UploadStatus {
    /// Whether the server is still working on the upload.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            UploadStatus::Pending
                | UploadStatus::UploadStarted
                | UploadStatus::UploadFinished
                | UploadStatus::Processing
                | UploadStatus::Other(_)
        )
    }

    /// Whether the release can be distributed.
    pub fn is_ready(&self) -> bool {
        matches!(self, UploadStatus::ReadyToBePublished)
    }

    /// Whether the server rejected the upload for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UploadStatus::MalwareDetected | UploadStatus::Error)
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::UploadStarted => "uploadStarted",
            UploadStatus::UploadFinished => "uploadFinished",
            UploadStatus::Processing => "processing",
            UploadStatus::ReadyToBePublished => "readyToBePublished",
            UploadStatus::MalwareDetected => "malwareDetected",
            UploadStatus::Error => "error",
            UploadStatus::Other(other) => other,
        }
    }
}

impl From<&str> for UploadStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => UploadStatus::Pending,
            "uploadStarted" => UploadStatus::UploadStarted,
            "uploadFinished" => UploadStatus::UploadFinished,
            "processing" => UploadStatus::Processing,
            "readyToBePublished" => UploadStatus::ReadyToBePublished,
            "malwareDetected" => UploadStatus::MalwareDetected,
            "error" => UploadStatus::Error,
            other => UploadStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for UploadStatus {
    fn from(value: String) -> Self {
        UploadStatus::from(value.as_str())
    }
}

impl From<UploadStatus> for String {
    fn from(value: UploadStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release record reported by the distribution service after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Prepared upload id the record belongs to
    pub upload_id: String,
    pub upload_status: UploadStatus,
    /// Release id, present once the release is distributable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    /// Server-provided failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}
