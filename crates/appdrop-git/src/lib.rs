//! Git operations for appdrop.
//!
//! This crate reads build tags from a repository and resolves the tag range
//! a release changelog is built from. Access to git goes through the
//! [`GitQuery`] trait; [`SystemGit`] implements it by running the `git`
//! binary (overridable with `APPDROP_GIT_BIN`).
//!
//! # Example
//!
//! ```no_run
//! use appdrop_git::{GitTagRepository, SystemGit, TagPattern};
//! use std::path::Path;
//!
//! let repo = GitTagRepository::new(SystemGit::new(Path::new(".")), TagPattern::default());
//! if let Some(tag) = repo.find_recent_build_tag("debug").expect("git") {
//!     println!("building {} ({})", tag.name, tag.build_number);
//! }
//! ```

mod pattern;
mod system;

use anyhow::Result;
use appdrop_types::{BuildTag, CommitRange, TagRange};

pub use pattern::{DEFAULT_TAG_PATTERN, TagParseError, TagPattern};
pub use system::{SystemGit, git_program};

/// A tag as listed by git, before build-tag parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTag {
    pub name: String,
    /// Commit the tag resolves to
    pub commit_sha: String,
    /// Annotation message; `None` for lightweight tags
    pub message: Option<String>,
}

/// Read access to repository history.
pub trait GitQuery {
    /// Tags reachable from HEAD, in git's listing order.
    fn resolve_tags(&self) -> Result<Vec<RawTag>>;

    /// Commits in `range`, newest first.
    fn commits_between(&self, range: &CommitRange) -> Result<Vec<String>>;

    /// Full message of `commit`.
    fn message_of(&self, commit: &str) -> Result<String>;
}

impl<G: GitQuery + ?Sized> GitQuery for &G {
    fn resolve_tags(&self) -> Result<Vec<RawTag>> {
        (**self).resolve_tags()
    }

    fn commits_between(&self, range: &CommitRange) -> Result<Vec<String>> {
        (**self).commits_between(range)
    }

    fn message_of(&self, commit: &str) -> Result<String> {
        (**self).message_of(commit)
    }
}

/// Build-tag queries over a repository.
#[derive(Debug, Clone)]
pub struct GitTagRepository<G> {
    git: G,
    pattern: TagPattern,
}

impl<G: GitQuery> GitTagRepository<G> {
    pub fn new(git: G, pattern: TagPattern) -> Self {
        Self { git, pattern }
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    pub fn pattern(&self) -> &TagPattern {
        &self.pattern
    }

    /// Build tags of `variant`, highest build number first.
    ///
    /// Tags that do not follow the naming pattern, or belong to another
    /// variant, are skipped. Among tags sharing a build number the one git
    /// lists first comes first.
    pub fn build_tags(&self, variant: &str) -> Result<Vec<BuildTag>> {
        let mut tags: Vec<BuildTag> = self
            .git
            .resolve_tags()?
            .iter()
            .filter_map(|raw| self.pattern.parse(raw).ok())
            .filter(|tag| tag.build_variant == variant)
            .collect();
        tags.sort_by(|a, b| b.build_number.cmp(&a.build_number));
        Ok(tags)
    }

    /// Most recent build tag of `variant`, or `None` before the first build.
    pub fn find_recent_build_tag(&self, variant: &str) -> Result<Option<BuildTag>> {
        Ok(self.build_tags(variant)?.into_iter().next())
    }

    /// Current and previous build tags of `variant`.
    pub fn find_tag_range(&self, variant: &str) -> Result<Option<TagRange>> {
        let mut tags = self.build_tags(variant)?.into_iter();
        let Some(current_build_tag) = tags.next() else {
            return Ok(None);
        };
        let previous_build_tag = tags.find(|tag| tag.build_number < current_build_tag.build_number);
        Ok(Some(TagRange {
            previous_build_tag,
            current_build_tag,
        }))
    }
}
