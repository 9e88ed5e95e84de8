//! Changelog extraction from commit messages between two build tags.

use anyhow::Result;

use appdrop_git::{GitQuery, GitTagRepository};
use appdrop_types::TagRange;

use crate::Reporter;

/// Marker prefixed to every extracted changelog line
pub const BULLET: &str = "• ";

/// Builds release changelogs from commit messages tagged with a key.
pub struct ChangelogBuilder<G> {
    repo: GitTagRepository<G>,
    message_key: String,
}

impl<G: GitQuery> ChangelogBuilder<G> {
    pub fn new(repo: GitTagRepository<G>, message_key: &str) -> Self {
        Self {
            repo,
            message_key: message_key.to_string(),
        }
    }

    pub fn repository(&self) -> &GitTagRepository<G> {
        &self.repo
    }

    /// Changelog of the latest `variant` build.
    ///
    /// Returns `None` when the variant has no build tag yet. When the range
    /// yields no text, `default_supplier` decides the result.
    pub fn build_changelog<F>(
        &self,
        variant: &str,
        reporter: &mut dyn Reporter,
        default_supplier: F,
    ) -> Result<Option<String>>
    where
        F: FnOnce(&TagRange) -> Option<String>,
    {
        let Some(range) = self.repo.find_tag_range(variant)? else {
            reporter.warn(&format!(
                "failed to build a changelog: no build tags for variant {variant}"
            ));
            return Ok(None);
        };

        match self.changelog_for_range(&range)? {
            Some(changelog) => Ok(Some(changelog)),
            None => Ok(default_supplier(&range)),
        }
    }

    /// Changelog text for `range`, or `None` when it would be blank.
    pub fn changelog_for_range(&self, range: &TagRange) -> Result<Option<String>> {
        let mut out = String::new();

        if let Some(message) = &range.current_build_tag.message
            && !message.trim().is_empty()
        {
            out.push_str(message.trim_end());
            out.push_str("\n\n");
        }

        // Same-commit tags and first builds only carry the annotation.
        if range.previous_build_tag.is_some() && !range.is_same_commit() {
            let git = self.repo.git();
            for commit in git.commits_between(&range.as_commit_range())? {
                let message = git.message_of(&commit)?;
                for line in message.lines() {
                    if let Some(entry) = format_line(line, &self.message_key) {
                        out.push_str(&entry);
                        out.push('\n');
                    }
                }
            }
        }

        Ok((!out.trim().is_empty()).then_some(out))
    }
}

/// Reformat one commit-message line into a changelog entry.
///
/// Text following `key` becomes the entry; a separating colon and
/// surrounding whitespace are dropped. Lines without the key, or with
/// nothing after it, give `None`.
///
/// ```
/// use appdrop::changelog::format_line;
///
/// assert_eq!(format_line("Fixes CHANGELOG: login crash", "CHANGELOG").as_deref(), Some("• login crash"));
/// assert_eq!(format_line("plain commit", "CHANGELOG"), None);
/// ```
pub fn format_line(line: &str, key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let idx = line.find(key)?;
    let rest = line[idx + key.len()..]
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .trim_end();
    if rest.is_empty() {
        return None;
    }
    Some(format!("{BULLET}{rest}"))
}
