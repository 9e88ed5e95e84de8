use regex::Regex;
use thiserror::Error;

use appdrop_types::BuildTag;

use crate::RawTag;

/// Tag naming convention used when none is configured.
pub const DEFAULT_TAG_PATTERN: &str = "build-{variant}-{build}";

const VARIANT_PLACEHOLDER: &str = "{variant}";
const BUILD_PLACEHOLDER: &str = "{build}";

/// Why a tag name is not a build tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagParseError {
    #[error("tag {0:?} does not follow the build tag pattern")]
    NoMatch(String),
    #[error("tag {name:?} has an invalid build number {number:?}")]
    InvalidBuildNumber { name: String, number: String },
}

/// Build tag naming convention.
///
/// A template such as `build-{variant}-{build}` or `v*.{build}-{variant}`.
/// `{variant}` and `{build}` are required placeholders, `*` matches any
/// text and everything else is literal.
#[derive(Debug, Clone)]
pub struct TagPattern {
    template: String,
    regex: Regex,
}

impl TagPattern {
    pub fn new(template: &str) -> anyhow::Result<Self> {
        if !template.contains(VARIANT_PLACEHOLDER) || !template.contains(BUILD_PLACEHOLDER) {
            anyhow::bail!(
                "tag pattern {template:?} must contain both {VARIANT_PLACEHOLDER} and {BUILD_PLACEHOLDER}"
            );
        }

        let mut source = String::from("^");
        let mut rest = template;
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix(VARIANT_PLACEHOLDER) {
                source.push_str("(?P<variant>.+?)");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix(BUILD_PLACEHOLDER) {
                source.push_str(r"(?P<build>\d+)");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('*') {
                source.push_str(".*?");
                rest = tail;
            } else {
                let next = rest
                    .char_indices()
                    .skip(1)
                    .find(|(_, c)| *c == '{' || *c == '*')
                    .map(|(idx, _)| idx)
                    .unwrap_or(rest.len());
                source.push_str(&regex::escape(&rest[..next]));
                rest = &rest[next..];
            }
        }
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| anyhow::anyhow!("invalid tag pattern {template:?}: {e}"))?;
        Ok(Self {
            template: template.to_string(),
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parse a listed tag into a build tag.
    pub fn parse(&self, raw: &RawTag) -> Result<BuildTag, TagParseError> {
        let captures = self
            .regex
            .captures(&raw.name)
            .ok_or_else(|| TagParseError::NoMatch(raw.name.clone()))?;
        let number = &captures["build"];
        let build_number =
            number
                .parse::<u32>()
                .map_err(|_| TagParseError::InvalidBuildNumber {
                    name: raw.name.clone(),
                    number: number.to_string(),
                })?;

        Ok(BuildTag {
            name: raw.name.clone(),
            commit_sha: raw.commit_sha.clone(),
            message: raw.message.clone(),
            build_number,
            build_variant: captures["variant"].to_string(),
        })
    }

    /// Name of the tag for `variant` and `build_number`.
    pub fn render(&self, variant: &str, build_number: u32) -> Option<String> {
        if self.template.contains('*') {
            return None;
        }
        Some(
            self.template
                .replace(VARIANT_PLACEHOLDER, variant)
                .replace(BUILD_PLACEHOLDER, &build_number.to_string()),
        )
    }
}

impl Default for TagPattern {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_PATTERN).expect("default tag pattern is valid")
    }
}
