use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};

use appdrop_types::CommitRange;

use crate::{GitQuery, RawTag};

const FIELD_SEPARATOR: char = '\0';
const RECORD_SEPARATOR: char = '\u{1e}';

// name, object type, object, peeled object, annotation
const TAG_FORMAT: &str =
    "--format=%(refname:strip=2)%00%(objecttype)%00%(objectname)%00%(*objectname)%00%(contents)%1e";

/// [`GitQuery`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct SystemGit {
    repo_root: PathBuf,
}

impl SystemGit {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let out = Command::new(git_program())
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .with_context(|| format!("failed to execute git {}; is git installed?", args[0]))?;

        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args[0],
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(out)
    }
}

impl GitQuery for SystemGit {
    fn resolve_tags(&self) -> Result<Vec<RawTag>> {
        let out = self.run(&["for-each-ref", "--merged", "HEAD", TAG_FORMAT, "refs/tags"])?;
        Ok(parse_tag_listing(&String::from_utf8_lossy(&out.stdout)))
    }

    fn commits_between(&self, range: &CommitRange) -> Result<Vec<String>> {
        let revspec = range.to_revspec();
        let out = self.run(&["rev-list", &revspec])?;
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn message_of(&self, commit: &str) -> Result<String> {
        let out = self.run(&["log", "-1", "--format=%B", commit])?;
        Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string())
    }
}

fn parse_tag_listing(listing: &str) -> Vec<RawTag> {
    listing
        .split(RECORD_SEPARATOR)
        .map(|record| record.trim_start_matches(['\n', '\r']))
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.splitn(5, FIELD_SEPARATOR);
            let name = fields.next()?.trim();
            let object_type = fields.next()?.trim();
            let object = fields.next()?.trim();
            let peeled = fields.next()?.trim();
            let contents = fields.next().unwrap_or_default().trim();

            let annotated = object_type == "tag";
            let commit_sha = if annotated && !peeled.is_empty() {
                peeled
            } else {
                object
            };
            if name.is_empty() || commit_sha.is_empty() {
                return None;
            }

            Some(RawTag {
                name: name.to_string(),
                commit_sha: commit_sha.to_string(),
                message: (annotated && !contents.is_empty()).then(|| contents.to_string()),
            })
        })
        .collect()
}

/// Program used for git commands.
pub fn git_program() -> String {
    env::var("APPDROP_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;
    use crate::{GitTagRepository, TagPattern};

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    fn init_git_repo(dir: &Path) {
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
        git(dir, &["config", "tag.gpgsign", "false"]);
    }

    fn make_commit(dir: &Path, msg: &str) -> String {
        git(dir, &["commit", "-q", "--allow-empty", "-m", msg]);
        git(dir, &["rev-parse", "HEAD"])
    }

    #[test]
    fn parse_listing_handles_lightweight_and_annotated_tags() {
        let listing = "build-qa-1\0commit\0aaa\0\0commit message\u{1e}\n\
                       build-qa-2\0tag\0ttt\0bbb\0Release notes\n\nmore\u{1e}\n";
        let tags = parse_tag_listing(listing);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].commit_sha, "aaa");
        assert!(tags[0].message.is_none());
        assert_eq!(tags[1].commit_sha, "bbb");
        assert_eq!(tags[1].message.as_deref(), Some("Release notes\n\nmore"));
    }

    #[test]
    fn parse_listing_skips_garbage() {
        assert!(parse_tag_listing("").is_empty());
        assert!(parse_tag_listing("only-a-name\u{1e}\n").is_empty());
    }

    #[test]
    #[serial]
    fn resolves_tags_reachable_from_head() {
        let td = tempdir().expect("tempdir");
        let dir = td.path();
        init_git_repo(dir);

        let first = make_commit(dir, "initial");
        git(dir, &["tag", "build-feature-1"]);
        let second = make_commit(dir, "second");
        git(dir, &["tag", "-a", "build-feature-2", "-m", "QA build"]);
        git(dir, &["tag", "manual-tag"]);

        git(dir, &["checkout", "-q", "-b", "side"]);
        make_commit(dir, "side work");
        git(dir, &["tag", "build-feature-9"]);
        git(dir, &["checkout", "-q", "-"]);

        let sys = SystemGit::new(dir);
        let tags = sys.resolve_tags().expect("tags");
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"build-feature-1"));
        assert!(names.contains(&"build-feature-2"));
        assert!(!names.contains(&"build-feature-9"));

        let repo = GitTagRepository::new(sys, TagPattern::default());
        let range = repo.find_tag_range("feature").expect("query").expect("range");
        assert_eq!(range.current_build_tag.commit_sha, second);
        assert_eq!(range.current_build_tag.message.as_deref(), Some("QA build"));
        let previous = range.previous_build_tag.expect("previous");
        assert_eq!(previous.commit_sha, first);
        assert!(previous.message.is_none());
    }

    #[test]
    #[serial]
    fn commits_between_is_exclusive_start_inclusive_end_newest_first() {
        let td = tempdir().expect("tempdir");
        let dir = td.path();
        init_git_repo(dir);

        let start = make_commit(dir, "start");
        let middle = make_commit(dir, "middle");
        let end = make_commit(dir, "end\n\nCHANGELOG: body line");

        let sys = SystemGit::new(dir);
        let commits = sys
            .commits_between(&CommitRange {
                from: Some(start.clone()),
                to: end.clone(),
            })
            .expect("commits");
        assert_eq!(commits, vec![end.clone(), middle]);

        let all = sys
            .commits_between(&CommitRange {
                from: None,
                to: end.clone(),
            })
            .expect("commits");
        assert_eq!(all.len(), 3);
        assert_eq!(all.last(), Some(&start));

        let message = sys.message_of(&end).expect("message");
        assert_eq!(message, "end\n\nCHANGELOG: body line");
    }

    #[test]
    #[serial]
    fn git_failures_are_surfaced() {
        let td = tempdir().expect("tempdir");
        let bin = td.path().join("bin");
        fs::create_dir_all(&bin).expect("mkdir");

        #[cfg(not(windows))]
        let fake_git = {
            use std::os::unix::fs::PermissionsExt;

            let path = bin.join("git");
            fs::write(&path, "#!/usr/bin/env sh\necho 'fatal: mock failure' >&2\nexit 128\n")
                .expect("write fake git");
            let mut perms = fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).expect("chmod");
            path
        };

        #[cfg(windows)]
        let fake_git = {
            let path = bin.join("git.cmd");
            fs::write(&path, "@echo off\r\necho fatal: mock failure 1>&2\r\nexit /b 128\r\n")
                .expect("write fake git");
            path
        };

        temp_env::with_var("APPDROP_GIT_BIN", Some(&fake_git), || {
            let sys = SystemGit::new(td.path());
            let err = sys.resolve_tags().expect_err("must fail");
            assert!(format!("{err:#}").contains("git for-each-ref failed: fatal: mock failure"));

            let err = sys.message_of("HEAD").expect_err("must fail");
            assert!(format!("{err:#}").contains("git log failed"));
        });
    }

    #[test]
    #[serial]
    fn missing_git_binary_is_reported() {
        let td = tempdir().expect("tempdir");
        temp_env::with_var("APPDROP_GIT_BIN", Some(td.path().join("no-such-git")), || {
            let err = SystemGit::new(td.path()).resolve_tags().expect_err("must fail");
            assert!(format!("{err:#}").contains("is git installed?"));
        });
    }
}
