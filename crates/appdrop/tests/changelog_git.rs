use std::path::Path;
use std::process::Command;

use serial_test::serial;
use tempfile::tempdir;

use appdrop::Reporter;
use appdrop::changelog::ChangelogBuilder;
use appdrop::git::{GitTagRepository, SystemGit, TagPattern};

#[derive(Default)]
struct Collecting {
    warnings: Vec<String>,
}

impl Reporter for Collecting {
    fn info(&mut self, _msg: &str) {}

    fn warn(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn error(&mut self, _msg: &str) {}
}

fn git(dir: &Path, args: &[&str]) {
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
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "tag.gpgsign", "false"]);
}

fn commit(dir: &Path, msg: &str) {
    git(dir, &["commit", "-q", "--allow-empty", "-m", msg]);
}

fn builder(dir: &Path) -> ChangelogBuilder<SystemGit> {
    let repo = GitTagRepository::new(SystemGit::new(dir), TagPattern::default());
    ChangelogBuilder::new(repo, "CHANGELOG")
}

#[test]
#[serial]
fn changelog_between_two_builds_of_a_real_repo() {
    let td = tempdir().expect("tempdir");
    let dir = td.path();
    init_repo(dir);

    commit(dir, "Initial import");
    git(dir, &["tag", "build-qa-1"]);
    commit(dir, "Fixes CHANGELOG: login crash");
    commit(dir, "Internal refactoring");
    commit(dir, "Onboarding\n\nCHANGELOG: new onboarding screens");
    git(dir, &["tag", "-a", "build-qa-2", "-m", "Sprint 14"]);

    let mut reporter = Collecting::default();
    let changelog = builder(dir)
        .build_changelog("qa", &mut reporter, |_| None)
        .expect("changelog")
        .expect("some changelog");

    assert!(changelog.starts_with("Sprint 14\n\n"));
    assert!(changelog.contains("• login crash\n"));
    assert!(changelog.contains("• new onboarding screens\n"));
    assert!(!changelog.contains("refactoring"));
    assert!(!changelog.contains("Initial import"));
    assert!(reporter.warnings.is_empty());
}

#[test]
#[serial]
fn variants_do_not_mix() {
    let td = tempdir().expect("tempdir");
    let dir = td.path();
    init_repo(dir);

    commit(dir, "CHANGELOG: first");
    git(dir, &["tag", "build-release-1"]);
    commit(dir, "CHANGELOG: second");
    git(dir, &["tag", "build-qa-7"]);

    let builder = builder(dir);
    let range = builder
        .repository()
        .find_tag_range("release")
        .expect("git")
        .expect("range");
    assert_eq!(range.current_build_tag.name, "build-release-1");
    assert!(range.previous_build_tag.is_none());

    let mut reporter = Collecting::default();
    let missing = builder
        .build_changelog("beta", &mut reporter, |_| Some("unused".to_string()))
        .expect("changelog");
    assert!(missing.is_none());
    assert_eq!(reporter.warnings.len(), 1);
}
