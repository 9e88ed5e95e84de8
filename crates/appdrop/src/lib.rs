//! # appdrop
//!
//! Build-tag driven changelogs and chunked release uploads for mobile apps.
//!
//! ## Pipeline
//!
//! 1. [`git::GitTagRepository::find_tag_range`] locates the latest build tag
//!    of a variant and its predecessor.
//! 2. [`changelog::ChangelogBuilder`] turns the commit messages between the
//!    two tags into a bulleted changelog.
//! 3. [`upload::UploadOrchestrator`] pushes the artifact through the
//!    distribution protocol (prepare, metadata, chunks, finish, commit,
//!    status polling) and hands the release to tester groups.
//!
//! The library never prints. Progress goes through a [`Reporter`].

pub mod changelog;
pub mod upload;

pub use appdrop_distribution as distribution;
pub use appdrop_git as git;
pub use appdrop_retry as retry;
pub use appdrop_types as types;

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}
