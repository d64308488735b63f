//! Error types for the synchronization engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::alert::Severity;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// libgit2 error from a read-only repository query
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested commit-ish does not resolve
    #[error("Revision '{revision}' does not resolve in {}", .dir.display())]
    InvalidRevision {
        /// The revision as requested
        revision: String,
        /// Repository it was resolved in
        dir: PathBuf,
    },

    /// The shared-root lock was not acquired within its wait budget
    #[error("Timed out after {waited:?} waiting for lock '{name}'")]
    LockTimeout {
        /// Lock token name
        name: String,
        /// How long we waited
        waited: Duration,
    },

    /// A bounded external call exceeded its budget
    #[error("`{command}` timed out after {timeout:?}")]
    OperationTimeout {
        /// Command line that timed out
        command: String,
        /// Budget that was exceeded
        timeout: Duration,
    },

    /// A bounded external call exited unsuccessfully
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// Command line that failed
        command: String,
        /// Exit status description
        status: String,
        /// Captured stderr, trimmed
        stderr: String,
    },

    /// An automatic merge or rebase could not complete and was aborted
    #[error("{operation} of '{incoming}' onto '{onto}' conflicts in {}; aborted, manual resolution required", .dir.display())]
    MergeConflict {
        /// "merge" or "rebase"
        operation: &'static str,
        /// What was being brought in
        incoming: String,
        /// What it was applied onto
        onto: String,
        /// Repository the conflict happened in
        dir: PathBuf,
    },

    /// The remote branch moved since the local branch was based on it
    #[error("Push to '{branch}' was rejected because the remote moved; rolled back to {rolled_back_to}")]
    PushRace {
        /// Remote branch we tried to advance
        branch: String,
        /// Local commit the branch was reset to
        rolled_back_to: String,
    },

    /// The deploy-merge push protocol was aimed at something that is not a branch
    #[error("'{revision}' is not a branch on the remote; refusing to push a merge to it")]
    NotABranch {
        /// The target revision
        revision: String,
    },

    /// Deploy merges onto the trunk branch are not allowed
    #[error("Refusing to merge into the trunk branch '{0}'; pick a deploy branch")]
    TrunkTarget(String),

    /// Internal consistency check failed
    #[error("Inconsistent repository state: {0}")]
    Inconsistent(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Severity to alert with when this error aborts an entry point
    pub fn severity(&self) -> Severity {
        match self {
            Error::MergeConflict { .. }
            | Error::PushRace { .. }
            | Error::Inconsistent(_) => Severity::Critical,
            Error::InvalidRevision { .. }
            | Error::NotABranch { .. }
            | Error::TrunkTarget(_)
            | Error::LockTimeout { .. }
            | Error::OperationTimeout { .. }
            | Error::CommandFailed { .. }
            | Error::Io(_)
            | Error::Git(_)
            | Error::Other(_) => Severity::Error,
            Error::Config(_) => Severity::Warning,
        }
    }
}
