//! Reposync Core - repository synchronization for deploy automation
//!
//! Keeps workspaces in step with upstream repositories through canonical
//! mirrors in a shared root, merges source branches into deploy branches, and
//! publishes commits. Every fetch and clone is serialized through a lock in
//! the shared root and every git call carries a timeout.

pub mod alert;
pub mod bigfile;
pub mod checkout;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod git;
pub mod lock;
pub mod merge;
pub mod mirror;
pub mod push;
pub mod submodule;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use alert::{report, Alerter, CommandAlerter, Severity, TracingAlerter};
pub use checkout::ForceReset;
pub use config::{AlertConfig, Config, TimeoutConfig};
pub use context::{SharedRootContext, SHARED_LOCK};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use git::{GitRepo, RepoUrl};
pub use lock::{LockGuard, LockManager};
pub use merge::{InvalidTarget, MergeOutcome, MergePlan, PreparedMerge};
pub use submodule::{Submodule, SubmoduleSelector};
