//! Sync command - bring a workspace to a revision

use std::path::PathBuf;

use clap::Args;
use reposync_core::{Result, SubmoduleSelector, SyncEngine};

/// Bring a workspace to a revision of a repository
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository URL
    pub url: String,

    /// Workspace directory (created on first use)
    pub workspace: PathBuf,

    /// Branch, tag or commit to check out
    pub revision: String,

    /// Follow the remote branch of this name and leave the local branch at it
    #[arg(long)]
    pub track: bool,

    /// Submodules to materialize: "all", "none" or comma-separated path prefixes
    #[arg(long, default_value = "all")]
    pub submodules: SubmoduleSelector,
}

impl SyncArgs {
    /// Execute the sync command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        let head = if self.track {
            engine.sync_to_tracking_origin(&self.url, &self.workspace, &self.revision, &self.submodules)?
        } else {
            engine.sync_to(&self.url, &self.workspace, &self.revision, &self.submodules)?
        };
        println!("{}", head);
        Ok(())
    }
}
