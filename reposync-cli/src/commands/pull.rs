//! Pull command - follow the trunk or a remote branch

use std::path::PathBuf;

use clap::Args;
use reposync_core::{Result, SubmoduleSelector, SyncEngine};

/// Sync a workspace to the remote trunk, or to a remote branch
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Repository URL
    pub url: String,

    /// Workspace directory (created on first use)
    pub workspace: PathBuf,

    /// Remote branch to follow instead of the trunk; must exist upstream
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Submodules to materialize: "all", "none" or comma-separated path prefixes
    #[arg(long, default_value = "all")]
    pub submodules: SubmoduleSelector,
}

impl PullArgs {
    /// Execute the pull command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        let head = match &self.branch {
            Some(branch) => engine.pull_in_branch(&self.url, &self.workspace, branch, &self.submodules)?,
            None => engine.pull(&self.url, &self.workspace, &self.submodules)?,
        };
        println!("{}", head);
        Ok(())
    }
}
