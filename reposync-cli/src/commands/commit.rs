//! Commit-and-push command

use std::path::PathBuf;

use clap::Args;
use reposync_core::{Result, SyncEngine};

/// Commit every change in a working tree and push it
#[derive(Args, Debug)]
pub struct CommitAndPushArgs {
    /// Repository (or submodule) working tree
    pub workspace: PathBuf,

    /// Arguments passed to `git commit`, after `--` (e.g. `-- -m "Bump assets"`)
    #[arg(last = true, required = true)]
    pub commit_args: Vec<String>,
}

impl CommitAndPushArgs {
    /// Execute the commit-and-push command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        engine.commit_and_push(&self.workspace, self.commit_args.as_slice())
    }
}
