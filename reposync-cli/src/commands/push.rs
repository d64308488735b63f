//! Push command

use std::path::PathBuf;

use clap::Args;
use reposync_core::{Result, SyncEngine};

/// Rebase the current branch onto its remote counterpart and push it
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Repository (or submodule) working tree
    pub workspace: PathBuf,
}

impl PushArgs {
    /// Execute the push command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        engine.push(&self.workspace)
    }
}
