//! Merge command - merge a branch into a deploy branch and push it

use std::path::PathBuf;

use clap::Args;
use reposync_core::{MergeOutcome, Result, SubmoduleSelector, SyncEngine};

/// Merge a source branch (the trunk by default) into a deploy branch
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Workspace to merge in
    pub workspace: PathBuf,

    /// Deploy branch to merge into
    pub target: String,

    /// Branch to merge in (defaults to the trunk)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Submodules to materialize after the merge
    #[arg(long, default_value = "all")]
    pub submodules: SubmoduleSelector,
}

impl MergeArgs {
    /// Execute the merge command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        let outcome = match &self.source {
            Some(source) => engine.merge_branch_into(&self.workspace, &self.target, source, &self.submodules)?,
            None => engine.merge_from_trunk(&self.workspace, &self.target, &self.submodules)?,
        };

        match &outcome {
            MergeOutcome::Merged { commit } => println!("merged {}", commit),
            MergeOutcome::AlreadyUpToDate => println!("{} is already up to date", self.target),
            _ => {}
        }
        outcome.into_result().map(|_| ())
    }
}
