//! Update-submodule-pointer command

use std::path::PathBuf;

use clap::Args;
use reposync_core::{Result, SyncEngine};

/// Fast-forward a submodule to the trunk and push the new pointer
#[derive(Args, Debug)]
pub struct UpdateSubmodulePointerArgs {
    /// Superproject working tree
    pub workspace: PathBuf,

    /// Submodule path relative to the workspace
    pub path: String,
}

impl UpdateSubmodulePointerArgs {
    /// Execute the update-submodule-pointer command
    pub fn execute(&self, engine: &SyncEngine<'_>) -> Result<()> {
        if engine.update_submodule_pointer_to_trunk(&self.workspace, &self.path)? {
            println!("updated {}", self.path);
        } else {
            println!("{} already at trunk", self.path);
        }
        Ok(())
    }
}
