//! Large-file extension (git-lfs) support
//!
//! Large-file content is only transferred for repositories whose
//! `.gitattributes` routes paths through the `lfs` filter. Downloads share the
//! object store, so they run under the shared lock.

use std::fs;
use std::path::Path;

use crate::engine::SyncEngine;
use crate::Result;

/// Whether the checked-out tree in `dir` uses the large-file extension
pub fn uses_bigfiles(dir: &Path) -> bool {
    fs::read_to_string(dir.join(".gitattributes"))
        .map(|attrs| attrs.lines().any(|l| !l.trim_start().starts_with('#') && l.contains("filter=lfs")))
        .unwrap_or(false)
}

impl SyncEngine<'_> {
    /// Download large-file content for the checked-out revision
    pub(crate) fn pull_bigfiles(&self, dir: &Path) -> Result<()> {
        if !uses_bigfiles(dir) {
            return Ok(());
        }
        let _held = self.ctx.lock_shared()?;
        tracing::info!(dir = %dir.display(), "pulling large-file content");
        self.git(dir)
            .args(["lfs", "pull", self.ctx.remote()])
            .timeout(self.ctx.timeouts().bigfile)
            .run()?;
        Ok(())
    }

    /// Upload large-file content reachable from `branch` before the branch itself
    pub(crate) fn push_bigfiles(&self, dir: &Path, push_url: &str, branch: &str) -> Result<()> {
        if !uses_bigfiles(dir) {
            return Ok(());
        }
        tracing::info!(dir = %dir.display(), %branch, "pushing large-file content");
        self.git(dir)
            .args(["lfs", "push", push_url, branch])
            .timeout(self.ctx.timeouts().bigfile)
            .run()?;
        Ok(())
    }
}
