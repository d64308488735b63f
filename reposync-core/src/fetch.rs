//! Serialized fetching into the shared object stores
//!
//! Every fetch, and every clone of a canonical mirror, runs under the shared
//! lock so two agents never write the same object store at once.

use std::path::Path;

use crate::engine::SyncEngine;
use crate::lock::LockGuard;
use crate::Result;

impl SyncEngine<'_> {
    /// Fetch branches and tags from the remote into `dir`
    ///
    /// `dir` may be a canonical mirror or any workspace linked to one; both
    /// write into the mirror's object store and refs.
    pub fn fetch(&self, dir: &Path) -> Result<()> {
        let held = self.ctx.lock_shared()?;
        self.fetch_locked(&held, dir)
    }

    /// [`fetch`](Self::fetch) for callers that already hold the shared lock
    pub(crate) fn fetch_locked(&self, _held: &LockGuard, dir: &Path) -> Result<()> {
        let remote = self.ctx.remote();
        self.prune_tags(dir);

        tracing::info!(dir = %dir.display(), %remote, "fetching");
        let output = self
            .git(dir)
            .args(["fetch", "-q", "--tags", remote])
            .timeout(self.ctx.timeouts().fetch)
            .run()?;
        tracing::debug!(dir = %dir.display(), duration = ?output.duration, "fetch finished");
        Ok(())
    }

    /// Fetch one branch into its remote-tracking ref
    pub(crate) fn fetch_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        let _held = self.ctx.lock_shared()?;
        let remote = self.ctx.remote();
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, remote);
        self.git(dir)
            .args(["fetch", "-q", remote, &refspec])
            .timeout(self.ctx.timeouts().fetch)
            .run()?;
        Ok(())
    }

    /// Drop local tags that no longer exist upstream
    ///
    /// Failures are logged and otherwise ignored.
    fn prune_tags(&self, dir: &Path) {
        let remote = self.ctx.remote();
        let result = self
            .git(dir)
            .args(["fetch", "-q", "--prune", "--no-tags", remote, "+refs/tags/*:refs/tags/*"])
            .timeout(self.ctx.timeouts().prune)
            .run();
        if let Err(e) = result {
            tracing::warn!(dir = %dir.display(), error = %e, "tag pruning failed; continuing");
        }
    }
}
