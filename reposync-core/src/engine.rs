//! Entry point type shared by every synchronization protocol

use std::path::Path;

use crate::context::SharedRootContext;
use crate::git::command::GitCommand;
use crate::git::{GitRepo, RepoUrl};
use crate::Result;

/// The synchronization engine
///
/// Protocols are implemented in their own modules as `impl SyncEngine`
/// blocks: fetching in `fetch`, destructive checkout in `checkout`, and so on.
#[derive(Debug, Clone, Copy)]
pub struct SyncEngine<'a> {
    pub(crate) ctx: &'a SharedRootContext,
}

impl<'a> SyncEngine<'a> {
    /// Create an engine bound to a shared root
    pub fn new(ctx: &'a SharedRootContext) -> Self {
        Self { ctx }
    }

    /// The shared root this engine works against
    pub fn context(&self) -> &'a SharedRootContext {
        self.ctx
    }

    pub(crate) fn git(&self, dir: &Path) -> GitCommand {
        self.ctx.git(dir)
    }

    pub(crate) fn head(&self, dir: &Path) -> Result<String> {
        GitRepo::open(dir)?.head_commit()
    }

    pub(crate) fn reset_hard(&self, dir: &Path, revision: &str) -> Result<()> {
        self.git(dir)
            .args(["reset", "-q", "--hard", revision])
            .run()?;
        Ok(())
    }

    /// Whether `dir` has tracked modifications or untracked files
    pub(crate) fn has_changes(&self, dir: &Path) -> Result<bool> {
        let status = self.git(dir).args(["status", "--porcelain"]).run()?;
        Ok(!status.stdout.trim().is_empty())
    }

    /// URL used to push from `dir`, with HTTPS rewritten to SSH
    pub(crate) fn push_url(&self, dir: &Path) -> Result<String> {
        let url = GitRepo::open(dir)?.remote_url(self.ctx.remote())?;
        Ok(RepoUrl::parse(&url)?.push_url())
    }

    /// Point `<remote>/<branch>` at HEAD after a successful push
    pub(crate) fn record_pushed(&self, dir: &Path, branch: &str) -> Result<()> {
        let tracking = format!("refs/remotes/{}/{}", self.ctx.remote(), branch);
        self.git(dir).args(["update-ref", &tracking, "HEAD"]).run()?;
        Ok(())
    }
}

/// Whether push stderr reports that the remote refused our update as stale
pub(crate) fn is_push_rejection(stderr: &str) -> bool {
    stderr.contains("[rejected]")
        || stderr.contains("stale info")
        || stderr.contains("non-fast-forward")
        || stderr.contains("fetch first")
        || (stderr.contains("cannot lock ref") && stderr.contains("but expected"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_rejection_detection() {
        assert!(is_push_rejection(
            " ! [rejected]        HEAD -> deploy-1 (stale info)\nerror: failed to push some refs"
        ));
        assert!(is_push_rejection(
            " ! [rejected]        master -> master (fetch first)"
        ));
        assert!(!is_push_rejection(
            " ! [remote rejected] master -> master (pre-receive hook declined)"
        ));
        // The ref moved while the remote was applying our update
        assert!(is_push_rejection(
            "remote: error: cannot lock ref 'refs/heads/master': is at cb3d63e but expected c041106\n \
             ! [remote rejected] HEAD -> master (failed to update ref)"
        ));
        assert!(!is_push_rejection("fatal: Could not read from remote repository."));
    }
}
