//! Top-level synchronization protocols
//!
//! `sync_to` brings a workspace to a revision: creating it linked to the
//! canonical mirror on first use, otherwise fetching and destructively
//! checking out. Local branches are then rebased onto their remote
//! counterpart, large files pulled and submodules materialized.

use std::fs;
use std::path::Path;

use crate::engine::SyncEngine;
use crate::git::{GitRepo, RepoUrl};
use crate::submodule::SubmoduleSelector;
use crate::{Error, Result};

impl SyncEngine<'_> {
    /// Bring `workspace` to `commit_ish` of `repo_url`, returning the new HEAD
    pub fn sync_to(
        &self,
        repo_url: &str,
        workspace: &Path,
        commit_ish: &str,
        selector: &SubmoduleSelector,
    ) -> Result<String> {
        let url = RepoUrl::parse(repo_url)?;
        tracing::info!(url = %url.raw, workspace = %workspace.display(), %commit_ish, "syncing");

        self.checkout_workspace(&url, workspace, commit_ish, false)?;
        self.finish_sync(workspace, commit_ish, selector)
    }

    /// Like [`sync_to`](Self::sync_to), but follow `<remote>/<branch>` when
    /// the remote has that branch, leaving local `branch` checked out at it
    ///
    /// Local commits on `branch` that were never pushed are dropped.
    pub fn sync_to_tracking_origin(
        &self,
        repo_url: &str,
        workspace: &Path,
        branch: &str,
        selector: &SubmoduleSelector,
    ) -> Result<String> {
        self.sync_tracking(repo_url, workspace, branch, selector, false)
    }

    /// Sync `workspace` to the remote trunk
    pub fn pull(&self, repo_url: &str, workspace: &Path, selector: &SubmoduleSelector) -> Result<String> {
        let trunk = self.ctx.trunk().to_string();
        self.sync_tracking(repo_url, workspace, &trunk, selector, false)
    }

    /// Sync `workspace` to `branch`, which must exist on the remote
    pub fn pull_in_branch(
        &self,
        repo_url: &str,
        workspace: &Path,
        branch: &str,
        selector: &SubmoduleSelector,
    ) -> Result<String> {
        self.sync_tracking(repo_url, workspace, branch, selector, true)
    }

    fn sync_tracking(
        &self,
        repo_url: &str,
        workspace: &Path,
        branch: &str,
        selector: &SubmoduleSelector,
        require_remote: bool,
    ) -> Result<String> {
        let url = RepoUrl::parse(repo_url)?;

        // Refresh whichever repository holds the refs we are about to inspect
        let refreshed = if GitRepo::exists_at(workspace) {
            self.check_binding(&url, workspace)?;
            self.fetch(workspace)?;
            workspace.to_path_buf()
        } else {
            self.ensure_mirror(&url, true)?
        };

        let tracking = GitRepo::open(&refreshed)?.remote_branch_exists(self.ctx.remote(), branch);
        let remote_ref = self.ctx.remote_ref(branch);
        if !tracking && require_remote {
            return Err(Error::InvalidRevision {
                revision: remote_ref,
                dir: workspace.to_path_buf(),
            });
        }

        let target = if tracking { remote_ref.as_str() } else { branch };
        tracing::info!(url = %url.raw, workspace = %workspace.display(), %target, "syncing");
        self.checkout_workspace(&url, workspace, target, true)?;
        let head = self.finish_sync(workspace, target, selector)?;

        if tracking {
            self.git(workspace)
                .args(["checkout", "-q", "-B", branch])
                .run()?;
            tracing::debug!(workspace = %workspace.display(), %branch, %head, "moved local branch");
        }
        Ok(head)
    }

    /// Fetch and destructively check out an existing workspace, or create it
    fn checkout_workspace(&self, url: &RepoUrl, workspace: &Path, revision: &str, fetched: bool) -> Result<()> {
        if GitRepo::exists_at(workspace) {
            self.check_binding(url, workspace)?;
            if !fetched {
                self.fetch(workspace)?;
            }
            return self.destructive_checkout(workspace, revision);
        }

        let mirror = self.ensure_mirror(url, !fetched)?;
        self.create_workspace(&mirror, workspace, revision)
    }

    /// Link a new workspace to `mirror` and check out `revision`
    ///
    /// On failure the workspace is unlinked again so the next attempt starts
    /// from scratch.
    fn create_workspace(&self, mirror: &Path, workspace: &Path, revision: &str) -> Result<()> {
        tracing::info!(workspace = %workspace.display(), "creating workspace");
        fs::create_dir_all(workspace)?;
        self.link_workdir(mirror, workspace)?;

        let cmd = self.git(workspace).args(["checkout", "-q", "-f", revision]);
        let output = cmd.output();
        let failure = match output {
            Ok(ref out) if out.success() => return Ok(()),
            Ok(out) => {
                if GitRepo::open(workspace)?.resolve_commit(revision).is_none() {
                    Error::InvalidRevision {
                        revision: revision.to_string(),
                        dir: workspace.to_path_buf(),
                    }
                } else {
                    Error::CommandFailed {
                        command: cmd.display(),
                        status: out.status.to_string(),
                        stderr: out.stderr.trim().to_string(),
                    }
                }
            }
            Err(e) => e,
        };

        fs::remove_dir_all(workspace.join(".git"))?;
        Err(failure)
    }

    /// Rebase, pull large files and materialize submodules; returns HEAD
    fn finish_sync(&self, workspace: &Path, commit_ish: &str, selector: &SubmoduleSelector) -> Result<String> {
        self.rebase_onto_remote(workspace, commit_ish)?;
        self.pull_bigfiles(workspace)?;
        self.materialize_submodules(workspace, selector)?;

        let head = self.head(workspace)?;
        tracing::info!(workspace = %workspace.display(), %head, "workspace synced");
        Ok(head)
    }

    /// When `commit_ish` named the local branch we are on, replay it onto its
    /// remote counterpart
    fn rebase_onto_remote(&self, workspace: &Path, commit_ish: &str) -> Result<()> {
        let repo = GitRepo::open(workspace)?;
        let Some(branch) = repo.current_branch()? else {
            return Ok(());
        };
        if branch != commit_ish || !repo.remote_branch_exists(self.ctx.remote(), &branch) {
            return Ok(());
        }

        let onto = self.ctx.remote_ref(&branch);
        let rebased = self.git(workspace).args(["rebase", "-q", &onto]).output();
        match rebased {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => {
                tracing::warn!(workspace = %workspace.display(), %branch, stderr = %out.stderr.trim(), "rebase failed; aborting");
                self.abort_rebase(workspace);
                Err(Error::MergeConflict {
                    operation: "rebase",
                    incoming: branch,
                    onto,
                    dir: workspace.to_path_buf(),
                })
            }
            Err(e) => {
                self.abort_rebase(workspace);
                Err(e)
            }
        }
    }

    pub(crate) fn abort_rebase(&self, dir: &Path) {
        if let Err(e) = self.git(dir).args(["rebase", "--abort"]).run() {
            tracing::debug!(dir = %dir.display(), error = %e, "rebase --abort failed");
        }
    }

    /// Refuse to reuse a workspace that belongs to another repository
    fn check_binding(&self, url: &RepoUrl, workspace: &Path) -> Result<()> {
        let bound = GitRepo::open(workspace)?.remote_url(self.ctx.remote())?;
        let bound = RepoUrl::parse(&bound)?;
        if bound.name() != url.name() {
            return Err(Error::Config(format!(
                "Workspace {} belongs to {}, not {}",
                workspace.display(),
                bound.raw,
                url.raw
            )));
        }
        Ok(())
    }
}
