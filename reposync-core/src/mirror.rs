//! Canonical mirrors and the workspaces linked to them
//!
//! A canonical mirror is one clone per logical repository under
//! `<root>/repositories/<name>`. A linked workspace gets its own `HEAD` and
//! index but symlinks everything else in `.git` back to the mirror, so all of
//! its objects and refs live in (and are fetched into) the mirror.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::engine::SyncEngine;
use crate::git::{GitRepo, RepoUrl};
use crate::lock::LockGuard;
use crate::Result;

/// `.git` entries a linked workspace shares with its mirror
const SHARED_GIT_ENTRIES: &[&str] = &[
    "config",
    "refs",
    "logs/refs",
    "objects",
    "info",
    "hooks",
    "packed-refs",
    "remotes",
    "rr-cache",
    "svn",
];

impl SyncEngine<'_> {
    /// Path of the canonical mirror for `url`, cloning it first if needed
    ///
    /// An existing mirror is fetched when `refresh` is set.
    pub fn ensure_mirror(&self, url: &RepoUrl, refresh: bool) -> Result<PathBuf> {
        let held = self.ctx.lock_shared()?;
        self.ensure_mirror_locked(&held, url, refresh)
    }

    pub(crate) fn ensure_mirror_locked(
        &self,
        held: &LockGuard,
        url: &RepoUrl,
        refresh: bool,
    ) -> Result<PathBuf> {
        let path = self.ctx.mirror_path(url.name());
        if GitRepo::exists_at(&path) {
            if refresh {
                self.fetch_locked(held, &path)?;
            }
            return Ok(path);
        }
        self.clone_mirror(url, &path)?;
        Ok(path)
    }

    /// Clone into a staging directory and rename it into place
    ///
    /// Caller holds the shared lock. A crash mid-clone leaves only the staging
    /// directory, never a half-populated mirror.
    fn clone_mirror(&self, url: &RepoUrl, path: &Path) -> Result<()> {
        let parent = self.ctx.mirrors_dir();
        let staging = parent.join(format!(".{}.clone-{}", url.name(), std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        tracing::info!(url = %url.raw, mirror = %path.display(), "cloning canonical mirror");
        let result = self
            .git(&parent)
            .arg("clone")
            .args(["-q", "--no-checkout", "--origin", self.ctx.remote()])
            .arg(&url.raw)
            .arg(&staging)
            .timeout(self.ctx.timeouts().clone)
            .run();
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Turn `workspace` into a working tree of `mirror`
    ///
    /// Only the `.git` skeleton is created; the caller checks out a revision.
    pub(crate) fn link_workdir(&self, mirror: &Path, workspace: &Path) -> Result<()> {
        let mirror_git = fs::canonicalize(mirror)?.join(".git");
        let git_dir = workspace.join(".git");
        fs::create_dir_all(git_dir.join("logs"))?;

        for entry in SHARED_GIT_ENTRIES {
            let link = git_dir.join(entry);
            if link.symlink_metadata().is_ok() {
                continue;
            }
            symlink(mirror_git.join(entry), &link)?;
        }
        fs::copy(mirror_git.join("HEAD"), git_dir.join("HEAD"))?;

        tracing::debug!(
            workspace = %workspace.display(),
            mirror = %mirror.display(),
            "linked working tree to mirror"
        );
        Ok(())
    }
}

/// Whether `dir` is a working tree linked to a shared mirror
pub(crate) fn is_linked_workdir(dir: &Path) -> bool {
    dir.join(".git")
        .join("objects")
        .symlink_metadata()
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}
