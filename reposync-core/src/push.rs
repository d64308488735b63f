//! Publishing local commits
//!
//! A push rebases the current branch onto its remote counterpart first and
//! never leaves a half-published state: when the rebase or the push fails,
//! the local commit being published is dropped. Pushing from inside a
//! submodule also records the new commit in the superproject and pushes that.

use std::path::{Path, PathBuf};

use crate::checkout::ForceReset;
use crate::engine::{is_push_rejection, SyncEngine};
use crate::git::GitRepo;
use crate::{Error, Result};

impl SyncEngine<'_> {
    /// Commit everything in `dir` with `commit_args`, then [`push`](Self::push)
    ///
    /// With nothing to commit the push still runs.
    pub fn commit_and_push<S: AsRef<str>>(&self, dir: &Path, commit_args: &[S]) -> Result<()> {
        if self.has_changes(dir)? {
            self.git(dir).args(["add", "-A"]).run()?;
            self.git(dir)
                .arg("commit")
                .arg("-q")
                .args(commit_args.iter().map(|a| a.as_ref()))
                .run()?;
            tracing::info!(dir = %dir.display(), "committed local changes");
        } else {
            tracing::info!(dir = %dir.display(), "nothing to commit");
        }
        self.push(dir)
    }

    /// Rebase the current branch onto its remote counterpart and push it
    ///
    /// On a rebase conflict or a failed push the branch is reset to one
    /// commit before the HEAD being pushed.
    pub fn push(&self, dir: &Path) -> Result<()> {
        let branch = GitRepo::open(dir)?
            .current_branch()?
            .ok_or_else(|| Error::NotABranch {
                revision: "HEAD".to_string(),
            })?;

        self.fetch(dir)?;
        if GitRepo::open(dir)?.remote_branch_exists(self.ctx.remote(), &branch) {
            self.rebase_or_drop(dir, &branch)?;
        }

        let push_url = self.push_url(dir)?;
        self.push_bigfiles(dir, &push_url, &branch)?;

        let refspec = format!("HEAD:refs/heads/{}", branch);
        let cmd = self
            .git(dir)
            .args(["push", "-q", &push_url, &refspec])
            .timeout(self.ctx.timeouts().push);
        tracing::info!(dir = %dir.display(), %branch, "pushing");
        match cmd.output() {
            Ok(out) if out.success() => {}
            Ok(out) => {
                let rolled_back_to = self.drop_last_commit(dir)?;
                if is_push_rejection(&out.stderr) {
                    tracing::error!(%branch, %rolled_back_to, "push rejected; dropped local commit");
                    return Err(Error::PushRace {
                        branch,
                        rolled_back_to,
                    });
                }
                return Err(Error::CommandFailed {
                    command: cmd.display(),
                    status: out.status.to_string(),
                    stderr: out.stderr.trim().to_string(),
                });
            }
            Err(e) => {
                self.drop_last_commit(dir)?;
                return Err(e);
            }
        }
        self.record_pushed(dir, &branch)?;

        self.propagate_to_superproject(dir, &branch)
    }

    /// Fast-forward the submodule at `submodule_path` to the remote trunk and
    /// publish the new pointer from `dir`
    ///
    /// Returns whether the pointer changed.
    pub fn update_submodule_pointer_to_trunk(&self, dir: &Path, submodule_path: &str) -> Result<bool> {
        let nested = dir.join(submodule_path);
        self.fast_forward_to_trunk(&nested)?;
        self.commit_pointer_and_push(dir, submodule_path)
    }

    fn rebase_or_drop(&self, dir: &Path, branch: &str) -> Result<()> {
        let onto = self.ctx.remote_ref(branch);
        let rebased = self.git(dir).args(["rebase", "-q", &onto]).output();
        let failure = match rebased {
            Ok(out) if out.success() => return Ok(()),
            Ok(out) => {
                tracing::warn!(dir = %dir.display(), %branch, stderr = %out.stderr.trim(), "rebase before push failed");
                Error::MergeConflict {
                    operation: "rebase",
                    incoming: branch.to_string(),
                    onto,
                    dir: dir.to_path_buf(),
                }
            }
            Err(e) => e,
        };

        self.abort_rebase(dir);
        let rolled_back_to = self.drop_last_commit(dir)?;
        tracing::error!(%branch, %rolled_back_to, "dropped local commit after failed rebase");
        Err(failure)
    }

    /// Reset the current branch to `HEAD~1`, returning the new HEAD
    fn drop_last_commit(&self, dir: &Path) -> Result<String> {
        self.reset_hard(dir, "HEAD~1")?;
        self.head(dir)
    }

    /// When `dir` is a submodule, commit its new HEAD in the superproject and push
    fn propagate_to_superproject(&self, dir: &Path, branch: &str) -> Result<()> {
        let parent = self
            .git(dir)
            .args(["rev-parse", "--show-superproject-working-tree"])
            .stdout()?;
        if parent.is_empty() {
            return Ok(());
        }
        let parent = PathBuf::from(parent);
        let relative = relative_to(&parent, dir)?;
        tracing::info!(superproject = %parent.display(), path = %relative, "propagating push to superproject");

        self.git(&parent).args(["checkout", "-q", branch]).run()?;
        self.fast_forward_to_trunk(dir)?;
        self.commit_pointer_and_push(&parent, &relative)?;
        Ok(())
    }

    /// Check out the trunk in `dir` and fast-forward it to the remote trunk
    fn fast_forward_to_trunk(&self, dir: &Path) -> Result<()> {
        let trunk = self.ctx.trunk();
        self.fetch(dir)?;
        ForceReset::new(self.ctx, dir).checkout(trunk)?;
        self.git(dir)
            .args(["merge", "-q", "--ff-only", &self.ctx.remote_ref(trunk)])
            .run()?;
        Ok(())
    }

    /// Commit the submodule pointer at `path` in `dir` if it moved, and push
    fn commit_pointer_and_push(&self, dir: &Path, path: &str) -> Result<bool> {
        self.git(dir).args(["add", "--", path]).run()?;
        let unchanged = self
            .git(dir)
            .args(["diff", "--cached", "--quiet", "--", path])
            .succeeds()?;
        if unchanged {
            tracing::info!(dir = %dir.display(), %path, "submodule pointer already current");
            return Ok(false);
        }

        let nested_head = self.head(&dir.join(path))?;
        let short = nested_head.get(..12).unwrap_or(&nested_head);
        let message = format!("Update {} to {}", path, short);
        self.git(dir)
            .args(["commit", "-q", "-m", &message, "--", path])
            .run()?;
        self.push(dir)?;
        Ok(true)
    }
}

/// `child` relative to `parent`, as a slash-separated path
fn relative_to(parent: &Path, child: &Path) -> Result<String> {
    let parent = parent.canonicalize()?;
    let child = child.canonicalize()?;
    let relative = child.strip_prefix(&parent).map_err(|_| {
        Error::Inconsistent(format!(
            "{} is not inside its superproject {}",
            child.display(),
            parent.display()
        ))
    })?;
    Ok(relative.to_string_lossy().into_owned())
}
