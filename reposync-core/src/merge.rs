//! Merging a source branch into a deploy branch and publishing the result
//!
//! The protocol runs in two phases. [`SyncEngine::prepare_merge`] brings the
//! workspace to the remote state of both branches and decides whether a merge
//! is needed at all; [`SyncEngine::complete_merge`] merges, pushes with a
//! lease on the commit the target was at, and rolls back on any failure.

use std::path::{Path, PathBuf};

use crate::engine::{is_push_rejection, SyncEngine};
use crate::git::GitRepo;
use crate::submodule::SubmoduleSelector;
use crate::{Error, Result};

/// Why a merge target was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTarget {
    /// The target is the trunk branch
    Trunk {
        /// Trunk branch name
        branch: String,
    },
    /// The target resolves but is not a branch on the remote
    NotABranch {
        /// The target as requested
        revision: String,
    },
    /// The target does not resolve at all
    UnknownRevision {
        /// The target as requested
        revision: String,
        /// Workspace it was resolved in
        dir: PathBuf,
    },
}

/// Result of a deploy merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merge commit was created and pushed
    Merged {
        /// The pushed merge commit
        commit: String,
    },
    /// The target already contains the source; nothing was pushed
    AlreadyUpToDate,
    /// The remote target moved between fetch and push; the local branch was
    /// rolled back
    Race {
        /// Target branch
        branch: String,
        /// Commit the local branch was reset to
        rolled_back_to: String,
    },
    /// The merge conflicted and was aborted
    Conflict {
        /// Branch being merged in
        source: String,
        /// Branch merged into
        target: String,
        /// Commit the local branch was reset to
        rolled_back_to: String,
        /// Workspace the conflict happened in
        dir: PathBuf,
    },
    /// The target was refused before anything was changed upstream
    InvalidTarget(InvalidTarget),
}

impl MergeOutcome {
    /// Convert to a result: the pushed commit, `None` when nothing needed
    /// merging, or the matching [`Error`]
    pub fn into_result(self) -> Result<Option<String>> {
        match self {
            MergeOutcome::Merged { commit } => Ok(Some(commit)),
            MergeOutcome::AlreadyUpToDate => Ok(None),
            MergeOutcome::Race {
                branch,
                rolled_back_to,
            } => Err(Error::PushRace {
                branch,
                rolled_back_to,
            }),
            MergeOutcome::Conflict {
                source,
                target,
                dir,
                ..
            } => Err(Error::MergeConflict {
                operation: "merge",
                incoming: source,
                onto: target,
                dir,
            }),
            MergeOutcome::InvalidTarget(InvalidTarget::Trunk { branch }) => Err(Error::TrunkTarget(branch)),
            MergeOutcome::InvalidTarget(InvalidTarget::NotABranch { revision }) => {
                Err(Error::NotABranch { revision })
            }
            MergeOutcome::InvalidTarget(InvalidTarget::UnknownRevision { revision, dir }) => {
                Err(Error::InvalidRevision { revision, dir })
            }
        }
    }
}

/// What [`SyncEngine::prepare_merge`] decided
#[derive(Debug)]
pub enum MergePlan {
    /// Nothing to merge
    UpToDate,
    /// The target was refused
    Invalid(InvalidTarget),
    /// Workspace is on the target at its remote commit; ready to merge
    Ready(PreparedMerge),
}

/// A workspace positioned for [`SyncEngine::complete_merge`]
#[derive(Debug)]
pub struct PreparedMerge {
    dir: PathBuf,
    source: String,
    target: String,
    pre_merge: String,
    selector: SubmoduleSelector,
}

impl PreparedMerge {
    /// Commit the target was at before merging; the push lease and rollback point
    pub fn pre_merge(&self) -> &str {
        &self.pre_merge
    }
}

impl SyncEngine<'_> {
    /// Merge `source` into deploy branch `target` in workspace `dir` and push
    pub fn merge_branch_into(
        &self,
        dir: &Path,
        target: &str,
        source: &str,
        selector: &SubmoduleSelector,
    ) -> Result<MergeOutcome> {
        match self.prepare_merge(dir, target, source, selector)? {
            MergePlan::UpToDate => Ok(MergeOutcome::AlreadyUpToDate),
            MergePlan::Invalid(invalid) => Ok(MergeOutcome::InvalidTarget(invalid)),
            MergePlan::Ready(prepared) => self.complete_merge(prepared),
        }
    }

    /// Merge the trunk into deploy branch `target`
    pub fn merge_from_trunk(&self, dir: &Path, target: &str, selector: &SubmoduleSelector) -> Result<MergeOutcome> {
        let trunk = self.ctx.trunk().to_string();
        self.merge_branch_into(dir, target, &trunk, selector)
    }

    /// Position `dir` on `target` at its remote commit and decide what to do
    pub fn prepare_merge(
        &self,
        dir: &Path,
        target: &str,
        source: &str,
        selector: &SubmoduleSelector,
    ) -> Result<MergePlan> {
        if target == self.ctx.trunk() {
            tracing::warn!(%target, "refusing to merge into trunk");
            return Ok(MergePlan::Invalid(InvalidTarget::Trunk {
                branch: target.to_string(),
            }));
        }

        tracing::info!(dir = %dir.display(), %source, %target, "preparing merge");
        self.fetch(dir)?;
        self.reset_branch_to_remote(dir, source)?;

        let remote = self.ctx.remote();
        let target_is_remote = GitRepo::open(dir)?.remote_branch_exists(remote, target);
        let expected = if target_is_remote {
            let remote_ref = self.ctx.remote_ref(target);
            self.fetch_branch(dir, target)?;
            self.destructive_checkout(dir, target)?;
            self.reset_hard(dir, &remote_ref)?;
            GitRepo::open(dir)?.resolve_commit(&remote_ref)
        } else {
            match self.destructive_checkout(dir, target) {
                Ok(()) => {}
                Err(Error::InvalidRevision { revision, dir }) => {
                    return Ok(MergePlan::Invalid(InvalidTarget::UnknownRevision { revision, dir }));
                }
                Err(e) => return Err(e),
            }
            GitRepo::open(dir)?.resolve_commit(target)
        };

        let repo = GitRepo::open(dir)?;
        let head = repo.head_commit()?;
        if expected.as_deref() != Some(head.as_str()) {
            return Err(Error::Inconsistent(format!(
                "HEAD in {} is {} after checking out '{}', which resolves to {}",
                dir.display(),
                head,
                target,
                expected.as_deref().unwrap_or("nothing")
            )));
        }

        let source_tip = repo.resolve_commit(source).ok_or_else(|| Error::InvalidRevision {
            revision: source.to_string(),
            dir: dir.to_path_buf(),
        })?;
        if repo.merge_base(&head, &source_tip)?.as_deref() == Some(source_tip.as_str()) {
            tracing::info!(%source, %target, "target already contains source");
            return Ok(MergePlan::UpToDate);
        }

        if !target_is_remote || repo.current_branch()?.as_deref() != Some(target) {
            tracing::warn!(%target, "merge target is not a remote branch");
            return Ok(MergePlan::Invalid(InvalidTarget::NotABranch {
                revision: target.to_string(),
            }));
        }

        Ok(MergePlan::Ready(PreparedMerge {
            dir: dir.to_path_buf(),
            source: source.to_string(),
            target: target.to_string(),
            pre_merge: head,
            selector: selector.clone(),
        }))
    }

    /// Merge, push with a lease on the pre-merge commit, then materialize
    /// submodules
    ///
    /// Any failure after the merge resets the target back to the pre-merge
    /// commit.
    pub fn complete_merge(&self, prepared: PreparedMerge) -> Result<MergeOutcome> {
        let PreparedMerge {
            dir,
            source,
            target,
            pre_merge,
            selector,
        } = prepared;

        let merged = self
            .git(&dir)
            .args(["merge", "-q", "--no-ff", "--no-edit", &source])
            .output();
        match merged {
            Ok(out) if out.success() => {}
            Ok(out) => {
                let conflicted = self.has_unmerged_paths(&dir)?;
                self.abort_merge(&dir, &pre_merge)?;
                if conflicted {
                    tracing::error!(%source, %target, rolled_back_to = %pre_merge, "merge conflict; rolled back");
                    return Ok(MergeOutcome::Conflict {
                        source,
                        target,
                        rolled_back_to: pre_merge,
                        dir,
                    });
                }
                return Err(Error::CommandFailed {
                    command: format!("git merge --no-ff --no-edit {}", source),
                    status: out.status.to_string(),
                    stderr: out.stderr.trim().to_string(),
                });
            }
            Err(e) => {
                self.abort_merge(&dir, &pre_merge)?;
                return Err(e);
            }
        }

        let commit = self.head(&dir)?;
        let push_url = self.push_url(&dir)?;
        let lease = format!("--force-with-lease={}:{}", target, pre_merge);
        let refspec = format!("HEAD:refs/heads/{}", target);
        tracing::info!(%target, %commit, "pushing merge");
        let pushed = self
            .git(&dir)
            .args(["push", "-q", &lease, &push_url, &refspec])
            .timeout(self.ctx.timeouts().push)
            .output();

        match pushed {
            Ok(out) if out.success() => {}
            Ok(out) => {
                self.reset_hard(&dir, &pre_merge)?;
                if is_push_rejection(&out.stderr) {
                    tracing::error!(%target, rolled_back_to = %pre_merge, "remote moved during merge; rolled back");
                    return Ok(MergeOutcome::Race {
                        branch: target,
                        rolled_back_to: pre_merge,
                    });
                }
                return Err(Error::CommandFailed {
                    command: format!("git push {} {} {}", lease, push_url, refspec),
                    status: out.status.to_string(),
                    stderr: out.stderr.trim().to_string(),
                });
            }
            Err(e) => {
                self.reset_hard(&dir, &pre_merge)?;
                return Err(e);
            }
        }

        self.record_pushed(&dir, &target)?;
        self.materialize_submodules(&dir, &selector)?;
        tracing::info!(%source, %target, %commit, "merged and pushed");
        Ok(MergeOutcome::Merged { commit })
    }

    /// Make local `branch` identical to `<remote>/<branch>`
    fn reset_branch_to_remote(&self, dir: &Path, branch: &str) -> Result<()> {
        let repo = GitRepo::open(dir)?;
        let remote_ref = self.ctx.remote_ref(branch);
        if !repo.remote_branch_exists(self.ctx.remote(), branch) {
            return Err(Error::InvalidRevision {
                revision: remote_ref,
                dir: dir.to_path_buf(),
            });
        }

        if repo.current_branch()?.as_deref() == Some(branch) {
            self.destructive_checkout(dir, branch)?;
            self.reset_hard(dir, &remote_ref)?;
        } else {
            let local = format!("refs/heads/{}", branch);
            self.git(dir).args(["update-ref", &local, &remote_ref]).run()?;
        }
        Ok(())
    }

    fn has_unmerged_paths(&self, dir: &Path) -> Result<bool> {
        let unmerged = self.git(dir).args(["ls-files", "-u"]).stdout()?;
        Ok(!unmerged.is_empty())
    }

    fn abort_merge(&self, dir: &Path, pre_merge: &str) -> Result<()> {
        if let Err(e) = self.git(dir).args(["merge", "--abort"]).run() {
            tracing::debug!(dir = %dir.display(), error = %e, "merge --abort failed");
        }
        self.reset_hard(dir, pre_merge)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{git, head, status, try_git, Fixture};

    /// Fixture with `deploy-1` branched from master and a workspace synced to master
    fn deploy_fixture() -> (Fixture, PathBuf) {
        let fx = Fixture::new();
        fx.create_upstream_branch("deploy-1", "master");
        let ws = fx.workspace("ws");
        fx.engine()
            .sync_to(&fx.upstream_url(), &ws, "master", &SubmoduleSelector::All)
            .unwrap();
        (fx, ws)
    }

    #[test]
    fn test_trunk_target_is_refused() {
        let (fx, ws) = deploy_fixture();
        let before = head(&ws);

        let outcome = fx
            .engine()
            .merge_branch_into(&ws, "master", "deploy-1", &SubmoduleSelector::All)
            .unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::InvalidTarget(InvalidTarget::Trunk {
                branch: "master".to_string()
            })
        );
        assert_eq!(head(&ws), before);
        assert!(matches!(outcome.into_result(), Err(Error::TrunkTarget(_))));
    }

    #[test]
    fn test_already_merged_source_is_fast_path() {
        let (fx, ws) = deploy_fixture();
        let deploy = fx.upstream_head("deploy-1");

        let outcome = fx.engine().merge_from_trunk(&ws, "deploy-1", &SubmoduleSelector::All).unwrap();

        assert_eq!(outcome, MergeOutcome::AlreadyUpToDate);
        assert_eq!(fx.upstream_head("deploy-1"), deploy);
        assert_eq!(head(&ws), deploy);
    }

    #[test]
    fn test_merge_is_pushed() {
        let (fx, ws) = deploy_fixture();
        let trunk = fx.commit_upstream("master", "trunk.txt", "trunk\n");
        let deploy = fx.commit_upstream("deploy-1", "deploy.txt", "deploy\n");

        let outcome = fx.engine().merge_from_trunk(&ws, "deploy-1", &SubmoduleSelector::All).unwrap();

        let MergeOutcome::Merged { commit } = outcome else {
            panic!("expected a merge");
        };
        assert_eq!(fx.upstream_head("deploy-1"), commit);
        assert_eq!(head(&ws), commit);
        assert_eq!(git(&ws, &["rev-parse", "HEAD^1"]), deploy);
        assert_eq!(git(&ws, &["rev-parse", "HEAD^2"]), trunk);
        assert!(ws.join("trunk.txt").exists());
        assert!(ws.join("deploy.txt").exists());
        assert_eq!(status(&ws), "");
    }

    #[test]
    fn test_merge_records_no_tracking_config() {
        let (fx, ws) = deploy_fixture();
        fx.commit_upstream("master", "trunk.txt", "trunk\n");
        fx.commit_upstream("deploy-1", "deploy.txt", "deploy\n");

        let outcome = fx.engine().merge_from_trunk(&ws, "deploy-1", &SubmoduleSelector::All).unwrap();

        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert_eq!(git(&ws, &["rev-parse", "--abbrev-ref", "HEAD"]), "deploy-1");
        // The config file is shared by every workspace of the mirror
        assert!(try_git(&ws, &["config", "--get-regexp", r"^branch\.deploy-1\."]).is_err());
    }

    #[test]
    fn test_conflict_rolls_back() {
        let (fx, ws) = deploy_fixture();
        fx.commit_upstream("master", "app.txt", "trunk edit\n");
        let deploy = fx.commit_upstream("deploy-1", "app.txt", "deploy edit\n");

        let outcome = fx.engine().merge_from_trunk(&ws, "deploy-1", &SubmoduleSelector::All).unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Conflict {
                source: "master".to_string(),
                target: "deploy-1".to_string(),
                rolled_back_to: deploy.clone(),
                dir: ws.clone(),
            }
        );
        assert_eq!(head(&ws), deploy);
        assert_eq!(status(&ws), "");
        assert!(!ws.join(".git/MERGE_HEAD").exists());
        assert_eq!(fx.upstream_head("deploy-1"), deploy);
        assert!(matches!(
            outcome.into_result(),
            Err(Error::MergeConflict { operation: "merge", .. })
        ));
    }

    #[test]
    fn test_push_race_rolls_back() {
        let (fx, ws) = deploy_fixture();
        fx.commit_upstream("master", "trunk.txt", "trunk\n");
        fx.commit_upstream("deploy-1", "deploy.txt", "deploy\n");
        let engine = fx.engine();

        let MergePlan::Ready(prepared) = engine
            .prepare_merge(&ws, "deploy-1", "master", &SubmoduleSelector::All)
            .unwrap()
        else {
            panic!("expected a merge to be needed");
        };
        let pre_merge = prepared.pre_merge().to_string();

        // Someone else pushes to the deploy branch in between
        let theirs = fx.commit_upstream("deploy-1", "hotfix.txt", "hotfix\n");

        let outcome = engine.complete_merge(prepared).unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::Race {
                branch: "deploy-1".to_string(),
                rolled_back_to: pre_merge.clone(),
            }
        );
        assert_eq!(head(&ws), pre_merge);
        assert_eq!(fx.upstream_head("deploy-1"), theirs);
        assert_eq!(status(&ws), "");
    }

    #[test]
    fn test_unknown_target() {
        let (fx, ws) = deploy_fixture();

        let outcome = fx
            .engine()
            .merge_from_trunk(&ws, "no-such-deploy", &SubmoduleSelector::All)
            .unwrap();

        assert!(matches!(
            outcome,
            MergeOutcome::InvalidTarget(InvalidTarget::UnknownRevision { ref revision, .. })
                if revision == "no-such-deploy"
        ));
    }

    #[test]
    fn test_commit_target_is_not_a_branch() {
        let (fx, ws) = deploy_fixture();
        let old = fx.upstream_head("master");
        fx.commit_upstream("master", "trunk.txt", "trunk\n");

        let outcome = fx.engine().merge_from_trunk(&ws, &old, &SubmoduleSelector::All).unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::InvalidTarget(InvalidTarget::NotABranch { revision: old })
        );
    }

    #[test]
    fn test_up_to_date_check_runs_before_branch_check() {
        let (fx, ws) = deploy_fixture();
        let tip = fx.upstream_head("master");

        let outcome = fx.engine().merge_from_trunk(&ws, &tip, &SubmoduleSelector::All).unwrap();

        assert_eq!(outcome, MergeOutcome::AlreadyUpToDate);
    }

    #[test]
    fn test_stale_local_target_is_reset_to_remote() {
        let (fx, ws) = deploy_fixture();
        let engine = fx.engine();
        engine
            .sync_to_tracking_origin(&fx.upstream_url(), &ws, "deploy-1", &SubmoduleSelector::All)
            .unwrap();
        fs::write(ws.join("stray.txt"), "stray\n").unwrap();
        git(&ws, &["add", "stray.txt"]);
        git(&ws, &["commit", "-q", "-m", "Local only"]);

        fx.commit_upstream("master", "trunk.txt", "trunk\n");
        let outcome = engine.merge_from_trunk(&ws, "deploy-1", &SubmoduleSelector::All).unwrap();

        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert!(!ws.join("stray.txt").exists());
    }
}
