//! Destructive checkout
//!
//! A workspace is a cache of upstream state, not a place to keep work. Before
//! and after switching revisions every tracked modification and untracked
//! file is thrown away, in the workspace and in every initialized submodule.
//! There is no undo.

use std::path::Path;

use crate::context::SharedRootContext;
use crate::engine::SyncEngine;
use crate::git::GitRepo;
use crate::{Error, Result};

/// A destructive reset of one working tree
///
/// Constructing one does nothing; every method discards local state.
#[derive(Debug, Clone, Copy)]
pub struct ForceReset<'a> {
    ctx: &'a SharedRootContext,
    dir: &'a Path,
}

impl<'a> ForceReset<'a> {
    /// Prepare to reset the working tree at `dir`
    pub fn new(ctx: &'a SharedRootContext, dir: &'a Path) -> Self {
        Self { ctx, dir }
    }

    /// Check out `revision`, discarding all local state before and after
    ///
    /// Fails with [`Error::InvalidRevision`] when `revision` does not
    /// resolve; the tree is left clean at its previous commit.
    pub fn checkout(&self, revision: &str) -> Result<()> {
        self.discard_local_changes()?;

        let cmd = self.ctx.git(self.dir).args(["checkout", "-q", revision]);
        let output = cmd.output()?;
        if !output.success() {
            if GitRepo::open(self.dir)?.resolve_commit(revision).is_none() {
                tracing::warn!(dir = %self.dir.display(), %revision, "revision does not resolve");
                return Err(Error::InvalidRevision {
                    revision: revision.to_string(),
                    dir: self.dir.to_path_buf(),
                });
            }
            return Err(Error::CommandFailed {
                command: cmd.display(),
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        self.discard_local_changes()?;
        Ok(())
    }

    /// Throw away tracked modifications and untracked files
    ///
    /// Returns whether there was anything to discard.
    pub fn discard_local_changes(&self) -> Result<bool> {
        let git = |args: &[&str]| self.ctx.git(self.dir).args(args.iter().copied()).run();

        let status = git(&["status", "--porcelain"])?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }

        tracing::info!(dir = %self.dir.display(), "discarding local changes");
        git(&["reset", "-q", "--hard", "HEAD"])?;
        git(&["submodule", "--quiet", "foreach", "--recursive", "git reset -q --hard HEAD"])?;
        git(&["clean", "-ffdq"])?;
        git(&["submodule", "--quiet", "foreach", "--recursive", "git clean -ffdq"])?;
        Ok(true)
    }
}

impl SyncEngine<'_> {
    /// Discard local state in `dir` and check out `revision`
    pub fn destructive_checkout(&self, dir: &Path, revision: &str) -> Result<()> {
        ForceReset::new(self.ctx, dir).checkout(revision)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::submodule::SubmoduleSelector;
    use crate::test_support::{git, head, status, Fixture};

    fn synced(fx: &Fixture) -> std::path::PathBuf {
        let ws = fx.workspace("ws");
        fx.engine()
            .sync_to(&fx.upstream_url(), &ws, "master", &SubmoduleSelector::All)
            .unwrap();
        ws
    }

    #[test]
    fn test_dirty_workspace_is_cleaned() {
        let fx = Fixture::new();
        let ws = synced(&fx);

        fs::write(ws.join("app.txt"), "scribbled\n").unwrap();
        fs::write(ws.join("junk.txt"), "junk\n").unwrap();
        fs::create_dir_all(ws.join("build/out")).unwrap();
        fs::write(ws.join("build/out/artifact"), "bin").unwrap();
        fs::write(ws.join("staged.txt"), "staged\n").unwrap();
        git(&ws, &["add", "staged.txt"]);
        assert!(!status(&ws).is_empty());

        ForceReset::new(fx.ctx(), &ws).checkout("master").unwrap();

        assert_eq!(status(&ws), "");
        assert_eq!(fs::read_to_string(ws.join("app.txt")).unwrap(), "line one\nline two\n");
        assert!(!ws.join("junk.txt").exists());
        assert!(!ws.join("build").exists());
        assert!(!ws.join("staged.txt").exists());
    }

    #[test]
    fn test_clean_tree_reports_nothing_discarded() {
        let fx = Fixture::new();
        let ws = synced(&fx);
        assert!(!ForceReset::new(fx.ctx(), &ws).discard_local_changes().unwrap());

        fs::write(ws.join("junk.txt"), "junk\n").unwrap();
        assert!(ForceReset::new(fx.ctx(), &ws).discard_local_changes().unwrap());
    }

    #[test]
    fn test_checkout_moves_to_older_commit() {
        let fx = Fixture::new();
        let first = fx.upstream_head("master");
        fx.commit_upstream("master", "second.txt", "second\n");
        let ws = synced(&fx);

        fx.engine().destructive_checkout(&ws, &first).unwrap();

        assert_eq!(head(&ws), first);
        assert!(!ws.join("second.txt").exists());
        assert_eq!(status(&ws), "");
    }

    #[test]
    fn test_invalid_revision_leaves_clean_tree() {
        let fx = Fixture::new();
        let ws = synced(&fx);
        let before = head(&ws);
        fs::write(ws.join("junk.txt"), "junk\n").unwrap();

        let result = fx.engine().destructive_checkout(&ws, "no-such-revision");

        assert!(matches!(
            result,
            Err(Error::InvalidRevision { ref revision, .. }) if revision == "no-such-revision"
        ));
        assert_eq!(head(&ws), before);
        assert_eq!(status(&ws), "");
    }

    #[test]
    fn test_submodule_changes_are_discarded() {
        let fx = Fixture::with_submodules(&[]);
        let ws = synced(&fx);

        fs::write(ws.join("sub_small/f.txt"), "scribbled\n").unwrap();
        fs::write(ws.join("sub_small/junk.txt"), "junk\n").unwrap();

        ForceReset::new(fx.ctx(), &ws).checkout("master").unwrap();

        assert_eq!(status(&ws.join("sub_small")), "");
        assert_eq!(
            fs::read_to_string(ws.join("sub_small/f.txt")).unwrap(),
            "small v1\n"
        );
    }
}
