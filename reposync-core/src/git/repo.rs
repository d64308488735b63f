//! Read-only repository queries backed by libgit2

use std::path::{Path, PathBuf};

use git2::{Oid, Repository};

use crate::{Error, Result};

/// A git repository opened for inspection
///
/// Mutations never go through this type; they run as bounded `git`
/// subprocesses so every one of them carries a timeout.
pub struct GitRepo {
    /// The underlying git2 repository
    repo: Repository,
    /// Path to the working tree root
    root: PathBuf,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl GitRepo {
    /// Open the repository whose working tree is exactly `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::open(path).map_err(|e| {
            if e.code() == git2::ErrorCode::NotFound {
                Error::Config(format!("Not a git repository: {}", path.display()))
            } else {
                Error::Git(e)
            }
        })?;

        let root = repo
            .workdir()
            .ok_or_else(|| Error::Config("Bare repositories are not supported".to_string()))?
            .to_path_buf();

        Ok(Self { repo, root })
    }

    /// Get the repository root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` holds a repository of its own (a `.git` entry, file or directory)
    pub fn exists_at(path: impl AsRef<Path>) -> bool {
        path.as_ref().join(".git").exists()
    }

    /// Commit id HEAD points at
    pub fn head_commit(&self) -> Result<String> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Get the current branch name, `None` when HEAD is detached or unborn
    pub fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(h) => h,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(Error::Git(e)),
        };

        if head.is_branch() {
            Ok(head.shorthand().map(|s| s.to_string()))
        } else {
            Ok(None)
        }
    }

    /// Whether `refs/remotes/<remote>/<branch>` exists
    pub fn remote_branch_exists(&self, remote: &str, branch: &str) -> bool {
        self.repo
            .find_reference(&format!("refs/remotes/{}/{}", remote, branch))
            .is_ok()
    }

    /// Resolve a revision to the commit it names, `None` when it does not resolve
    pub fn resolve_commit(&self, revision: &str) -> Option<String> {
        self.repo
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .map(|c| c.id().to_string())
            .ok()
    }

    /// Merge base of two commits, `None` when the histories are unrelated
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let a = Oid::from_str(a)?;
        let b = Oid::from_str(b)?;
        match self.repo.merge_base(a, b) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::Git(e)),
        }
    }

    /// URL configured for `remote`
    pub fn remote_url(&self, remote: &str) -> Result<String> {
        let found = self
            .repo
            .find_remote(remote)
            .map_err(|e| Error::Config(format!("Remote '{}' not found: {}", remote, e)))?;
        found
            .url()
            .map(|u| u.to_string())
            .ok_or_else(|| Error::Config(format!("Remote '{}' has no usable URL", remote)))
    }

    /// Whether this repository's git dir lives inside a parent's `.git/modules` store
    pub fn is_nested(&self) -> bool {
        is_modules_git_dir(self.repo.path())
    }
}

/// Whether a git dir path is a nested repository's dir under `<parent>/.git/modules/`
pub(crate) fn is_modules_git_dir(git_dir: &Path) -> bool {
    let components: Vec<_> = git_dir.components().map(|c| c.as_os_str()).collect();
    components
        .windows(2)
        .any(|pair| pair[0] == ".git" && pair[1] == "modules")
}
