//! Resolved shared-root state passed into every component

use std::path::{Path, PathBuf};

use crate::config::{Config, TimeoutConfig};
use crate::git::command::GitCommand;
use crate::lock::{LockGuard, LockManager};
use crate::Result;

/// Lock token serializing fetches and large-object maintenance under one root
pub const SHARED_LOCK: &str = "shared";

const MIRRORS_DIR: &str = "repositories";
const LOCKS_DIR: &str = "locks";

/// Everything the engine needs to know about the shared root
///
/// Holds resolved paths, the lock manager and the configuration. Tests point
/// one at a temporary directory to get a fully isolated root.
#[derive(Debug, Clone)]
pub struct SharedRootContext {
    config: Config,
    locks: LockManager,
}

impl SharedRootContext {
    /// Build a context for `config.shared_root`, creating its directories
    pub fn new(config: Config) -> Result<Self> {
        let root = &config.shared_root;
        std::fs::create_dir_all(root.join(MIRRORS_DIR))?;
        let locks = LockManager::new(root.join(LOCKS_DIR));
        Ok(Self { config, locks })
    }

    /// Replace the lock manager
    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    /// The shared root directory
    pub fn root(&self) -> &Path {
        &self.config.shared_root
    }

    /// Full configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Time budgets
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.config.timeouts
    }

    /// Name of the single upstream remote
    pub fn remote(&self) -> &str {
        &self.config.remote
    }

    /// Trunk branch name
    pub fn trunk(&self) -> &str {
        &self.config.trunk
    }

    /// `<remote>/<branch>`
    pub fn remote_ref(&self, branch: &str) -> String {
        format!("{}/{}", self.config.remote, branch)
    }

    /// Directory holding every canonical mirror
    pub fn mirrors_dir(&self) -> PathBuf {
        self.root().join(MIRRORS_DIR)
    }

    /// Canonical mirror location for repository `name`
    pub fn mirror_path(&self, name: &str) -> PathBuf {
        self.mirrors_dir().join(name)
    }

    /// Whether a submodule path is materialized by linking a shared mirror
    pub fn is_workdir_linked(&self, path: &str) -> bool {
        self.config.workdir_linked_submodules.contains(path)
    }

    /// Lock manager for this root
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Take the shared lock, waiting up to the configured budget
    pub fn lock_shared(&self) -> Result<LockGuard> {
        self.locks.acquire(SHARED_LOCK, self.config.timeouts.lock_wait)
    }

    /// A git command in `dir` with configured overrides and the default budget
    ///
    /// Checking out a branch that only exists on the remote never records
    /// tracking settings, since workspaces share their mirror's config file.
    pub fn git(&self, dir: impl AsRef<Path>) -> GitCommand {
        let mut cmd = GitCommand::new(dir, self.config.timeouts.command);
        for (key, value) in &self.config.git_config {
            cmd = cmd.config(key.as_str(), value.as_str());
        }
        cmd.config("branch.autoSetupMerge", "false")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_root() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            shared_root: dir.path().join("root"),
            ..Config::default()
        };
        let ctx = SharedRootContext::new(config).unwrap();

        assert!(ctx.mirrors_dir().is_dir());
        assert_eq!(ctx.mirror_path("webapp"), dir.path().join("root/repositories/webapp"));
        assert_eq!(ctx.remote_ref("deploy-1"), "origin/deploy-1");
        assert_eq!(
            ctx.locks().lock_path(SHARED_LOCK),
            dir.path().join("root/locks/shared.lock")
        );
    }

    #[test]
    fn test_git_carries_config_overrides() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            shared_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        config
            .git_config
            .insert("user.name".to_string(), "Deploy Bot".to_string());
        let ctx = SharedRootContext::new(config).unwrap();

        let name = ctx
            .git(dir.path())
            .args(["config", "--get", "user.name"])
            .stdout()
            .unwrap();
        assert_eq!(name, "Deploy Bot");
    }

    #[test]
    fn test_linked_allow_list() {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            shared_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        config
            .workdir_linked_submodules
            .insert("third_party/assets".to_string());
        let ctx = SharedRootContext::new(config).unwrap();

        assert!(ctx.is_workdir_linked("third_party/assets"));
        assert!(!ctx.is_workdir_linked("third_party"));
    }
}
