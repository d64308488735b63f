//! Throwaway upstream repositories and shared roots for tests

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::Config;
use crate::context::SharedRootContext;
use crate::engine::SyncEngine;

/// Settings every test git process runs with
const TEST_GIT_CONFIG: &[(&str, &str)] = &[
    ("user.name", "Sync Test"),
    ("user.email", "sync-test@example.com"),
    ("protocol.file.allow", "always"),
    ("init.defaultBranch", "master"),
];

/// Run git in `dir` with the test identity, panicking on failure
pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
    try_git(dir, args).unwrap_or_else(|stderr| {
        panic!("git {:?} in {} failed: {}", args, dir.display(), stderr)
    })
}

/// Run git in `dir`, returning stderr on failure
pub(crate) fn try_git(dir: &Path, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir);
    for (key, value) in TEST_GIT_CONFIG {
        cmd.arg("-c").arg(format!("{}={}", key, value));
    }
    let out = cmd.args(args).output().expect("failed to spawn git");
    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        Err(String::from_utf8_lossy(&out.stderr).into_owned())
    }
}

pub(crate) fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"])
}

pub(crate) fn status(dir: &Path) -> String {
    git(dir, &["status", "--porcelain"])
}

/// An isolated world: bare upstreams, seed clones that push to them, and a
/// shared root for the engine under test
///
/// The main repository is `app` with `app.txt` committed on `master`.
pub(crate) struct Fixture {
    dir: TempDir,
    ctx: SharedRootContext,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::build(&[])
    }

    /// `app` with submodules `sub_big` (repository `big`) and `sub_small`
    /// (repository `small`); `linked` paths are materialized by linking
    pub(crate) fn with_submodules(linked: &[&str]) -> Self {
        let fx = Self::build(linked);
        fx.add_submodule("big", "sub_big");
        fx.add_submodule("small", "sub_small");
        fx
    }

    fn build(linked: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        create_upstream(dir.path(), "app", "app.txt", "line one\nline two\n");

        let mut config = Config {
            shared_root: dir.path().join("root"),
            ..Config::default()
        };
        for (key, value) in TEST_GIT_CONFIG {
            config.git_config.insert(key.to_string(), value.to_string());
        }
        config
            .workdir_linked_submodules
            .extend(linked.iter().map(|p| p.to_string()));

        let ctx = SharedRootContext::new(config).unwrap();
        Self { dir, ctx }
    }

    pub(crate) fn ctx(&self) -> &SharedRootContext {
        &self.ctx
    }

    pub(crate) fn engine(&self) -> SyncEngine<'_> {
        SyncEngine::new(&self.ctx)
    }

    /// Shorten the shared-lock budget and poll the lock quickly
    pub(crate) fn with_lock_wait(mut self, budget: Duration) -> Self {
        let mut config = self.ctx.config().clone();
        config.timeouts.lock_wait = budget;
        let locks = self
            .ctx
            .locks()
            .clone()
            .with_poll_interval(Duration::from_millis(20));
        self.ctx = SharedRootContext::new(config).unwrap().with_lock_manager(locks);
        self
    }

    /// Clone of `app` used to publish upstream changes
    pub(crate) fn seed(&self) -> PathBuf {
        self.seed_of("app")
    }

    pub(crate) fn seed_of(&self, name: &str) -> PathBuf {
        self.dir.path().join("seeds").join(name)
    }

    pub(crate) fn upstream_url(&self) -> String {
        self.url_of("app")
    }

    pub(crate) fn url_of(&self, name: &str) -> String {
        self.upstream_dir(name).display().to_string()
    }

    fn upstream_dir(&self, name: &str) -> PathBuf {
        self.dir.path().join("upstream").join(format!("{}.git", name))
    }

    /// Where a test workspace named `name` lives; not created
    pub(crate) fn workspace(&self, name: &str) -> PathBuf {
        self.dir.path().join("workspaces").join(name)
    }

    /// Create another upstream repository with one commit
    pub(crate) fn create_repo(&self, name: &str) -> String {
        create_upstream(self.dir.path(), name, "README", name);
        self.url_of(name)
    }

    /// Commit `contents` to `file` on `branch` of `app` and push it
    pub(crate) fn commit_upstream(&self, branch: &str, file: &str, contents: &str) -> String {
        self.commit_to("app", branch, file, contents)
    }

    /// Commit to `branch` of repository `name` and push it, returning the commit
    pub(crate) fn commit_to(&self, name: &str, branch: &str, file: &str, contents: &str) -> String {
        let seed = self.seed_of(name);
        git(&seed, &["fetch", "-q", "origin"]);
        let tracking = format!("origin/{}", branch);
        if try_git(&seed, &["rev-parse", "--verify", "-q", &tracking]).is_ok() {
            git(&seed, &["checkout", "-q", "-B", branch, &tracking]);
        } else {
            git(&seed, &["checkout", "-q", "-B", branch]);
        }
        fs::write(seed.join(file), contents).unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", &format!("Update {} on {}", file, branch)]);
        git(&seed, &["push", "-q", "origin", branch]);
        head(&seed)
    }

    /// Create upstream branch `name` of `app` at `from`
    pub(crate) fn create_upstream_branch(&self, name: &str, from: &str) {
        let seed = self.seed();
        git(&seed, &["fetch", "-q", "origin"]);
        git(
            &seed,
            &["push", "-q", "origin", &format!("refs/remotes/origin/{}:refs/heads/{}", from, name)],
        );
    }

    /// Commit `branch` points at in the bare upstream of `app`
    pub(crate) fn upstream_head(&self, branch: &str) -> String {
        self.upstream_rev("app", branch)
    }

    pub(crate) fn upstream_rev(&self, name: &str, revision: &str) -> String {
        git(&self.upstream_dir(name), &["rev-parse", revision])
    }

    fn add_submodule(&self, name: &str, path: &str) {
        create_upstream(self.dir.path(), name, "f.txt", &format!("{} v1\n", name));
        let seed = self.seed();
        git(&seed, &["submodule", "add", "-q", &self.url_of(name), path]);
        git(&seed, &["commit", "-q", "-m", &format!("Add {}", path)]);
        git(&seed, &["push", "-q", "origin", "master"]);
    }
}

/// Bare `upstream/<name>.git` plus a seed clone with one commit on master
fn create_upstream(base: &Path, name: &str, file: &str, contents: &str) {
    let bare = base.join("upstream").join(format!("{}.git", name));
    fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "-q", "--bare"]);

    let seed = base.join("seeds").join(name);
    fs::create_dir_all(base.join("seeds")).unwrap();
    git(
        base,
        &["clone", "-q", &bare.display().to_string(), &seed.display().to_string()],
    );
    fs::write(seed.join(file), contents).unwrap();
    git(&seed, &["add", "-A"]);
    git(&seed, &["commit", "-q", "-m", "Initial commit"]);
    git(&seed, &["push", "-q", "origin", "master"]);
}
