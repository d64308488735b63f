//! Submodule materialization
//!
//! Submodules on the configured allow-list are materialized by linking the
//! path to the canonical mirror of the submodule's repository, the same way
//! top-level workspaces are. Every other submodule goes through the ordinary
//! `git submodule` machinery.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::engine::SyncEngine;
use crate::git::{GitRepo, RepoUrl};
use crate::mirror::is_linked_workdir;
use crate::{Error, Result};

/// Which submodules to materialize
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmoduleSelector {
    /// Every declared submodule
    #[default]
    All,
    /// None at all
    Skip,
    /// Submodules at, or below, one of these paths
    Paths(Vec<String>),
}

impl SubmoduleSelector {
    /// Whether the submodule at `path` is selected
    pub fn selects(&self, path: &str) -> bool {
        match self {
            SubmoduleSelector::All => true,
            SubmoduleSelector::Skip => false,
            SubmoduleSelector::Paths(prefixes) => prefixes.iter().any(|p| {
                path == p.as_str() || (path.starts_with(p.as_str()) && path[p.len()..].starts_with('/'))
            }),
        }
    }
}

impl FromStr for SubmoduleSelector {
    type Err = Error;

    /// `""` or `"all"` selects everything, `"none"` nothing, otherwise a
    /// comma-separated list of paths
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return Ok(SubmoduleSelector::All);
        }
        if s == "none" {
            return Ok(SubmoduleSelector::Skip);
        }
        let paths: Vec<String> = s
            .split(',')
            .map(|p| p.trim().trim_end_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect();
        if paths.is_empty() {
            return Err(Error::Config(format!("No submodule paths in '{}'", s)));
        }
        Ok(SubmoduleSelector::Paths(paths))
    }
}

/// A submodule declared in `.gitmodules`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submodule {
    /// Name used in `submodule.<name>.*` config keys
    pub name: String,
    /// Path relative to the superproject
    pub path: String,
}

impl SyncEngine<'_> {
    /// Bring the selected submodules of `dir` to the commits HEAD records
    ///
    /// Does nothing for a repository that is itself a submodule; the
    /// superproject materializes its nested submodules recursively.
    pub fn materialize_submodules(&self, dir: &Path, selector: &SubmoduleSelector) -> Result<()> {
        if *selector == SubmoduleSelector::Skip {
            tracing::debug!(dir = %dir.display(), "submodules skipped");
            return Ok(());
        }
        if GitRepo::open(dir)?.is_nested() {
            tracing::debug!(dir = %dir.display(), "nested repository; superproject materializes submodules");
            return Ok(());
        }

        let selected: Vec<Submodule> = declared_submodules(self, dir)?
            .into_iter()
            .filter(|s| selector.selects(&s.path))
            .collect();
        if selected.is_empty() {
            return Ok(());
        }

        let (linked, ordinary): (Vec<_>, Vec<_>) = selected
            .iter()
            .partition(|s| self.ctx.is_workdir_linked(&s.path));

        for sub in &linked {
            if is_linked_workdir(&dir.join(&sub.path)) {
                self.refresh_linked_submodule(dir, sub)?;
            } else {
                self.link_submodule(dir, sub)?;
            }
        }

        let ordinary_paths: Vec<&str> = ordinary.iter().map(|s| s.path.as_str()).collect();
        if !ordinary_paths.is_empty() {
            // Sync and init write the mirror's config, which every workspace shares
            let _held = self.ctx.lock_shared()?;
            self.git(dir)
                .args(["submodule", "--quiet", "sync", "--recursive", "--"])
                .args(ordinary_paths.iter().copied())
                .timeout(self.ctx.timeouts().submodule_sync)
                .run()?;
            self.git(dir)
                .args(["submodule", "--quiet", "init", "--"])
                .args(ordinary_paths.iter().copied())
                .run()?;
        }

        tracing::info!(dir = %dir.display(), count = selected.len(), "updating submodules");
        self.git(dir)
            .args(["submodule", "--quiet", "update", "--init", "--recursive", "--"])
            .args(ordinary_paths.iter().copied())
            .args(linked.iter().map(|s| s.path.as_str()))
            .timeout(self.ctx.timeouts().submodule_update)
            .run()?;
        Ok(())
    }

    /// Materialize a submodule path as a working tree of its canonical mirror
    fn link_submodule(&self, dir: &Path, sub: &Submodule) -> Result<()> {
        let target = dir.join(&sub.path);

        // Registration writes the shared config, so it happens under the lock
        let held = self.ctx.lock_shared()?;
        self.git(dir)
            .args(["submodule", "--quiet", "init", "--", &sub.path])
            .run()?;
        let url = self
            .git(dir)
            .args(["config", "--get", &format!("submodule.{}.url", sub.name)])
            .stdout()?;
        let url = RepoUrl::parse(&url)?;
        let mirror = self.ensure_mirror_locked(&held, &url, true)?;
        drop(held);

        tracing::info!(
            path = %sub.path,
            mirror = %mirror.display(),
            "linking submodule to canonical mirror"
        );
        if GitRepo::exists_at(&target) {
            fs::remove_dir_all(&target)?;
        }
        fs::create_dir_all(&target)?;
        self.link_workdir(&mirror, &target)?;

        let recorded = recorded_commit(self, dir, &sub.path)?;
        self.git(&target)
            .args(["checkout", "-q", "-f", &recorded])
            .run()?;
        Ok(())
    }

    /// Make sure the commit HEAD records for an already linked path is present
    fn refresh_linked_submodule(&self, dir: &Path, sub: &Submodule) -> Result<()> {
        let recorded = recorded_commit(self, dir, &sub.path)?;
        let target = dir.join(&sub.path);
        if GitRepo::open(&target)?.resolve_commit(&recorded).is_none() {
            tracing::info!(path = %sub.path, %recorded, "recorded commit missing from mirror; fetching");
            self.fetch(&target)?;
        }
        Ok(())
    }
}

/// Submodules declared in `dir/.gitmodules`, in file order
pub(crate) fn declared_submodules(engine: &SyncEngine<'_>, dir: &Path) -> Result<Vec<Submodule>> {
    if !dir.join(".gitmodules").exists() {
        return Ok(Vec::new());
    }
    // Exit status 1 means no matching keys
    let output = engine
        .git(dir)
        .args(["config", "-f", ".gitmodules", "--get-regexp", r"^submodule\..*\.path$"])
        .output()?;
    if !output.success() {
        return Ok(Vec::new());
    }
    Ok(parse_gitmodules_paths(&output.stdout))
}

fn parse_gitmodules_paths(listing: &str) -> Vec<Submodule> {
    listing
        .lines()
        .filter_map(|line| {
            let (key, path) = line.split_once(' ')?;
            let name = key.strip_prefix("submodule.")?.strip_suffix(".path")?;
            Some(Submodule {
                name: name.to_string(),
                path: path.trim().to_string(),
            })
        })
        .collect()
}

/// Commit the superproject's HEAD records for the submodule at `path`
fn recorded_commit(engine: &SyncEngine<'_>, dir: &Path, path: &str) -> Result<String> {
    engine
        .git(dir)
        .args(["rev-parse", &format!("HEAD:{}", path)])
        .stdout()
}
