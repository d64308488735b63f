//! Configuration management for reposync
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (REPOSYNC_*)
//! 3. Config file (~/.config/reposync/config.toml)
//! 4. Default values

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Time budgets for every bounded external call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long to wait for the shared-root lock
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,

    /// Best-effort pruning of stale tags
    #[serde(with = "humantime_serde")]
    pub prune: Duration,

    /// Tag-and-history fetch
    #[serde(with = "humantime_serde")]
    pub fetch: Duration,

    /// Fresh clone of a canonical mirror
    #[serde(with = "humantime_serde")]
    pub clone: Duration,

    /// Any other local VCS operation (checkout, reset, clean, merge, ...)
    #[serde(with = "humantime_serde")]
    pub command: Duration,

    /// `git submodule sync`
    #[serde(with = "humantime_serde")]
    pub submodule_sync: Duration,

    /// `git submodule update`
    #[serde(with = "humantime_serde")]
    pub submodule_update: Duration,

    /// Branch push
    #[serde(with = "humantime_serde")]
    pub push: Duration,

    /// Large-object pull/push
    #[serde(with = "humantime_serde")]
    pub bigfile: Duration,
}

impl TimeoutConfig {
    /// Name of the first external-call budget set to zero
    fn first_zero(&self) -> Option<&'static str> {
        [
            ("prune", self.prune),
            ("fetch", self.fetch),
            ("clone", self.clone),
            ("command", self.command),
            ("submodule_sync", self.submodule_sync),
            ("submodule_update", self.submodule_update),
            ("push", self.push),
            ("bigfile", self.bigfile),
        ]
        .into_iter()
        .find(|(_, budget)| budget.is_zero())
        .map(|(name, _)| name)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(2 * 3600),
            prune: Duration::from_secs(60),
            fetch: Duration::from_secs(2 * 3600),
            clone: Duration::from_secs(60 * 60),
            command: Duration::from_secs(10 * 60),
            submodule_sync: Duration::from_secs(10 * 60),
            submodule_update: Duration::from_secs(60 * 60),
            push: Duration::from_secs(60 * 60),
            bigfile: Duration::from_secs(60 * 60),
        }
    }
}

/// Alert delivery configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Program invoked as `<command> <severity> <message>`; alerts are only logged when unset
    pub command: Option<String>,
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding canonical mirrors and lock tokens
    pub shared_root: PathBuf,

    /// The single upstream remote every repository syncs against
    pub remote: String,

    /// Trunk branch name; never a valid deploy-merge target
    pub trunk: String,

    /// Submodule paths materialized by linking a shared mirror instead of cloning
    pub workdir_linked_submodules: BTreeSet<String>,

    /// Extra `-c key=value` settings passed to every git invocation
    pub git_config: BTreeMap<String, String>,

    /// Time budgets
    pub timeouts: TimeoutConfig,

    /// Alert delivery
    pub alert: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_root: default_shared_root(),
            remote: "origin".to_string(),
            trunk: "master".to_string(),
            workdir_linked_submodules: BTreeSet::new(),
            git_config: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

/// Get the default shared root
///
/// Returns `~/.cache/reposync`, or a directory under the system temp dir when no
/// cache directory is known.
pub fn default_shared_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reposync")
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::from_toml(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/reposync/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reposync").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - REPOSYNC_SHARED_ROOT: shared root directory
    /// - REPOSYNC_REMOTE: remote name
    /// - REPOSYNC_TRUNK: trunk branch name
    /// - REPOSYNC_ALERT_COMMAND: alert program
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("REPOSYNC_SHARED_ROOT") {
            self.shared_root = PathBuf::from(root);
        }

        if let Ok(remote) = std::env::var("REPOSYNC_REMOTE") {
            self.remote = remote;
        }

        if let Ok(trunk) = std::env::var("REPOSYNC_TRUNK") {
            self.trunk = trunk;
        }

        if let Ok(command) = std::env::var("REPOSYNC_ALERT_COMMAND") {
            self.alert.command = Some(command);
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, shared_root: Option<PathBuf>, trunk: Option<String>) -> Self {
        if let Some(root) = shared_root {
            self.shared_root = root;
        }

        if let Some(trunk) = trunk {
            self.trunk = trunk;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        shared_root: Option<PathBuf>,
        trunk: Option<String>,
    ) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        let config = base
            .with_env_overrides()
            .with_cli_overrides(shared_root, trunk);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(Error::Config("remote must not be empty".to_string()));
        }
        if self.trunk.trim().is_empty() {
            return Err(Error::Config("trunk must not be empty".to_string()));
        }
        if let Some(path) = self
            .workdir_linked_submodules
            .iter()
            .find(|p| p.is_empty() || p.starts_with('/') || p.ends_with('/'))
        {
            return Err(Error::Config(format!(
                "workdir-linked submodule path '{}' must be relative without a trailing slash",
                path
            )));
        }
        if let Some(name) = self.timeouts.first_zero() {
            return Err(Error::Config(format!("timeouts.{} must be greater than zero", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.remote, "origin");
        assert_eq!(config.trunk, "master");
        assert!(config.workdir_linked_submodules.is_empty());
        assert_eq!(config.timeouts.lock_wait, Duration::from_secs(7200));
        assert_eq!(config.timeouts.prune, Duration::from_secs(60));
        assert!(config.shared_root.ends_with("reposync"));
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default()
            .with_cli_overrides(Some(PathBuf::from("/srv/git")), Some("main".to_string()));

        assert_eq!(config.shared_root, PathBuf::from("/srv/git"));
        assert_eq!(config.trunk, "main");
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
shared_root = "/mnt/repositories"
trunk = "main"
workdir_linked_submodules = ["third_party/big-assets", "vendor/fonts"]

[git_config]
"user.name" = "Deploy Bot"

[timeouts]
fetch = "30m"
lock_wait = "1h 30m"

[alert]
command = "/usr/local/bin/page-oncall"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.shared_root, PathBuf::from("/mnt/repositories"));
        assert_eq!(config.trunk, "main");
        assert!(config
            .workdir_linked_submodules
            .contains("third_party/big-assets"));
        assert_eq!(config.git_config["user.name"], "Deploy Bot");
        assert_eq!(config.timeouts.fetch, Duration::from_secs(1800));
        assert_eq!(config.timeouts.lock_wait, Duration::from_secs(5400));
        // Unspecified timeouts keep their defaults
        assert_eq!(config.timeouts.clone, Duration::from_secs(3600));
        assert_eq!(
            config.alert.command.as_deref(),
            Some("/usr/local/bin/page-oncall")
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml("remote = \"upstream\"\n").unwrap();
        assert_eq!(config.remote, "upstream");
        assert_eq!(config.trunk, "master");
    }

    #[test]
    fn test_rejects_absolute_linked_submodule() {
        let result = Config::from_toml("workdir_linked_submodules = [\"/abs/path\"]\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = Config::from_toml("[timeouts]\nfetch = \"0s\"\n");
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("timeouts.fetch")),
            other => panic!("expected config error, got {:?}", other),
        }

        // A zero lock wait only means a single attempt
        let config = Config::from_toml("[timeouts]\nlock_wait = \"0s\"\n").unwrap();
        assert!(config.timeouts.lock_wait.is_zero());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "trunk = \"develop\"\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.trunk, "develop");
    }
}
