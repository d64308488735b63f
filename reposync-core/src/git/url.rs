//! Repository URL parsing and push URL rewriting

use std::path::Path;

use crate::{Error, Result};

/// How a repository URL reaches its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// `https://` or `http://`
    Https,
    /// `ssh://` or scp-style `user@host:path`
    Ssh,
    /// `file://` or a plain filesystem path
    Local,
}

/// Parsed repository information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    /// URL exactly as configured
    pub raw: String,
    /// Transport
    pub kind: UrlKind,
    /// Host (empty for local repositories)
    pub host: String,
    /// Path on the host without leading slash or `.git` suffix (e.g. "owner/repo")
    pub path: String,
}

impl RepoUrl {
    /// Parse a repository URL
    ///
    /// Supports:
    /// - `https://github.com/owner/repo(.git)`
    /// - `ssh://git@github.com/owner/repo.git`
    /// - `git@github.com:owner/repo.git`
    /// - `file:///srv/git/repo.git` and `/srv/git/repo.git`
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Config("Empty repository URL".to_string()));
        }

        if input.contains("://") {
            let url = url::Url::parse(input)
                .map_err(|e| Error::Config(format!("Invalid repository URL '{}': {}", input, e)))?;
            let kind = match url.scheme() {
                "https" | "http" => UrlKind::Https,
                "ssh" | "git+ssh" => UrlKind::Ssh,
                "file" => UrlKind::Local,
                other => {
                    return Err(Error::Config(format!(
                        "Unsupported URL scheme '{}' in {}",
                        other, input
                    )))
                }
            };
            return Self::build(input, kind, url.host_str().unwrap_or(""), url.path());
        }

        // scp-style user@host:path, but not a Windows-ish or local path with a colon
        if let Some((user_host, path)) = input.split_once(':') {
            if !user_host.contains('/') && !Path::new(input).exists() {
                let host = user_host.rsplit('@').next().unwrap_or(user_host);
                return Self::build(input, UrlKind::Ssh, host, path);
            }
        }

        Self::build(input, UrlKind::Local, "", input)
    }

    fn build(raw: &str, kind: UrlKind, host: &str, path: &str) -> Result<Self> {
        let path = path
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .trim_start_matches('/')
            .to_string();
        let path = if kind == UrlKind::Local {
            // Keep local paths absolute so they still name the same repository
            format!("/{}", path)
        } else {
            path
        };

        let url = Self {
            raw: raw.to_string(),
            kind,
            host: host.to_string(),
            path,
        };
        if url.name().is_empty() {
            return Err(Error::Config(format!(
                "Repository URL '{}' does not name a repository",
                raw
            )));
        }
        Ok(url)
    }

    /// Logical repository name, which names its canonical mirror
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// URL to push to
    ///
    /// HTTPS remotes are rewritten to `git@host:path.git` so configured deploy
    /// keys are used; every other form is pushed to as configured.
    pub fn push_url(&self) -> String {
        match self.kind {
            UrlKind::Https => format!("git@{}:{}.git", self.host, self.path),
            UrlKind::Ssh | UrlKind::Local => self.raw.clone(),
        }
    }
}
