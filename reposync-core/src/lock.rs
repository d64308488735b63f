//! Named, timed mutual exclusion over lock files in the shared root
//!
//! Locks are advisory `flock`s taken through `fs2`. They serialize every
//! agent that shares a root, across processes and machines that see the same
//! filesystem. Waiting is bounded; running out of budget is a hard failure.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::{Error, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hands out [`LockGuard`]s for lock files under one directory
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    poll_interval: Duration,
}

/// Exclusive hold on a named lock; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    name: String,
    acquired: Instant,
}

impl LockManager {
    /// Create a manager for lock files in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Change how often a contended lock is retried
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Path of the file backing lock `name`
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", name))
    }

    /// Acquire lock `name`, waiting at most `budget`
    pub fn acquire(&self, name: &str, budget: Duration) -> Result<LockGuard> {
        let path = self.lock_path(name);
        let file = open_lock_file(&path)?;
        let started = Instant::now();
        let mut announced = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let waited = started.elapsed();
                    if announced {
                        tracing::info!(lock = %name, ?waited, "acquired lock");
                    } else {
                        tracing::debug!(lock = %name, "acquired lock");
                    }
                    return Ok(LockGuard {
                        file,
                        name: name.to_string(),
                        acquired: Instant::now(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= budget {
                        tracing::error!(lock = %name, ?waited, "gave up waiting for lock");
                        return Err(Error::LockTimeout {
                            name: name.to_string(),
                            waited,
                        });
                    }
                    if !announced {
                        tracing::info!(lock = %name, path = %path.display(), "lock held elsewhere; waiting");
                        announced = true;
                    }
                    std::thread::sleep(self.poll_interval.min(budget - waited));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl LockGuard {
    /// Name of the held lock
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Only the flock is released; lock files are never removed
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.name, error = %e, "failed to release lock");
        } else {
            tracing::debug!(lock = %self.name, held = ?self.acquired.elapsed(), "released lock");
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
