//! Serializing gate for shared repository working copies.
//!
//! Concurrent submissions share the content and registry checkouts. Every
//! mutating sequence against a checkout runs while holding the gate for that
//! checkout's path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::io::deadline::Deadline;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
#[error("deadline passed while waiting for the lock on {}", .repo.display())]
pub struct LockTimeout {
    pub repo: PathBuf,
}

/// One mutex per repository path.
#[derive(Debug, Default)]
pub struct RepoLocks {
    gates: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate for `repo`. Paths are compared after canonicalization when possible.
    pub fn gate(&self, repo: &Path) -> Arc<Mutex<()>> {
        let key = repo.canonicalize().unwrap_or_else(|_| repo.to_path_buf());
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.entry(key).or_default().clone()
    }

    /// Run `f` while holding the gate for `repo`, waiting no later than `deadline`.
    ///
    /// A gate poisoned by a panicking holder is still usable: every sequence
    /// starts by resetting the working tree, so no state survives the panic.
    pub fn with_lock<T>(
        &self,
        repo: &Path,
        deadline: Deadline,
        f: impl FnOnce() -> T,
    ) -> Result<T, LockTimeout> {
        let gate = self.gate(repo);
        let _guard = loop {
            match gate.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => match deadline.remaining() {
                    Some(left) => thread::sleep(left.min(POLL_INTERVAL)),
                    None => {
                        warn!(repo = %repo.display(), "gave up waiting for repository lock");
                        return Err(LockTimeout {
                            repo: repo.to_path_buf(),
                        });
                    }
                },
            }
        };
        debug!(repo = %repo.display(), "repository lock held");
        Ok(f())
    }
}
