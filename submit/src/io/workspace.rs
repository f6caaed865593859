//! Per-submission temporary workspace.
//!
//! Each submission gets its own directory under the configured workspace root.
//! The directory is removed when the [`Workspace`] is dropped, on every exit
//! path, including unwinding.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, warn};

/// An isolated scratch area owned by one submission.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    name: String,
    released: bool,
}

impl Workspace {
    /// Create a fresh workspace under `base_dir` with download, extract and fixture subpaths.
    pub fn create(base_dir: &Path, submitter_id: &str) -> Result<Self> {
        fs::create_dir_all(base_dir)
            .with_context(|| format!("create workspace dir {}", base_dir.display()))?;
        // Paths inside the workspace are handed to child processes with other working dirs.
        let base_dir = base_dir
            .canonicalize()
            .with_context(|| format!("resolve workspace dir {}", base_dir.display()))?;

        let name = build_workspace_name(submitter_id, &generate_timestamp(), &generate_short_id());
        let root = base_dir.join(&name);
        fs::create_dir(&root).with_context(|| format!("create workspace root {}", root.display()))?;

        let workspace = Self {
            root,
            name,
            released: false,
        };
        for dir in [workspace.download_dir(), workspace.extract_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        debug!(root = %workspace.root.display(), "workspace created");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("download")
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.download_dir().join("bundle.zip")
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.root.join("extract")
    }

    /// Target of the registry fixture clone. Not created up front; `git clone` creates it.
    pub fn fixture_dir(&self) -> PathBuf {
        self.root.join("fixture")
    }

    /// Delete the workspace now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "workspace released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), err = %e, "failed to release workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release_inner();
    }
}

pub fn build_workspace_name(submitter_id: &str, timestamp: &str, short_id: &str) -> String {
    format!("{submitter_id}_{timestamp}_{short_id}")
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_name_uses_expected_format() {
        let name = build_workspace_name("42", "20260118_120000", "abc123de");
        assert_eq!(name, "42_20260118_120000_abc123de");
    }

    #[test]
    fn creates_isolated_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = Workspace::create(temp.path(), "42").expect("workspace a");
        let b = Workspace::create(temp.path(), "42").expect("workspace b");
        assert_ne!(a.root(), b.root());
        assert!(a.download_dir().is_dir());
        assert!(a.extract_dir().is_dir());
        assert!(!a.fixture_dir().exists());
        assert!(a.bundle_path().starts_with(a.root()));
    }

    #[test]
    fn root_is_absolute() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "42").expect("workspace");
        assert!(ws.root().is_absolute());
        assert!(ws.name().starts_with("42_"));
    }

    #[test]
    fn drop_removes_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = {
            let ws = Workspace::create(temp.path(), "42").expect("workspace");
            fs::write(ws.extract_dir().join("file.txt"), "x").expect("write");
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn release_tolerates_already_deleted_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "42").expect("workspace");
        fs::remove_dir_all(ws.root()).expect("remove");
        ws.release();
    }

    #[test]
    fn release_happens_during_unwind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let base = temp.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _ws = Workspace::create(&base, "42").expect("workspace");
            panic!("fault mid-pipeline");
        });
        assert!(result.is_err());
        let leftovers = fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }
}
