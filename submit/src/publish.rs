//! Publish sequences for the content repository and the metadata registry.
//!
//! Both sequences assume the caller holds the repository lock for the working
//! copy they mutate. Each starts from a known-clean tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::naming::{REGISTRY_ROOT, branch_name, content_subpath};
use crate::core::types::{PullRequestState, RegistryEntry, ThemeMetadata};
use crate::io::config::{ContentRepoConfig, RegistryConfig};
use crate::io::repo::{PullRequestDraft, RepoClient, RepoError};
use crate::io::templates::PullRequestText;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("publish i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialize registry entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path, source: io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of the content publish sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOutcome {
    /// Staging produced nothing new; nothing was committed or pushed.
    NoChanges { subpath: String },
    Published { subpath: String, commit: String },
}

/// Replace the submitter's theme directory in the content repository, then commit and push.
///
/// The working copy is first moved to the remote branch tip, so local commits
/// left behind by a failed push are discarded and the staged-file count is
/// measured against what the remote actually has.
#[instrument(skip_all, fields(repo = %repo.workdir().display(), submitter_id, theme = %theme.name))]
pub fn publish_content(
    repo: &RepoClient<'_>,
    content: &ContentRepoConfig,
    extract_dir: &Path,
    submitter_id: &str,
    theme: &ThemeMetadata,
) -> Result<ContentOutcome, PublishError> {
    repo.hard_reset("HEAD")?;
    repo.clean()?;
    repo.checkout(&content.branch)?;
    repo.pull(&content.remote, &content.branch)?;

    let subpath = content_subpath(submitter_id, &theme.name);
    let target = repo.workdir().join(&subpath);
    if target.exists() {
        debug!(target = %target.display(), "replacing previous submission");
        fs::remove_dir_all(&target).map_err(|e| io_err(&target, e))?;
    }
    copy_tree(extract_dir, &target)?;

    repo.stage(&subpath)?;
    let staged = repo.staged_file_count()?;
    if staged == 0 {
        info!(%subpath, "no staged changes");
        return Ok(ContentOutcome::NoChanges { subpath });
    }

    repo.commit(&format!("Publish theme {} by {}", theme.name, theme.author))?;
    repo.push(false, Some((content.remote.as_str(), content.branch.as_str())))?;
    let commit = repo.latest_commit_hash()?;
    info!(%subpath, %commit, staged, "content published");
    Ok(ContentOutcome::Published { subpath, commit })
}

/// Rebuild the submitter's registry branch from upstream with one entry file, then force-push it.
///
/// Returns the branch name.
#[instrument(skip_all, fields(repo = %repo.workdir().display(), submitter_id, entry = entry_path))]
pub fn publish_metadata(
    repo: &RepoClient<'_>,
    registry: &RegistryConfig,
    submitter_id: &str,
    entry_path: &str,
    entry: &RegistryEntry,
    theme: &ThemeMetadata,
) -> Result<String, PublishError> {
    let upstream_ref = format!("{}/{}", registry.upstream_remote, registry.upstream_branch);
    repo.hard_reset("HEAD")?;
    repo.checkout(&registry.upstream_branch)?;
    repo.fetch(&registry.upstream_remote)?;
    repo.clean()?;
    repo.hard_reset(&upstream_ref)?;

    let branch = branch_name(submitter_id);
    repo.create_branch(&branch)?;

    let target = repo.workdir().join(entry_path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut payload = serde_json::to_string_pretty(entry)?;
    payload.push('\n');
    fs::write(&target, payload).map_err(|e| io_err(&target, e))?;

    repo.stage(REGISTRY_ROOT)?;
    repo.commit(&format!("Add {} by {}", theme.name, theme.author))?;
    repo.push(true, Some((registry.push_remote.as_str(), branch.as_str())))?;
    info!(%branch, "registry branch pushed");
    Ok(branch)
}

/// Open a pull request for `branch` unless one is already open.
///
/// An existing request already shows the force-pushed branch, so it is reported
/// as updated and left alone.
#[instrument(skip_all, fields(branch))]
pub fn ensure_pull_request(
    repo: &RepoClient<'_>,
    registry: &RegistryConfig,
    branch: &str,
    text: &PullRequestText,
) -> Result<PullRequestState, PublishError> {
    if let Some(url) = repo.open_pull_request(&registry.upstream_repo, branch)? {
        info!(%url, "pull request already open");
        return Ok(PullRequestState::Updated { url });
    }
    let head = format!("{}:{}", registry.fork_owner, branch);
    let url = repo.pull_request_create(&PullRequestDraft {
        upstream_repo: &registry.upstream_repo,
        base: &registry.upstream_branch,
        head: &head,
        title: &text.title,
        body: &text.body,
    })?;
    info!(%url, "pull request created");
    Ok(PullRequestState::Created { url })
}

/// Copy the contents of `src` into `dst`, skipping any nested `.git` directory.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), PublishError> {
    fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            io_err(&path, io::Error::other(e.to_string()))
        })?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
        }
    }
    Ok(())
}
