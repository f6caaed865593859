//! Repository client: a thin command-sequence wrapper over `git` and `gh`.
//!
//! Only the handful of operations the publish sequences need are exposed. Each
//! call is one child process run through [`ProcessRunner`] with the remaining
//! pipeline budget as its timeout.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::ToolsConfig;
use crate::io::deadline::Deadline;
use crate::io::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("`{command}` could not be launched")]
    Unavailable {
        command: String,
        #[source]
        source: ProcessError,
    },
    #[error("`{command}` timed out")]
    TimedOut { command: String },
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{command}` produced unexpected output: {detail}")]
    UnexpectedOutput { command: String, detail: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Parameters for opening a pull request from a fork branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft<'a> {
    /// `owner/name` of the repository the request is opened against.
    pub upstream_repo: &'a str,
    pub base: &'a str,
    /// `owner:branch` head reference.
    pub head: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestSummary {
    url: String,
}

/// Client bound to one local working copy.
pub struct RepoClient<'a> {
    runner: &'a dyn ProcessRunner,
    tools: &'a ToolsConfig,
    workdir: PathBuf,
    deadline: Deadline,
}

impl<'a> RepoClient<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        tools: &'a ToolsConfig,
        workdir: impl Into<PathBuf>,
        deadline: Deadline,
    ) -> Self {
        Self {
            runner,
            tools,
            workdir: workdir.into(),
            deadline,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into this client's working directory.
    #[instrument(skip_all, fields(url, dest = %self.workdir.display()))]
    pub fn clone_from(&self, url: &str) -> Result<(), RepoError> {
        let parent = self
            .workdir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dest = self.workdir.to_string_lossy().into_owned();
        self.git_in(&parent, &["clone", "--quiet", "--", url, &dest])?;
        Ok(())
    }

    /// Bring the checked-out branch to `remote/branch` exactly.
    ///
    /// Unlike `git pull`, local commits that never reached the remote are
    /// dropped instead of merged.
    pub fn pull(&self, remote: &str, branch: &str) -> Result<(), RepoError> {
        self.fetch(remote)?;
        self.hard_reset(&format!("{remote}/{branch}"))
    }

    pub fn fetch(&self, remote: &str) -> Result<(), RepoError> {
        self.git(&["fetch", "--quiet", remote])?;
        Ok(())
    }

    pub fn hard_reset(&self, reference: &str) -> Result<(), RepoError> {
        self.git(&["reset", "--hard", "--quiet", reference])?;
        Ok(())
    }

    /// Remove untracked files and directories.
    pub fn clean(&self) -> Result<(), RepoError> {
        self.git(&["clean", "-fdq"])?;
        Ok(())
    }

    /// Stage every change (additions, edits, deletions) under `path`.
    pub fn stage(&self, path: &str) -> Result<(), RepoError> {
        self.git(&["add", "-A", "--", path])?;
        Ok(())
    }

    pub fn commit(&self, message: &str) -> Result<(), RepoError> {
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Push the current branch, or `branch` to `remote` when given.
    #[instrument(skip_all, fields(force, target = ?target))]
    pub fn push(&self, force: bool, target: Option<(&str, &str)>) -> Result<(), RepoError> {
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force");
        }
        if let Some((remote, branch)) = target {
            args.push(remote);
            args.push(branch);
        }
        self.git(&args)?;
        Ok(())
    }

    pub fn checkout(&self, reference: &str) -> Result<(), RepoError> {
        self.git(&["checkout", "--quiet", reference])?;
        Ok(())
    }

    /// Create `name` at the current HEAD, or reset it there if it already exists, and check it out.
    pub fn create_branch(&self, name: &str) -> Result<(), RepoError> {
        self.git(&["checkout", "--quiet", "-B", name])?;
        Ok(())
    }

    /// Number of paths recorded for the next commit.
    pub fn staged_file_count(&self) -> Result<usize, RepoError> {
        let out = self.git(&["diff", "--cached", "--name-only"])?;
        Ok(out.stdout.iter().filter(|line| !line.trim().is_empty()).count())
    }

    pub fn latest_commit_hash(&self) -> Result<String, RepoError> {
        let args = ["rev-parse", "HEAD"];
        let out = self.git(&args)?;
        let hash = out.last_stdout_line().unwrap_or_default().to_string();
        if !is_commit_hash(&hash) {
            return Err(RepoError::UnexpectedOutput {
                command: self.label(&self.tools.git, &args),
                detail: format!("not a commit hash: '{hash}'"),
            });
        }
        Ok(hash)
    }

    /// URL of the open pull request whose head is `branch`, if any.
    #[instrument(skip_all, fields(upstream_repo, branch))]
    pub fn open_pull_request(
        &self,
        upstream_repo: &str,
        branch: &str,
    ) -> Result<Option<String>, RepoError> {
        let args = [
            "pr", "list", "--repo", upstream_repo, "--head", branch, "--state", "open", "--json",
            "url",
        ];
        let out = self.run(&self.tools.gh, &self.workdir, &args)?;
        let raw = out.stdout.join("\n");
        let raw = if raw.trim().is_empty() { "[]" } else { raw.as_str() };
        let prs: Vec<PullRequestSummary> =
            serde_json::from_str(raw).map_err(|e| RepoError::UnexpectedOutput {
                command: self.label(&self.tools.gh, &args),
                detail: e.to_string(),
            })?;
        debug!(open = prs.len(), "pull request lookup");
        Ok(prs.into_iter().next().map(|pr| pr.url))
    }

    pub fn pull_request_exists(&self, upstream_repo: &str, branch: &str) -> Result<bool, RepoError> {
        Ok(self.open_pull_request(upstream_repo, branch)?.is_some())
    }

    /// Open a pull request and return its URL.
    #[instrument(skip_all, fields(upstream_repo = draft.upstream_repo, head = draft.head))]
    pub fn pull_request_create(&self, draft: &PullRequestDraft<'_>) -> Result<String, RepoError> {
        let args = [
            "pr",
            "create",
            "--repo",
            draft.upstream_repo,
            "--base",
            draft.base,
            "--head",
            draft.head,
            "--title",
            draft.title,
            "--body",
            draft.body,
        ];
        let out = self.run(&self.tools.gh, &self.workdir, &args)?;
        match out.last_stdout_line() {
            Some(url) if url.starts_with("http") => Ok(url.to_string()),
            other => Err(RepoError::UnexpectedOutput {
                command: self.label(&self.tools.gh, &["pr", "create"]),
                detail: format!("expected a pull request URL, got {other:?}"),
            }),
        }
    }

    fn git(&self, args: &[&str]) -> Result<ProcessOutput, RepoError> {
        self.run(&self.tools.git, &self.workdir, args)
    }

    fn git_in(&self, dir: &Path, args: &[&str]) -> Result<ProcessOutput, RepoError> {
        self.run(&self.tools.git, dir, args)
    }

    fn run(&self, program: &str, dir: &Path, args: &[&str]) -> Result<ProcessOutput, RepoError> {
        let command = self.label(program, args);
        let timeout = self.deadline.remaining().ok_or_else(|| {
            warn!(%command, "pipeline budget exhausted before command");
            RepoError::TimedOut {
                command: command.clone(),
            }
        })?;
        let spec = CommandSpec::new(program, dir, timeout).args(args.iter().copied());
        let output = self
            .runner
            .execute(&spec)
            .map_err(|source| RepoError::Unavailable {
                command: command.clone(),
                source,
            })?;
        if output.timed_out {
            return Err(RepoError::TimedOut { command });
        }
        if output.exit_code != Some(0) {
            let stderr = output.last_stderr_line().unwrap_or_default().to_string();
            warn!(%command, code = ?output.exit_code, %stderr, "command failed");
            return Err(RepoError::CommandFailed {
                command,
                code: output.exit_code,
                stderr,
            });
        }
        debug!(%command, "command ok");
        Ok(output)
    }

    fn label(&self, program: &str, args: &[&str]) -> String {
        // Titles and bodies are long; keep log lines to the subcommand.
        let shown: Vec<&str> = args.iter().take(3).copied().collect();
        format!("{program} {}", shown.join(" "))
    }
}

fn is_commit_hash(value: &str) -> bool {
    matches!(value.len(), 40 | 64) && value.chars().all(|ch| ch.is_ascii_hexdigit())
}
