//! Orchestration for a single theme submission.
//!
//! A submission moves through the stages in [`Stage`] order and stops at the
//! first failure. Every run owns a fresh [`Workspace`] that is deleted on every
//! exit path. Mutations of the shared content and registry checkouts happen
//! only while holding that checkout's gate in [`RepoLocks`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::core::message::{format_ceiling_mb, suppress_mentions};
use crate::core::naming::{entry_path, is_reserved_branch, is_valid_submitter_id};
use crate::core::policy::{PolicyViolation, first_violation};
use crate::core::types::{
    PullRequestState, Published, RegistryEntry, Stage, SubmissionOptions, SubmissionRequest,
};
use crate::exit_codes;
use crate::io::archive::{ArchiveError, extract_archive, has_root_file, scan_archive};
use crate::io::config::{RegistryConfig, SubmitConfig};
use crate::io::deadline::Deadline;
use crate::io::fetch::{FetchError, Fetcher, download_attachment};
use crate::io::locks::{LockTimeout, RepoLocks};
use crate::io::process::ProcessRunner;
use crate::io::repo::{RepoClient, RepoError};
use crate::io::templates::{PullRequestContext, PullRequestTemplates};
use crate::io::validator::{ValidatorError, validate_bundle};
use crate::io::workspace::Workspace;
use crate::publish::{
    ContentOutcome, PublishError, ensure_pull_request, publish_content, publish_metadata,
};

const OPAQUE_FAILURE: &str = "Something went wrong while publishing your theme.";
const NO_CHANGES: &str = "No changes detected. Your theme is already up to date.";

/// Why a submission was rejected.
///
/// `Display` carries operator detail for logs; [`SubmissionError::user_message`]
/// is what the submitter sees.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("policy violation: {0}")]
    PolicyViolation(PolicyViolation),
    #[error("invalid submitter id '{0}'")]
    InvalidSubmitter(String),
    #[error("input too large: {detail}")]
    InputTooLarge { limit: u64, detail: String },
    #[error("malformed archive: {0}")]
    MalformedArchive(String),
    #[error("missing required asset '{0}'")]
    MissingRequiredAsset(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("validator contract violated: {0}")]
    InternalContractViolation(String),
    #[error("repository command failed: {0}")]
    Repository(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmissionError {
    pub fn user_message(&self) -> String {
        match self {
            SubmissionError::PolicyViolation(violation) => violation.message().to_string(),
            SubmissionError::InvalidSubmitter(_) => "Invalid submitter id.".to_string(),
            SubmissionError::InputTooLarge { limit, .. } => format!(
                "Theme is too big. Themes can be max {}",
                format_ceiling_mb(*limit)
            ),
            SubmissionError::MalformedArchive(_) => "Theme must be a valid zip archive.".to_string(),
            SubmissionError::MissingRequiredAsset(name) => {
                format!("Theme is missing the required preview image `{name}`.")
            }
            SubmissionError::NetworkError(_) => {
                "Failed to download the theme. Please try again.".to_string()
            }
            SubmissionError::ToolUnavailable(_) => {
                "A required tool failed to run. Please try again later.".to_string()
            }
            SubmissionError::ValidationFailed(diag) => {
                format!("Theme failed validation: {}", suppress_mentions(diag))
            }
            SubmissionError::InternalContractViolation(_)
            | SubmissionError::Repository(_)
            | SubmissionError::Internal(_) => OPAQUE_FAILURE.to_string(),
        }
    }

    /// Failures caused by the service rather than the submission.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SubmissionError::ToolUnavailable(_)
                | SubmissionError::InternalContractViolation(_)
                | SubmissionError::Repository(_)
                | SubmissionError::Internal(_)
        )
    }
}

impl From<ArchiveError> for SubmissionError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Malformed(_) => SubmissionError::MalformedArchive(err.to_string()),
            ArchiveError::TooLarge { limit } => SubmissionError::InputTooLarge {
                limit,
                detail: err.to_string(),
            },
            ArchiveError::Io { .. } => SubmissionError::Internal(err.to_string()),
        }
    }
}

impl From<ValidatorError> for SubmissionError {
    fn from(err: ValidatorError) -> Self {
        match err {
            ValidatorError::Unavailable(_) => SubmissionError::ToolUnavailable(err.to_string()),
            ValidatorError::Rejected(diag) => SubmissionError::ValidationFailed(diag),
            ValidatorError::Contract(_) => {
                SubmissionError::InternalContractViolation(err.to_string())
            }
            ValidatorError::Io { .. } => SubmissionError::Internal(err.to_string()),
        }
    }
}

impl From<LockTimeout> for SubmissionError {
    fn from(err: LockTimeout) -> Self {
        SubmissionError::ToolUnavailable(err.to_string())
    }
}

impl From<RepoError> for SubmissionError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Unavailable { .. } | RepoError::TimedOut { .. } => {
                SubmissionError::ToolUnavailable(err.to_string())
            }
            RepoError::CommandFailed { .. } | RepoError::UnexpectedOutput { .. } => {
                SubmissionError::Repository(err.to_string())
            }
        }
    }
}

impl From<PublishError> for SubmissionError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Repo(repo) => repo.into(),
            other => SubmissionError::Internal(other.to_string()),
        }
    }
}

/// Terminal result of one submission.
#[derive(Debug)]
pub enum Outcome {
    Published(Published),
    /// The bundle matches what is already published under `subpath`.
    NoChanges { subpath: String },
    /// `stage` is the last stage the submission entered.
    Rejected { stage: Stage, error: SubmissionError },
}

impl Outcome {
    /// Response sent back to the submitter.
    pub fn response(&self) -> String {
        match self {
            Outcome::Published(published) => match &published.pull_request {
                PullRequestState::Created { url } => {
                    format!("Your theme has been submitted for review: {url}")
                }
                PullRequestState::Updated { url } => {
                    format!("Your theme submission has been updated: {url}")
                }
            },
            Outcome::NoChanges { .. } => NO_CHANGES.to_string(),
            Outcome::Rejected { error, .. } => error.user_message(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Published(_) => exit_codes::OK,
            Outcome::NoChanges { .. } => exit_codes::NO_CHANGES,
            Outcome::Rejected { error, .. } if error.is_internal() => exit_codes::INVALID,
            Outcome::Rejected { .. } => exit_codes::REJECTED,
        }
    }

    pub fn report(&self) -> SubmissionReport {
        let (outcome, stage, published) = match self {
            Outcome::Published(published) => ("published", Stage::Published, Some(published.clone())),
            Outcome::NoChanges { .. } => ("no_changes", Stage::ExternallyValidated, None),
            Outcome::Rejected { stage, .. } => ("rejected", *stage, None),
        };
        SubmissionReport {
            outcome,
            stage,
            message: self.response(),
            published,
        }
    }
}

/// Machine-readable summary printed by `theme-submit submit --json`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub outcome: &'static str,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<Published>,
}

/// Pre-pipeline checks. No network, disk or repository access.
///
/// Ids that name a registry branch or remote are refused, since the submitter
/// branch is force-pushed.
pub fn check_request(
    submitter_id: &str,
    options: &SubmissionOptions,
    registry: &RegistryConfig,
) -> Result<(), SubmissionError> {
    let reserved = [
        registry.upstream_branch.as_str(),
        registry.upstream_remote.as_str(),
        registry.push_remote.as_str(),
    ];
    if !is_valid_submitter_id(submitter_id) || is_reserved_branch(submitter_id, &reserved) {
        return Err(SubmissionError::InvalidSubmitter(submitter_id.to_string()));
    }
    if let Some(violation) = first_violation(options) {
        return Err(SubmissionError::PolicyViolation(violation));
    }
    Ok(())
}

/// Runs submissions against one deployment.
///
/// Safe to share across threads; concurrent submissions serialize only on the
/// repository gates.
pub struct Submitter {
    config: SubmitConfig,
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn Fetcher>,
    locks: Arc<RepoLocks>,
    templates: PullRequestTemplates,
}

impl Submitter {
    pub fn new(
        config: SubmitConfig,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            runner,
            fetcher,
            locks: Arc::new(RepoLocks::new()),
            templates: PullRequestTemplates::new(),
        }
    }

    /// Share repository gates with other submitters on the same host.
    pub fn with_locks(mut self, locks: Arc<RepoLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Run one submission to completion.
    #[instrument(skip_all, fields(submitter_id = %request.submitter_id))]
    pub fn submit(&self, request: &SubmissionRequest) -> Outcome {
        let mut stage = Stage::Validating;
        match self.run(request, &mut stage) {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Published(published) => info!(
                        branch = %published.branch,
                        pull_request = %published.pull_request.url(),
                        "submission published"
                    ),
                    Outcome::NoChanges { subpath } => info!(%subpath, "submission unchanged"),
                    Outcome::Rejected { .. } => {}
                }
                outcome
            }
            Err(error) => {
                if error.is_internal() {
                    error!(%stage, err = %error, "submission failed");
                } else {
                    warn!(%stage, err = %error, "submission rejected");
                }
                Outcome::Rejected { stage, error }
            }
        }
    }

    fn run(
        &self,
        request: &SubmissionRequest,
        stage: &mut Stage,
    ) -> Result<Outcome, SubmissionError> {
        let cfg = &self.config;
        let limit = cfg.max_bundle_bytes;
        let submitter_id = request.submitter_id.as_str();

        check_request(submitter_id, &request.options, &cfg.registry)?;
        if request.attachment.declared_size > limit {
            return Err(SubmissionError::InputTooLarge {
                limit,
                detail: format!(
                    "declared size {} exceeds {limit}",
                    request.attachment.declared_size
                ),
            });
        }

        let deadline = Deadline::after(cfg.pipeline_timeout());
        advance(stage, Stage::Fetching);
        let workspace = Workspace::create(&cfg.workspace_dir, submitter_id)
            .map_err(|e| SubmissionError::Internal(format!("{e:#}")))?;

        let bundle = workspace.bundle_path();
        let timeout = deadline.remaining().ok_or_else(|| {
            SubmissionError::NetworkError("pipeline deadline passed before download".to_string())
        })?;
        let downloaded =
            download_attachment(&*self.fetcher, &request.attachment, &bundle, limit, timeout)
                .map_err(|e| fetch_error(e, limit))?;
        let summary = scan_archive(&bundle, limit)?;
        info!(
            downloaded,
            entries = summary.entries,
            uncompressed = summary.uncompressed_bytes,
            "bundle within limits"
        );
        advance(stage, Stage::SizeChecked);

        let extract_dir = workspace.extract_dir();
        extract_archive(&bundle, &extract_dir, limit)?;
        if !has_root_file(&extract_dir, &cfg.preview_image) {
            return Err(SubmissionError::MissingRequiredAsset(
                cfg.preview_image.clone(),
            ));
        }
        advance(stage, Stage::Extracted);

        let fixture = RepoClient::new(
            &*self.runner,
            &cfg.tools,
            workspace.fixture_dir(),
            deadline,
        );
        fixture.clone_from(&cfg.registry.clone_url)?;
        let timeout = deadline.remaining().ok_or_else(|| {
            SubmissionError::ToolUnavailable("pipeline deadline passed before validation".to_string())
        })?;
        let theme = validate_bundle(
            &*self.runner,
            &cfg.validator.command,
            fixture.workdir(),
            &extract_dir,
            &cfg.preview_image,
            &cfg.metadata_file,
            timeout,
        )?;
        info!(theme = %theme.name, author = %theme.author, "bundle accepted by validator");
        advance(stage, Stage::ExternallyValidated);

        let content = RepoClient::new(&*self.runner, &cfg.tools, &cfg.content.path, deadline);
        let published = self.locks.with_lock(&cfg.content.path, deadline, || {
            publish_content(&content, &cfg.content, &extract_dir, submitter_id, &theme)
        })??;
        let (subpath, commit) = match published {
            ContentOutcome::NoChanges { subpath } => return Ok(Outcome::NoChanges { subpath }),
            ContentOutcome::Published { subpath, commit } => (subpath, commit),
        };
        advance(stage, Stage::ContentPublished);

        let entry = RegistryEntry {
            repo_url: cfg.content.remote_url.clone(),
            repo_subpath: subpath.clone(),
            repo_commit: commit.clone(),
            preview_image_path: format!("{subpath}/{}", cfg.preview_image),
        };
        let text = self
            .templates
            .render(&PullRequestContext {
                submitter_id,
                theme: &theme,
                options: &request.options,
                content_subpath: &subpath,
                content_web_url: &cfg.content.web_url,
                commit: &commit,
            })
            .map_err(|e| SubmissionError::Internal(format!("render pull request: {e:#}")))?;

        let registry = RepoClient::new(&*self.runner, &cfg.tools, &cfg.registry.path, deadline);
        let (branch, pull_request) = self.locks.with_lock(&cfg.registry.path, deadline, || {
            let branch = publish_metadata(
                &registry,
                &cfg.registry,
                submitter_id,
                &entry_path(&theme.author, &theme.name),
                &entry,
                &theme,
            )?;
            advance(stage, Stage::MetadataPublished);
            let pull_request = ensure_pull_request(&registry, &cfg.registry, &branch, &text)?;
            Ok::<_, PublishError>((branch, pull_request))
        })??;
        advance(stage, Stage::PullRequestEnsured);

        workspace.release();
        advance(stage, Stage::Published);
        Ok(Outcome::Published(Published {
            theme,
            content_subpath: subpath,
            content_commit: commit,
            branch,
            pull_request,
        }))
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    info!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

/// A body that disagrees with the declared size is treated like an oversized one.
fn fetch_error(err: FetchError, limit: u64) -> SubmissionError {
    match err {
        FetchError::TooLarge { .. } | FetchError::SizeMismatch { .. } => {
            SubmissionError::InputTooLarge {
                limit,
                detail: err.to_string(),
            }
        }
        FetchError::TimedOut | FetchError::Network(_) => {
            SubmissionError::NetworkError(err.to_string())
        }
        FetchError::Io { .. } => SubmissionError::Internal(err.to_string()),
    }
}
