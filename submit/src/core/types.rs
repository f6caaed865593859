//! Shared deterministic types for submission core logic.
//!
//! These types define stable contracts between the pipeline stages. They do not
//! depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the theme bundles extra content, and whether users may turn it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BundleMode {
    /// No bundled content.
    None,
    /// Bundled content that users can toggle off.
    Toggleable,
    /// Bundled content that is always applied.
    Forced,
}

impl BundleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleMode::None => "none",
            BundleMode::Toggleable => "toggleable",
            BundleMode::Forced => "forced",
        }
    }
}

/// Whether and where the theme styles the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum KeyboardMode {
    /// The theme does not touch the keyboard.
    None,
    /// Only the default keyboard is themed.
    DefaultKeyboard,
    /// Every keyboard on the system is themed.
    SystemWide,
}

impl KeyboardMode {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyboardMode::None => "none",
            KeyboardMode::DefaultKeyboard => "default-keyboard",
            KeyboardMode::SystemWide => "system-wide",
        }
    }
}

/// Option flags declared by the submitter alongside the attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOptions {
    pub bundle_mode: BundleMode,
    pub keyboard_mode: KeyboardMode,
    pub targets_default_keyboard: bool,
    pub keyboard_toggleable: bool,
    pub checklist_acknowledged: bool,
}

/// Reference to the uploaded bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    /// Size in bytes as reported by the chat platform.
    pub declared_size: u64,
}

/// One submission as accepted into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub submitter_id: String,
    pub attachment: Attachment,
    pub options: SubmissionOptions,
}

/// Name and author read back from the validator-normalized metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeMetadata {
    pub name: String,
    pub author: String,
}

/// Record published into the metadata registry.
///
/// Field names are part of the external validator's wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub repo_url: String,
    pub repo_subpath: String,
    pub repo_commit: String,
    pub preview_image_path: String,
}

/// Pipeline stages, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Fetching,
    SizeChecked,
    Extracted,
    ExternallyValidated,
    ContentPublished,
    MetadataPublished,
    PullRequestEnsured,
    Published,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Validating => "validating",
            Stage::Fetching => "fetching",
            Stage::SizeChecked => "size_checked",
            Stage::Extracted => "extracted",
            Stage::ExternallyValidated => "externally_validated",
            Stage::ContentPublished => "content_published",
            Stage::MetadataPublished => "metadata_published",
            Stage::PullRequestEnsured => "pull_request_ensured",
            Stage::Published => "published",
        };
        f.write_str(label)
    }
}

/// Whether the pull request was opened by this submission or already existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PullRequestState {
    Created { url: String },
    Updated { url: String },
}

impl PullRequestState {
    pub fn url(&self) -> &str {
        match self {
            PullRequestState::Created { url } | PullRequestState::Updated { url } => url,
        }
    }
}

/// Details of a fully published submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub theme: ThemeMetadata,
    pub content_subpath: String,
    pub content_commit: String,
    pub branch: String,
    pub pull_request: PullRequestState,
}
