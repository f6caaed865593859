//! Submission service configuration (TOML).

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Upper bound for `max_bundle_bytes` (1 GiB).
pub const MAX_BUNDLE_BYTES_CAP: u64 = 1024 * 1024 * 1024;

/// Upper bound for `pipeline_timeout_secs` (one day).
pub const PIPELINE_TIMEOUT_CAP_SECS: u64 = 24 * 60 * 60;

/// Top-level configuration.
///
/// Missing fields default to values suitable for a single-host deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SubmitConfig {
    /// Parent directory for per-submission workspaces.
    pub workspace_dir: PathBuf,

    /// Ceiling for both the downloaded bundle and its total uncompressed size.
    pub max_bundle_bytes: u64,

    /// Wall-clock budget for one whole submission, in seconds.
    pub pipeline_timeout_secs: u64,

    /// Truncate captured stdout/stderr of child processes beyond this many bytes.
    pub process_output_limit_bytes: usize,

    /// File that must exist at the bundle root.
    pub preview_image: String,

    /// Canonical metadata file the validator normalizes at the bundle root.
    pub metadata_file: String,

    pub tools: ToolsConfig,
    pub validator: ValidatorConfig,
    pub content: ContentRepoConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub git: String,
    pub gh: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            gh: "gh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Program (and fixed leading arguments) that validates a registry fixture.
    pub command: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            command: vec!["theme-validator".to_string()],
        }
    }
}

/// Repository that receives theme files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContentRepoConfig {
    /// Local working copy.
    pub path: PathBuf,
    /// Remote the working copy publishes to.
    pub remote: String,
    /// Branch published themes land on.
    pub branch: String,
    /// Clone URL recorded in registry entries.
    pub remote_url: String,
    /// Browser URL used to link published content in pull requests.
    pub web_url: String,
}

impl Default for ContentRepoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repos/themes"),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            remote_url: "https://github.com/example/themes.git".to_string(),
            web_url: "https://github.com/example/themes".to_string(),
        }
    }
}

/// Fork of the upstream metadata registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Local working copy of the fork.
    pub path: PathBuf,
    /// Source for disposable validation fixtures.
    pub clone_url: String,
    pub upstream_remote: String,
    pub upstream_branch: String,
    /// Remote that submitter branches are force-pushed to.
    pub push_remote: String,
    /// `owner/name` of the upstream project pull requests are opened against.
    pub upstream_repo: String,
    /// Owner of the fork, used to qualify the pull request head.
    pub fork_owner: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repos/registry"),
            clone_url: "https://github.com/example/registry.git".to_string(),
            upstream_remote: "upstream".to_string(),
            upstream_branch: "main".to_string(),
            push_remote: "origin".to_string(),
            upstream_repo: "upstream-org/registry".to_string(),
            fork_owner: "example".to_string(),
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(".theme-submit/workspaces"),
            max_bundle_bytes: 4 * 1024 * 1024,
            pipeline_timeout_secs: 10 * 60,
            process_output_limit_bytes: 1_000_000,
            preview_image: "preview.png".to_string(),
            metadata_file: "theme.json".to_string(),
            tools: ToolsConfig::default(),
            validator: ValidatorConfig::default(),
            content: ContentRepoConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl SubmitConfig {
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_bundle_bytes == 0 || self.max_bundle_bytes > MAX_BUNDLE_BYTES_CAP {
            return Err(anyhow!(
                "max_bundle_bytes must be in 1..={MAX_BUNDLE_BYTES_CAP}"
            ));
        }
        if self.pipeline_timeout_secs == 0 || self.pipeline_timeout_secs > PIPELINE_TIMEOUT_CAP_SECS
        {
            return Err(anyhow!(
                "pipeline_timeout_secs must be in 1..={PIPELINE_TIMEOUT_CAP_SECS}"
            ));
        }
        if self.process_output_limit_bytes == 0 {
            return Err(anyhow!("process_output_limit_bytes must be > 0"));
        }
        for (key, value) in [
            ("preview_image", &self.preview_image),
            ("metadata_file", &self.metadata_file),
        ] {
            if !is_plain_file_name(value) {
                return Err(anyhow!("{key} must be a plain file name, got '{value}'"));
            }
        }
        if self.tools.git.trim().is_empty() || self.tools.gh.trim().is_empty() {
            return Err(anyhow!("tools.git and tools.gh must be non-empty"));
        }
        if self.validator.command.is_empty() || self.validator.command[0].trim().is_empty() {
            return Err(anyhow!("validator.command must be a non-empty array"));
        }
        let required = [
            ("content.remote", &self.content.remote),
            ("content.branch", &self.content.branch),
            ("content.remote_url", &self.content.remote_url),
            ("registry.clone_url", &self.registry.clone_url),
            ("registry.upstream_remote", &self.registry.upstream_remote),
            ("registry.upstream_branch", &self.registry.upstream_branch),
            ("registry.push_remote", &self.registry.push_remote),
            ("registry.upstream_repo", &self.registry.upstream_repo),
            ("registry.fork_owner", &self.registry.fork_owner),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow!("{key} must be non-empty"));
            }
        }
        if resolved(&self.content.path) == resolved(&self.registry.path) {
            return Err(anyhow!("content.path and registry.path must differ"));
        }
        Ok(())
    }
}

/// Canonical form of `path`, or the path without `.` components if it does not exist yet.
fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        path.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    })
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SubmitConfig::default()`.
pub fn load_config(path: &Path) -> Result<SubmitConfig> {
    if !path.exists() {
        let cfg = SubmitConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SubmitConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SubmitConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
