//! Adapter for the external theme validator.
//!
//! The validator runs inside a disposable clone of the registry whose `themes/`
//! directory holds exactly one entry pointing at the extracted bundle. A clean
//! exit means the bundle was accepted and its metadata file normalized.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::naming::REGISTRY_ROOT;
use crate::core::types::{RegistryEntry, ThemeMetadata};
use crate::io::process::{CommandSpec, ProcessRunner};

/// Entry file written into the fixture's `themes/` directory.
pub const FIXTURE_ENTRY_FILE: &str = "submission.json";

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("validator could not be run: {0}")]
    Unavailable(String),
    #[error("validator rejected the theme: {0}")]
    Rejected(String),
    #[error("validator output violated its contract: {0}")]
    Contract(String),
    #[error("fixture i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replace the fixture's `themes/` directory with a single entry for the bundle.
#[instrument(skip_all, fields(fixture = %fixture_dir.display()))]
pub fn write_fixture_entry(
    fixture_dir: &Path,
    extract_dir: &Path,
    preview_image: &str,
) -> Result<PathBuf, ValidatorError> {
    let io_err = |path: &Path, source: io::Error| ValidatorError::Io {
        path: path.to_path_buf(),
        source,
    };
    let themes_dir = fixture_dir.join(REGISTRY_ROOT);
    if themes_dir.exists() {
        fs::remove_dir_all(&themes_dir).map_err(|e| io_err(&themes_dir, e))?;
    }
    fs::create_dir_all(&themes_dir).map_err(|e| io_err(&themes_dir, e))?;

    let entry = RegistryEntry {
        repo_url: extract_dir.to_string_lossy().into_owned(),
        repo_subpath: String::new(),
        repo_commit: String::new(),
        preview_image_path: preview_image.to_string(),
    };
    let entry_path = themes_dir.join(FIXTURE_ENTRY_FILE);
    let mut payload = serde_json::to_string_pretty(&entry)
        .map_err(|e| ValidatorError::Contract(e.to_string()))?;
    payload.push('\n');
    fs::write(&entry_path, payload).map_err(|e| io_err(&entry_path, e))?;
    debug!(entry = %entry_path.display(), "fixture entry written");
    Ok(entry_path)
}

/// Run the validator command in `fixture_dir` and classify its exit.
#[instrument(skip_all, fields(fixture = %fixture_dir.display(), timeout_secs = timeout.as_secs()))]
pub fn run_validator(
    runner: &dyn ProcessRunner,
    command: &[String],
    fixture_dir: &Path,
    timeout: Duration,
) -> Result<(), ValidatorError> {
    let (program, fixed_args) = command
        .split_first()
        .ok_or_else(|| ValidatorError::Unavailable("validator command is empty".to_string()))?;
    let spec = CommandSpec::new(program.as_str(), fixture_dir, timeout)
        .args(fixed_args.iter().cloned());

    let output = runner.execute(&spec).map_err(|e| {
        error!(err = %e, "validator failed to start");
        ValidatorError::Unavailable(e.to_string())
    })?;
    if output.timed_out {
        warn!("validator timed out");
        return Err(ValidatorError::Unavailable("validator timed out".to_string()));
    }
    if output.success() {
        info!("validator accepted theme");
        return Ok(());
    }

    let diagnostic = output
        .last_stderr_line()
        .or_else(|| output.last_stdout_line())
        .map(str::to_string)
        .unwrap_or_else(|| match output.exit_code {
            Some(code) => format!("validator exited with code {code}"),
            None => "validator was terminated".to_string(),
        });
    info!(exit_code = ?output.exit_code, %diagnostic, "validator rejected theme");
    Err(ValidatorError::Rejected(diagnostic))
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    name: Option<String>,
    author: Option<String>,
}

/// Read the validator-normalized metadata file from the bundle root.
pub fn read_metadata(extract_dir: &Path, metadata_file: &str) -> Result<ThemeMetadata, ValidatorError> {
    let path = extract_dir.join(metadata_file);
    let raw = fs::read_to_string(&path)
        .map_err(|e| ValidatorError::Contract(format!("read {}: {e}", path.display())))?;
    let parsed: RawMetadata = serde_json::from_str(&raw)
        .map_err(|e| ValidatorError::Contract(format!("parse {}: {e}", path.display())))?;

    let field = |value: Option<String>, key: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ValidatorError::Contract(format!("{metadata_file} has no {key}")))
    };
    Ok(ThemeMetadata {
        name: field(parsed.name, "name")?,
        author: field(parsed.author, "author")?,
    })
}

/// Full validation step: fixture entry, validator run, metadata read-back.
pub fn validate_bundle(
    runner: &dyn ProcessRunner,
    command: &[String],
    fixture_dir: &Path,
    extract_dir: &Path,
    preview_image: &str,
    metadata_file: &str,
    timeout: Duration,
) -> Result<ThemeMetadata, ValidatorError> {
    write_fixture_entry(fixture_dir, extract_dir, preview_image)?;
    run_validator(runner, command, fixture_dir, timeout)?;
    read_metadata(extract_dir, metadata_file)
}
