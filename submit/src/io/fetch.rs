//! Attachment download with a hard byte ceiling.
//!
//! The [`Fetcher`] trait decouples the pipeline from HTTP. Tests use a static
//! fetcher that serves bytes from memory.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Attachment;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("attachment exceeds the {limit} byte ceiling")]
    TooLarge { limit: u64 },
    #[error("downloaded {actual} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("download timed out")]
    TimedOut,
    #[error("download failed: {0}")]
    Network(String),
    #[error("write download to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An in-flight response body.
pub struct FetchedBody {
    /// Length advertised by the server, if any.
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

pub trait Fetcher: Send + Sync {
    fn open(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchError>;
}

/// Blocking HTTP(S) fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    fn open(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(classify_reqwest_error)?;
        debug!(status = %response.status(), "attachment response");
        Ok(FetchedBody {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::TimedOut
    } else {
        FetchError::Network(err.to_string())
    }
}

/// Download `attachment` into `dest`, never writing more than `limit` bytes.
///
/// Rejects before any body byte is read when either the declared size or the
/// server-advertised length exceeds the ceiling.
#[instrument(skip_all, fields(declared = attachment.declared_size, limit, dest = %dest.display()))]
pub fn download_attachment(
    fetcher: &dyn Fetcher,
    attachment: &Attachment,
    dest: &Path,
    limit: u64,
    timeout: Duration,
) -> Result<u64, FetchError> {
    if attachment.declared_size > limit {
        warn!("declared size over ceiling");
        return Err(FetchError::TooLarge { limit });
    }

    let body = fetcher.open(&attachment.url, timeout)?;
    if body.content_length.is_some_and(|len| len > limit) {
        warn!(content_length = ?body.content_length, "advertised length over ceiling");
        return Err(FetchError::TooLarge { limit });
    }

    let io_err = |source: io::Error| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = File::create(dest).map_err(io_err)?;
    let mut bounded = body.reader.take(limit.saturating_add(1));
    let written = io::copy(&mut bounded, &mut file).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut => FetchError::TimedOut,
        _ => FetchError::Network(e.to_string()),
    })?;
    file.flush().map_err(io_err)?;

    if written > limit {
        warn!(written, "download over ceiling");
        return Err(FetchError::TooLarge { limit });
    }
    if written != attachment.declared_size {
        warn!(written, "download size does not match declared size");
        return Err(FetchError::SizeMismatch {
            declared: attachment.declared_size,
            actual: written,
        });
    }

    info!(bytes = written, "attachment downloaded");
    Ok(written)
}
