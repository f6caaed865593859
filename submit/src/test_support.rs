//! Test-only fakes and fixture builders.
//!
//! [`ScriptedRunner`] stands in for every external program; [`StaticFetcher`]
//! serves an attachment from memory.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use crate::io::config::SubmitConfig;
use crate::io::fetch::{FetchError, FetchedBody, Fetcher};
use crate::io::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};

/// A deterministic 40-character commit id.
pub const COMMIT_HASH: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Successful exit with no output.
pub fn ok() -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        ..ProcessOutput::default()
    }
}

/// Successful exit with the given stdout lines.
pub fn stdout(lines: &[&str]) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        stdout: lines.iter().map(|l| l.to_string()).collect(),
        ..ProcessOutput::default()
    }
}

/// Failed exit with the given stderr lines.
pub fn exited(code: i32, stderr: &[&str]) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        stderr: stderr.iter().map(|l| l.to_string()).collect(),
        ..ProcessOutput::default()
    }
}

/// Child killed after exceeding its timeout.
pub fn timed_out() -> ProcessOutput {
    ProcessOutput {
        exit_code: None,
        timed_out: true,
        ..ProcessOutput::default()
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(ProcessOutput),
    SpawnFailure,
}

#[derive(Debug, Clone)]
struct Rule {
    program: String,
    args_prefix: Vec<String>,
    reply: Reply,
    /// Remaining uses; `None` means unlimited.
    remaining: Option<usize>,
    delay: Option<Duration>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.program == self.program
            && spec.args.len() >= self.args_prefix.len()
            && spec
                .args
                .iter()
                .zip(&self.args_prefix)
                .all(|(arg, prefix)| arg == prefix)
            && self.remaining != Some(0)
    }
}

/// Process runner that answers from a script and records every call.
///
/// Rules are matched in insertion order on program name plus an argument
/// prefix. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(self, rule: Rule) -> Self {
        self.rules.lock().expect("rules lock").push(rule);
        self
    }

    /// Answer every matching call with `output`.
    pub fn on(self, program: &str, args_prefix: &[&str], output: ProcessOutput) -> Self {
        self.push_rule(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|a| a.to_string()).collect(),
            reply: Reply::Output(output),
            remaining: None,
            delay: None,
        })
    }

    /// Answer only the next `times` matching calls with `output`.
    pub fn on_times(
        self,
        program: &str,
        args_prefix: &[&str],
        times: usize,
        output: ProcessOutput,
    ) -> Self {
        self.push_rule(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|a| a.to_string()).collect(),
            reply: Reply::Output(output),
            remaining: Some(times),
            delay: None,
        })
    }

    /// Succeed on matching calls, but only after sleeping for `delay`.
    pub fn slow(self, program: &str, args_prefix: &[&str], delay: Duration) -> Self {
        self.push_rule(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|a| a.to_string()).collect(),
            reply: Reply::Output(ok()),
            remaining: None,
            delay: Some(delay),
        })
    }

    /// Fail to launch matching programs.
    pub fn fail_spawn(self, program: &str, args_prefix: &[&str]) -> Self {
        self.push_rule(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|a| a.to_string()).collect(),
            reply: Reply::SpawnFailure,
            remaining: None,
            delay: None,
        })
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of calls to `program` whose arguments start with `args_prefix`.
    pub fn count(&self, program: &str, args_prefix: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                c.program == program
                    && c.args.len() >= args_prefix.len()
                    && c.args.iter().zip(args_prefix).all(|(a, p)| a == p)
            })
            .count()
    }

    /// Calls whose working directory is `dir`.
    pub fn calls_in(&self, dir: &Path) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.workdir == dir)
            .collect()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().expect("calls lock").push(spec.clone());

        let (reply, delay) = {
            let mut rules = self.rules.lock().expect("rules lock");
            match rules.iter_mut().find(|rule| rule.matches(spec)) {
                Some(rule) => {
                    if let Some(left) = rule.remaining.as_mut() {
                        *left -= 1;
                    }
                    (rule.reply.clone(), rule.delay)
                }
                None => (Reply::Output(ok()), None),
            }
        };

        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match reply {
            Reply::Output(output) => Ok(output),
            Reply::SpawnFailure => Err(ProcessError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
        }
    }
}

/// Fetcher that serves the same bytes for every URL.
#[derive(Debug)]
pub struct StaticFetcher {
    body: Vec<u8>,
    advertise_length: bool,
    failure: Option<String>,
    opened: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            advertise_length: true,
            failure: None,
            opened: AtomicUsize::new(0),
        }
    }

    /// Fetcher whose every request fails with a network error.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    /// Omit the content length, as chunked responses do.
    pub fn without_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }

    /// Number of times a download was started.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Fetcher for StaticFetcher {
    fn open(&self, _url: &str, _timeout: Duration) -> Result<FetchedBody, FetchError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(FetchError::Network(message.clone()));
        }
        Ok(FetchedBody {
            content_length: self.advertise_length.then_some(self.body.len() as u64),
            reader: Box::new(Cursor::new(self.body.clone())),
        })
    }
}

/// Build a deflate-compressed zip archive in memory.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Write a deflate-compressed zip archive to `path`.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> zip::result::ZipResult<()> {
    let bytes = zip_bytes(entries)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// A bundle that passes every offline check.
pub fn valid_bundle(name: &str, author: &str) -> Vec<u8> {
    let metadata = format!(r#"{{"name":"{name}","author":"{author}"}}"#);
    zip_bytes(&[
        ("preview.png", b"\x89PNG fake preview"),
        ("theme.json", metadata.as_bytes()),
        ("css/theme.css", b"body { background: #000; }"),
    ])
    .expect("build bundle")
}

/// Temporary deployment: a config whose workspace and repository paths all
/// live under one temp dir. The repository directories exist but are empty.
pub struct TestEnv {
    pub temp: TempDir,
    pub config: SubmitConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = SubmitConfig::default();
        config.workspace_dir = temp.path().join("workspaces");
        config.content.path = temp.path().join("repos/themes");
        config.registry.path = temp.path().join("repos/registry");
        std::fs::create_dir_all(&config.workspace_dir).expect("workspace dir");
        std::fs::create_dir_all(&config.content.path).expect("content dir");
        std::fs::create_dir_all(&config.registry.path).expect("registry dir");
        Self { temp, config }
    }

    /// Workspaces still present on disk.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(&self.config.workspace_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
