//! Theme submission command line.
//!
//! Stands in for the chat command: takes an attachment reference and the
//! declared options, runs the pipeline and prints the submitter response.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use theme_submit::core::policy::check_options;
use theme_submit::core::types::{
    Attachment, BundleMode, KeyboardMode, SubmissionOptions, SubmissionRequest,
};
use theme_submit::exit_codes;
use theme_submit::io::config::{SubmitConfig, load_config, write_config};
use theme_submit::io::fetch::HttpFetcher;
use theme_submit::io::process::SystemRunner;
use theme_submit::logging;
use theme_submit::pipeline::Submitter;

const DEFAULT_CONFIG_PATH: &str = "theme-submit.toml";

#[derive(Parser)]
#[command(
    name = "theme-submit",
    version,
    about = "Validate and publish community theme submissions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for one uploaded bundle.
    Submit {
        /// Service configuration (defaults apply when the file is missing).
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Submitter identity; becomes the registry branch name.
        #[arg(long)]
        submitter: String,
        /// Attachment download URL.
        #[arg(long)]
        url: String,
        /// Attachment size in bytes as reported by the platform.
        #[arg(long)]
        size: u64,
        #[command(flatten)]
        options: OptionArgs,
        /// Print a JSON report instead of the plain response.
        #[arg(long)]
        json: bool,
    },
    /// Check the declared options without downloading anything.
    CheckOptions {
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Write the default configuration file.
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
struct OptionArgs {
    #[arg(long, value_enum, default_value_t = BundleMode::None)]
    bundle_mode: BundleMode,
    #[arg(long, value_enum, default_value_t = KeyboardMode::None)]
    keyboard_mode: KeyboardMode,
    /// The keyboard theme targets the default keyboard.
    #[arg(long)]
    default_keyboard: bool,
    /// Users can turn the keyboard theme off.
    #[arg(long)]
    keyboard_toggleable: bool,
    /// Confirm the theme follows the submission checklist.
    #[arg(long)]
    checklist: bool,
}

impl OptionArgs {
    fn to_options(&self) -> SubmissionOptions {
        SubmissionOptions {
            bundle_mode: self.bundle_mode,
            keyboard_mode: self.keyboard_mode,
            targets_default_keyboard: self.default_keyboard,
            keyboard_toggleable: self.keyboard_toggleable,
            checklist_acknowledged: self.checklist,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Submit {
            config,
            submitter,
            url,
            size,
            options,
            json,
        } => {
            let request = SubmissionRequest {
                submitter_id: submitter,
                attachment: Attachment {
                    url,
                    declared_size: size,
                },
                options: options.to_options(),
            };
            cmd_submit(&config, &request, json)
        }
        Command::CheckOptions { options } => Ok(cmd_check_options(&options.to_options())),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_submit(config_path: &Path, request: &SubmissionRequest, json: bool) -> Result<i32> {
    let cfg = load_config(config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let runner = Arc::new(SystemRunner::new(cfg.process_output_limit_bytes));
    let submitter = Submitter::new(cfg, runner, Arc::new(HttpFetcher));

    let outcome = submitter.submit(request);
    if json {
        let report = serde_json::to_string_pretty(&outcome.report()).context("serialize report")?;
        println!("{report}");
    } else {
        println!("{}", outcome.response());
    }
    Ok(outcome.exit_code())
}

fn cmd_check_options(options: &SubmissionOptions) -> i32 {
    let violations = check_options(options);
    if violations.is_empty() {
        println!("ok");
        return exit_codes::OK;
    }
    for violation in violations {
        println!("{violation}");
    }
    exit_codes::REJECTED
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SubmitConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}
