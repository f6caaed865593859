//! End-to-end pipeline runs against scripted tools.
//!
//! Every external program goes through a `ScriptedRunner` and the attachment is
//! served from memory, so these tests cover stage ordering, rejection mapping,
//! idempotency and workspace cleanup without git, gh or a network.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use theme_submit::core::types::{
    Attachment, BundleMode, KeyboardMode, PullRequestState, Stage, SubmissionOptions,
    SubmissionRequest,
};
use theme_submit::exit_codes;
use theme_submit::io::locks::RepoLocks;
use theme_submit::io::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use theme_submit::pipeline::{Outcome, SubmissionError, Submitter};
use theme_submit::test_support::{
    COMMIT_HASH, ScriptedRunner, StaticFetcher, TestEnv, exited, stdout, timed_out, valid_bundle,
    zip_bytes,
};

const PR_URL: &str = "https://github.com/upstream-org/registry/pull/7";
const MIB: u64 = 1024 * 1024;

/// Commands one content publish runs in the content working copy.
const CONTENT_PASS: [&str; 10] = [
    "git reset",
    "git clean",
    "git checkout",
    "git fetch",
    "git reset",
    "git add",
    "git diff",
    "git commit",
    "git push",
    "git rev-parse",
];

fn options() -> SubmissionOptions {
    SubmissionOptions {
        bundle_mode: BundleMode::Toggleable,
        keyboard_mode: KeyboardMode::DefaultKeyboard,
        targets_default_keyboard: true,
        keyboard_toggleable: false,
        checklist_acknowledged: true,
    }
}

fn request(submitter_id: &str, declared_size: u64) -> SubmissionRequest {
    SubmissionRequest {
        submitter_id: submitter_id.to_string(),
        attachment: Attachment {
            url: "https://cdn.example/attachments/bundle.zip".to_string(),
            declared_size,
        },
        options: options(),
    }
}

/// Tools that accept everything: 3 staged files, no open pull request.
fn publishing_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .on("git", &["diff", "--cached"], stdout(&["a", "b", "c"]))
        .on("git", &["rev-parse"], stdout(&[COMMIT_HASH]))
        .on("gh", &["pr", "list"], stdout(&["[]"]))
        .on("gh", &["pr", "create"], stdout(&[PR_URL]))
}

fn submitter(env: &TestEnv, runner: &Arc<ScriptedRunner>, fetcher: &Arc<StaticFetcher>) -> Submitter {
    Submitter::new(env.config.clone(), runner.clone(), fetcher.clone())
}

fn rejection(outcome: &Outcome) -> (&Stage, &SubmissionError) {
    match outcome {
        Outcome::Rejected { stage, error } => (stage, error),
        other => panic!("expected rejection, got {other:?}"),
    }
}

/// `program subcommand` labels for every call made in `dir`.
fn labels_in(runner: &ScriptedRunner, dir: &std::path::Path) -> Vec<String> {
    runner
        .calls_in(dir)
        .iter()
        .map(|c| {
            let depth = if c.program == "gh" { 2 } else { 1 };
            let mut parts = vec![c.program.clone()];
            parts.extend(c.args.iter().take(depth).cloned());
            parts.join(" ")
        })
        .collect()
}

#[test]
fn oversized_declaration_is_rejected_before_any_io() {
    let env = TestEnv::new();
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(Vec::new()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", 5 * MIB));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Validating);
    assert!(matches!(error, SubmissionError::InputTooLarge { .. }));
    assert_eq!(outcome.response(), "Theme is too big. Themes can be max 4MB");
    assert_eq!(outcome.exit_code(), exit_codes::REJECTED);
    assert_eq!(fetcher.opened(), 0);
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn body_larger_than_declared_is_cut_off() {
    let env = TestEnv::new();
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(vec![0u8; 5 * MIB as usize]).without_length());

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", 1024));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Fetching);
    assert!(matches!(error, SubmissionError::InputTooLarge { .. }));
    assert_eq!(outcome.response(), "Theme is too big. Themes can be max 4MB");
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn decompression_bomb_is_rejected_during_scan() {
    let env = TestEnv::new();
    let zeros = vec![0u8; 5 * MIB as usize];
    let bundle = zip_bytes(&[("preview.png", b"png"), ("padding.bin", &zeros)]).expect("zip");
    assert!((bundle.len() as u64) < MIB);
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Fetching);
    assert!(matches!(error, SubmissionError::InputTooLarge { .. }));
    assert_eq!(outcome.response(), "Theme is too big. Themes can be max 4MB");
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn non_zip_bundle_is_malformed() {
    let env = TestEnv::new();
    let body = b"this is not an archive".to_vec();
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(body.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", body.len() as u64));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::MalformedArchive(_)));
    assert_eq!(outcome.response(), "Theme must be a valid zip archive.");
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn missing_preview_never_clones() {
    let env = TestEnv::new();
    let bundle = zip_bytes(&[("theme.json", br#"{"name":"A","author":"B"}"#)]).expect("zip");
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::SizeChecked);
    assert!(matches!(error, SubmissionError::MissingRequiredAsset(name) if name == "preview.png"));
    assert_eq!(
        outcome.response(),
        "Theme is missing the required preview image `preview.png`."
    );
    assert_eq!(runner.count("git", &["clone"]), 0);
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn validator_rejection_surfaces_last_stderr_line() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(
        ScriptedRunner::new().on(
            "theme-validator",
            &[],
            exited(2, &["checking theme...", "Invalid theme.json"]),
        ),
    );
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Extracted);
    assert!(matches!(error, SubmissionError::ValidationFailed(_)));
    assert!(outcome.response().ends_with("Invalid theme.json"));
    assert_eq!(runner.count("git", &["clone"]), 1);
    assert!(labels_in(&runner, &env.config.content.path).is_empty());
    assert!(labels_in(&runner, &env.config.registry.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn happy_path_publishes_and_opens_pull_request() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let Outcome::Published(published) = &outcome else {
        panic!("expected published, got {outcome:?}");
    };
    assert_eq!(published.branch, "42");
    assert_eq!(published.content_subpath, "themes/42/midnight-blue");
    assert_eq!(published.content_commit, COMMIT_HASH);
    assert_eq!(
        published.pull_request,
        PullRequestState::Created {
            url: PR_URL.to_string()
        }
    );
    assert!(outcome.response().contains(PR_URL));
    assert_eq!(outcome.exit_code(), exit_codes::OK);

    let content = env.config.content.path.join("themes/42/midnight-blue");
    assert!(content.join("preview.png").is_file());
    assert!(content.join("css/theme.css").is_file());

    let entry: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(env.config.registry.path.join("themes/jane/midnight-blue.json"))
            .expect("entry"),
    )
    .expect("json");
    assert_eq!(entry["repo_url"], env.config.content.remote_url.as_str());
    assert_eq!(entry["repo_subpath"], "themes/42/midnight-blue");
    assert_eq!(entry["repo_commit"], COMMIT_HASH);
    assert_eq!(entry["preview_image_path"], "themes/42/midnight-blue/preview.png");

    assert_eq!(
        labels_in(&runner, &env.config.content.path),
        CONTENT_PASS.to_vec()
    );
    let registry = labels_in(&runner, &env.config.registry.path);
    assert_eq!(
        registry,
        vec![
            "git reset",
            "git checkout",
            "git fetch",
            "git clean",
            "git reset",
            "git checkout",
            "git add",
            "git commit",
            "git push",
            "gh pr list",
            "gh pr create"
        ]
    );
    let content_push = runner
        .calls()
        .iter()
        .position(|c| c.workdir == env.config.content.path && c.args[0] == "push")
        .expect("content push");
    let registry_first = runner
        .calls()
        .iter()
        .position(|c| c.workdir == env.config.registry.path)
        .expect("registry call");
    assert!(content_push < registry_first);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn unchanged_resubmission_touches_nothing_downstream() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(ScriptedRunner::new().on("git", &["diff", "--cached"], stdout(&[])));
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    assert!(matches!(&outcome, Outcome::NoChanges { subpath } if subpath == "themes/42/midnight-blue"));
    assert_eq!(
        outcome.response(),
        "No changes detected. Your theme is already up to date."
    );
    assert_eq!(outcome.exit_code(), exit_codes::NO_CHANGES);
    assert_eq!(runner.count("git", &["commit"]), 0);
    assert_eq!(runner.count("git", &["push"]), 0);
    assert!(labels_in(&runner, &env.config.registry.path).is_empty());
    assert_eq!(runner.count("gh", &[]), 0);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn changed_resubmission_updates_the_open_pull_request() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let listed = format!(r#"[{{"url":"{PR_URL}"}}]"#);
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("git", &["diff", "--cached"], stdout(&["themes/42/midnight-blue/css/theme.css"]))
            .on("git", &["rev-parse"], stdout(&[COMMIT_HASH]))
            .on_times("gh", &["pr", "list"], 1, stdout(&["[]"]))
            .on("gh", &["pr", "list"], stdout(&[listed.as_str()]))
            .on("gh", &["pr", "create"], stdout(&[PR_URL])),
    );
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));
    let submitter = submitter(&env, &runner, &fetcher);

    let first = submitter.submit(&request("42", bundle.len() as u64));
    let second = submitter.submit(&request("42", bundle.len() as u64));

    let Outcome::Published(first) = first else {
        panic!("first submission should publish");
    };
    let Outcome::Published(second) = second else {
        panic!("second submission should publish");
    };
    assert!(matches!(first.pull_request, PullRequestState::Created { .. }));
    assert_eq!(
        second.pull_request,
        PullRequestState::Updated {
            url: PR_URL.to_string()
        }
    );
    assert_eq!(runner.count("gh", &["pr", "create"]), 1);
    assert_eq!(runner.count("git", &["push", "--quiet", "--force", "origin", "42"]), 2);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn validator_that_cannot_start_is_tool_unavailable() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner().fail_spawn("theme-validator", &[]));
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::ToolUnavailable(_)));
    assert_eq!(
        outcome.response(),
        "A required tool failed to run. Please try again later."
    );
    assert_eq!(runner.count("git", &["push"]), 0);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn validator_timeout_is_tool_unavailable() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner().on("theme-validator", &[], timed_out()));
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Extracted);
    assert!(matches!(error, SubmissionError::ToolUnavailable(_)));
    assert_eq!(
        outcome.response(),
        "A required tool failed to run. Please try again later."
    );
    assert!(labels_in(&runner, &env.config.content.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn deadline_passing_mid_pipeline_stops_and_cleans_up() {
    let mut env = TestEnv::new();
    env.config.pipeline_timeout_secs = 1;
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(
        publishing_runner().slow("git", &["clone"], Duration::from_millis(1200)),
    );
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::ToolUnavailable(_)));
    assert_eq!(runner.count("theme-validator", &[]), 0);
    assert!(labels_in(&runner, &env.config.content.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn busy_content_repository_gives_up_at_the_deadline() {
    let mut env = TestEnv::new();
    env.config.pipeline_timeout_secs = 1;
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));
    let locks = Arc::new(RepoLocks::new());
    let submitter = submitter(&env, &runner, &fetcher).with_locks(Arc::clone(&locks));

    let gate = locks.gate(&env.config.content.path);
    let _held = gate.lock().expect("hold content lock");
    let outcome = submitter.submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::ExternallyValidated);
    assert!(matches!(error, SubmissionError::ToolUnavailable(_)));
    assert!(labels_in(&runner, &env.config.content.path).is_empty());
    assert!(labels_in(&runner, &env.config.registry.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn git_that_cannot_start_is_tool_unavailable() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner().fail_spawn("git", &["clone"]));
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::Extracted);
    assert!(matches!(error, SubmissionError::ToolUnavailable(_)));
    assert_eq!(runner.count("theme-validator", &[]), 0);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn unreadable_metadata_is_an_opaque_failure() {
    let env = TestEnv::new();
    let bundle = zip_bytes(&[
        ("preview.png", b"png"),
        ("theme.json", b"{ not json at all"),
    ])
    .expect("zip");
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::InternalContractViolation(_)));
    assert_eq!(
        outcome.response(),
        "Something went wrong while publishing your theme."
    );
    assert_eq!(outcome.exit_code(), exit_codes::INVALID);
    assert!(labels_in(&runner, &env.config.content.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn failed_content_push_never_reaches_the_registry() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(publishing_runner().on(
        "git",
        &["push"],
        exited(128, &["fatal: could not read Username"]),
    ));
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", bundle.len() as u64));

    let (stage, error) = rejection(&outcome);
    assert_eq!(*stage, Stage::ExternallyValidated);
    assert!(matches!(error, SubmissionError::Repository(_)));
    assert!(!outcome.response().contains("Username"));
    assert!(labels_in(&runner, &env.config.registry.path).is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn download_failure_is_network_error() {
    let env = TestEnv::new();
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::failing("connection reset"));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", 100));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::NetworkError(_)));
    assert_eq!(
        outcome.response(),
        "Failed to download the theme. Please try again."
    );
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn exhausted_budget_stops_before_download() {
    let mut env = TestEnv::new();
    env.config.pipeline_timeout_secs = 0;
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(valid_bundle("A", "B")));

    let outcome = submitter(&env, &runner, &fetcher).submit(&request("42", 100));

    let (_, error) = rejection(&outcome);
    assert!(matches!(error, SubmissionError::NetworkError(_)));
    assert_eq!(fetcher.opened(), 0);
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn policy_and_identity_checks_do_no_io() {
    let env = TestEnv::new();
    let runner = Arc::new(publishing_runner());
    let fetcher = Arc::new(StaticFetcher::new(valid_bundle("A", "B")));
    let submitter = submitter(&env, &runner, &fetcher);

    let mut forced = request("42", 100);
    forced.options.bundle_mode = BundleMode::Forced;
    let outcome = submitter.submit(&forced);
    assert!(matches!(
        rejection(&outcome).1,
        SubmissionError::PolicyViolation(_)
    ));

    let outcome = submitter.submit(&request("../../etc", 100));
    assert!(matches!(
        rejection(&outcome).1,
        SubmissionError::InvalidSubmitter(_)
    ));
    assert_eq!(outcome.response(), "Invalid submitter id.");

    for branch in ["main", "origin", "upstream"] {
        let outcome = submitter.submit(&request(branch, 100));
        assert!(
            matches!(rejection(&outcome).1, SubmissionError::InvalidSubmitter(_)),
            "{branch}"
        );
    }

    assert_eq!(fetcher.opened(), 0);
    assert!(runner.calls().is_empty());
    assert_eq!(env.leftover_workspaces(), 0);
}

struct PanickingRunner;

impl ProcessRunner for PanickingRunner {
    fn execute(&self, spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        panic!("unexpected fault running {spec}");
    }
}

#[test]
fn fault_mid_pipeline_still_releases_workspace() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));
    let submitter = Submitter::new(env.config.clone(), Arc::new(PanickingRunner), fetcher);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        submitter.submit(&request("42", bundle.len() as u64))
    }));

    assert!(result.is_err());
    assert_eq!(env.leftover_workspaces(), 0);
}

#[test]
fn concurrent_submissions_never_interleave_repository_commands() {
    let env = TestEnv::new();
    let bundle = valid_bundle("Midnight Blue", "Jane");
    let runner = Arc::new(
        ScriptedRunner::new()
            .slow("git", &["push", "--quiet"], Duration::from_millis(50))
            .on("git", &["diff", "--cached"], stdout(&["a", "b", "c"]))
            .on("git", &["rev-parse"], stdout(&[COMMIT_HASH]))
            .on("gh", &["pr", "list"], stdout(&["[]"]))
            .on("gh", &["pr", "create"], stdout(&[PR_URL])),
    );
    let fetcher = Arc::new(StaticFetcher::new(bundle.clone()));
    let submitter = Arc::new(submitter(&env, &runner, &fetcher));

    let handles: Vec<_> = ["42", "43"]
        .into_iter()
        .map(|id| {
            let submitter = Arc::clone(&submitter);
            let request = request(id, bundle.len() as u64);
            thread::spawn(move || submitter.submit(&request))
        })
        .collect();
    for handle in handles {
        let outcome = handle.join().expect("join");
        assert!(matches!(outcome, Outcome::Published(_)), "{outcome:?}");
    }

    let expected_content: Vec<&str> = CONTENT_PASS.iter().chain(&CONTENT_PASS).copied().collect();
    assert_eq!(labels_in(&runner, &env.config.content.path), expected_content);

    let registry_pass = [
        "git reset",
        "git checkout",
        "git fetch",
        "git clean",
        "git reset",
        "git checkout",
        "git add",
        "git commit",
        "git push",
        "gh pr list",
        "gh pr create",
    ];
    let expected_registry: Vec<&str> = registry_pass.iter().chain(&registry_pass).copied().collect();
    assert_eq!(labels_in(&runner, &env.config.registry.path), expected_registry);
    assert_eq!(env.leftover_workspaces(), 0);
}
