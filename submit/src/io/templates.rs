//! Pull request title and body rendering.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::{BundleMode, KeyboardMode, SubmissionOptions, ThemeMetadata};

const TITLE_TEMPLATE: &str = include_str!("../templates/pr_title.txt");
const BODY_TEMPLATE: &str = include_str!("../templates/pr_body.md");

/// Inputs shared by the title and body templates.
#[derive(Debug, Clone)]
pub struct PullRequestContext<'a> {
    pub submitter_id: &'a str,
    pub theme: &'a ThemeMetadata,
    pub options: &'a SubmissionOptions,
    pub content_subpath: &'a str,
    pub content_web_url: &'a str,
    pub commit: &'a str,
}

/// Rendered pull request text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestText {
    pub title: String,
    pub body: String,
}

/// Template engine wrapper around minijinja.
pub struct PullRequestTemplates {
    env: Environment<'static>,
}

impl Default for PullRequestTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl PullRequestTemplates {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("title", TITLE_TEMPLATE)
            .expect("title template should be valid");
        env.add_template("body", BODY_TEMPLATE)
            .expect("body template should be valid");
        Self { env }
    }

    pub fn render(&self, input: &PullRequestContext<'_>) -> Result<PullRequestText> {
        let content_url = format!(
            "{}/tree/{}/{}",
            input.content_web_url.trim_end_matches('/'),
            input.commit,
            input.content_subpath
        );
        let ctx = context! {
            submitter => input.submitter_id,
            theme => input.theme,
            bundle => describe_bundle(input.options.bundle_mode),
            keyboard => describe_keyboard(input.options.keyboard_mode),
            targets_default_keyboard => input.options.targets_default_keyboard,
            keyboard_toggleable => input.options.keyboard_toggleable,
            content_subpath => input.content_subpath,
            content_url => content_url,
            commit => input.commit,
        };
        let title = self.env.get_template("title")?.render(&ctx)?;
        let body = self.env.get_template("body")?.render(&ctx)?;
        Ok(PullRequestText {
            title: title.trim().to_string(),
            body: format!("{}\n", body.trim_end()),
        })
    }
}

fn describe_bundle(mode: BundleMode) -> &'static str {
    match mode {
        BundleMode::None => "none",
        BundleMode::Toggleable => "included, toggleable",
        BundleMode::Forced => "included, always on",
    }
}

fn describe_keyboard(mode: KeyboardMode) -> &'static str {
    match mode {
        KeyboardMode::None => "none",
        KeyboardMode::DefaultKeyboard => "default keyboard only",
        KeyboardMode::SystemWide => "system-wide",
    }
}
