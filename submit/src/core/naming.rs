//! Deterministic names for repository paths and branches.
//!
//! Every name here is a pure function of submitter identity and theme metadata,
//! which is what makes resubmission idempotent.

use std::sync::LazyLock;

use regex::Regex;

/// Directory under the content repository that holds published themes.
pub const CONTENT_ROOT: &str = "themes";

/// Directory under the registry that holds entry files.
pub const REGISTRY_ROOT: &str = "themes";

const FALLBACK_SLUG: &str = "theme";

static NON_SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// Lowercase, hyphen-separated form of `input`, safe as a path component.
pub fn slug(input: &str) -> String {
    let lowered = input.to_lowercase();
    let replaced = NON_SLUG_RE.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Submitter ids become branch names and path components.
pub fn is_valid_submitter_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && !id.starts_with('-')
        && id != "HEAD"
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}

/// Branch carrying a submitter's registry changes. One per submitter.
pub fn branch_name(submitter_id: &str) -> String {
    submitter_id.to_string()
}

/// Whether `submitter_id`, used as a branch name, would clash with one of `reserved`.
pub fn is_reserved_branch(submitter_id: &str, reserved: &[&str]) -> bool {
    reserved.contains(&submitter_id)
}

/// Content repository path for a submitter's theme, relative to the repo root.
///
/// Submitter ids never contain `/`, so each submitter owns one directory.
pub fn content_subpath(submitter_id: &str, theme_name: &str) -> String {
    format!("{CONTENT_ROOT}/{submitter_id}/{}", slug(theme_name))
}

/// Registry entry file path for an author/theme pair, relative to the repo root.
pub fn entry_path(author: &str, theme_name: &str) -> String {
    format!("{REGISTRY_ROOT}/{}/{}.json", slug(author), slug(theme_name))
}
