//! Theme submission pipeline.
//!
//! Takes a zipped theme uploaded by a community member, checks it, runs the
//! external validator against a registry fixture, publishes the theme files to
//! a content repository and opens (or refreshes) a pull request against the
//! metadata registry. The layout keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (option policy, naming, messages).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (downloads, archives, processes, git).
//!   Every external program runs behind [`io::process::ProcessRunner`] so tests
//!   can script it.
//!
//! [`pipeline`] drives one submission through every stage; [`publish`] holds the
//! repository command sequences it runs under lock.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod publish;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
