//! Stable exit codes for `theme-submit` commands.

/// Theme published, or options accepted by `check-options`.
pub const OK: i32 = 0;
/// Bad invocation, unreadable config, or an internal failure.
pub const INVALID: i32 = 1;
/// The submission was rejected; the response says why.
pub const REJECTED: i32 = 2;
/// The bundle matched what is already published.
pub const NO_CHANGES: i32 = 3;
