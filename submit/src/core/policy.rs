//! Consistency rules for the options a submitter declares.
//!
//! Checked before the pipeline starts; no rule may touch the network or disk.

use std::fmt;

use crate::core::types::{BundleMode, KeyboardMode, SubmissionOptions};

/// A single violated rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    ChecklistNotAcknowledged,
    ForcedBundle,
    KeyboardFlagsWithoutKeyboardMode,
    DefaultKeyboardNotTargeted,
    SystemWideNotDefaultKeyboard,
    SystemWideNotToggleable,
}

impl PolicyViolation {
    /// Message shown to the submitter.
    pub fn message(self) -> &'static str {
        match self {
            PolicyViolation::ChecklistNotAcknowledged => {
                "You must confirm that your theme follows the submission checklist."
            }
            PolicyViolation::ForcedBundle => {
                "Bundled content must be toggleable. Themes that force bundled content on users are not accepted."
            }
            PolicyViolation::KeyboardFlagsWithoutKeyboardMode => {
                "Keyboard options were set, but the keyboard mode is `none`."
            }
            PolicyViolation::DefaultKeyboardNotTargeted => {
                "Default keyboard themes must target the default keyboard."
            }
            PolicyViolation::SystemWideNotDefaultKeyboard => {
                "System-wide keyboard themes must also target the default keyboard."
            }
            PolicyViolation::SystemWideNotToggleable => {
                "System-wide keyboard themes must be toggleable."
            }
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Return every violated rule, in a stable order.
pub fn check_options(options: &SubmissionOptions) -> Vec<PolicyViolation> {
    let mut violations = Vec::new();

    if !options.checklist_acknowledged {
        violations.push(PolicyViolation::ChecklistNotAcknowledged);
    }
    if options.bundle_mode == BundleMode::Forced {
        violations.push(PolicyViolation::ForcedBundle);
    }

    match options.keyboard_mode {
        KeyboardMode::None => {
            if options.targets_default_keyboard || options.keyboard_toggleable {
                violations.push(PolicyViolation::KeyboardFlagsWithoutKeyboardMode);
            }
        }
        KeyboardMode::DefaultKeyboard => {
            if !options.targets_default_keyboard {
                violations.push(PolicyViolation::DefaultKeyboardNotTargeted);
            }
        }
        KeyboardMode::SystemWide => {
            if !options.targets_default_keyboard {
                violations.push(PolicyViolation::SystemWideNotDefaultKeyboard);
            }
            if !options.keyboard_toggleable {
                violations.push(PolicyViolation::SystemWideNotToggleable);
            }
        }
    }

    violations
}

/// First violated rule, if any.
pub fn first_violation(options: &SubmissionOptions) -> Option<PolicyViolation> {
    check_options(options).into_iter().next()
}
