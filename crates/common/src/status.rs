//! Result statuses and parent rollup rules

use serde::{Deserialize, Serialize};

/// Terminal status of an executed unit (step, context, test, spec, run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl Outcome {
    /// Derive a parent status from its children.
    ///
    /// A parent is `Skipped` iff every child was skipped; otherwise `Fail`
    /// if any child failed, else `Warning` if any child warned, else `Pass`.
    pub fn rollup<I>(children: I) -> Outcome
    where
        I: IntoIterator<Item = Outcome>,
    {
        let mut any = false;
        let mut any_fail = false;
        let mut any_warning = false;
        let mut all_skipped = true;

        for child in children {
            any = true;
            match child {
                Outcome::Fail => {
                    any_fail = true;
                    all_skipped = false;
                }
                Outcome::Warning => {
                    any_warning = true;
                    all_skipped = false;
                }
                Outcome::Pass => all_skipped = false,
                Outcome::Skipped => {}
            }
        }

        if !any || all_skipped {
            Outcome::Skipped
        } else if any_fail {
            Outcome::Fail
        } else if any_warning {
            Outcome::Warning
        } else {
            Outcome::Pass
        }
    }

    /// Whether this status should make the process exit non-zero.
    pub fn is_failure(self) -> bool {
        self == Outcome::Fail
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Pass => "PASS",
            Outcome::Fail => "FAIL",
            Outcome::Warning => "WARNING",
            Outcome::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}
