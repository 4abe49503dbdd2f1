//! Post-action reflection verdicts.

use serde::{Deserialize, Serialize};

/// Whether the last step advanced the goal, in the reflector's judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSignal {
    Progress,
    NoProgress,
}

/// The reflector's assessment of one completed step.
///
/// Feeds the stagnation detector and decides whether the active plan step
/// advances to done. When the verdict and the detector's repeated-action
/// heuristic disagree, the detector is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    /// True when the active step's completion predicate is satisfied.
    pub step_complete: bool,
    pub progress: ProgressSignal,
    /// The reflector judged the remaining plan no longer viable.
    pub request_replan: bool,
    pub reason: String,
}

impl ReflectionVerdict {
    /// The fallback verdict used when no reflector is configured:
    /// a successful action with a visible change counts as progress and
    /// completes the step.
    pub fn heuristic(action_succeeded: bool, changed: bool) -> Self {
        let progressed = action_succeeded && changed;
        Self {
            step_complete: progressed,
            progress: if progressed {
                ProgressSignal::Progress
            } else {
                ProgressSignal::NoProgress
            },
            request_replan: false,
            reason: "heuristic verdict (no reflector configured)".to_string(),
        }
    }
}
