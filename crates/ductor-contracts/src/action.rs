//! The action vocabulary and execution results.
//!
//! Reasoning services emit loosely-typed tool-call payloads; the reasoning
//! boundary parses them into this tagged `Action` type before anything
//! downstream sees them. Every proposed action carries provenance so the
//! episode log can attribute it to the proposer call that produced it.

use serde::{Deserialize, Serialize};

/// Where a click lands: a grounded mark or a raw logical coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClickTarget {
    Mark { mark: u32 },
    Coordinate { x: i32, y: i32 },
}

/// Scroll direction for `Action::Scroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// One UI action, as executed by the capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        target: ClickTarget,
    },
    Type {
        text: String,
    },
    Key {
        combo: Vec<String>,
    },
    Scroll {
        direction: ScrollDirection,
        amount: i32,
    },
    BrowserOp {
        kind: String,
        args: serde_json::Value,
    },
    ShellOp {
        command: String,
        args: Vec<String>,
    },
    RunSkill {
        name: String,
        args: serde_json::Value,
    },
    /// The proposer had nothing to do; terminal for the episode.
    Noop {
        reason: String,
    },
    /// The proposer declared the episode over; terminal.
    Halt {
        reason: String,
    },
}

impl Action {
    /// The discriminant string used by policy rules.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Key { .. } => "key",
            Action::Scroll { .. } => "scroll",
            Action::BrowserOp { .. } => "browser_op",
            Action::ShellOp { .. } => "shell_op",
            Action::RunSkill { .. } => "run_skill",
            Action::Noop { .. } => "noop",
            Action::Halt { .. } => "halt",
        }
    }

    /// True for the proposer's terminal signals.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Noop { .. } | Action::Halt { .. })
    }

    /// A stable signature for repeat detection.
    ///
    /// Identical actions (same kind + same target/text/args) produce
    /// identical signatures across steps.
    pub fn signature(&self) -> String {
        // serde_json serialization of the tagged enum is deterministic for
        // a given value, which is all the repeat detector needs.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Attribution for one proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// The proposer call that produced this action.
    pub proposer_call: uuid::Uuid,
    /// The grounding generation the proposer saw. Marks resolve only
    /// against this generation.
    pub grounding_generation: u64,
}

/// An action together with its provenance, as returned by the proposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action: Action,
    pub provenance: Provenance,
}

/// The capability's report for one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// Error kind when `success` is false.
    pub error: Option<String>,
    /// Optional structured detail (e.g. browser tool output).
    pub detail: Option<serde_json::Value>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            detail: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            detail: None,
        }
    }
}
