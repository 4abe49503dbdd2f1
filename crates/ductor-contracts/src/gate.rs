//! Policy gate verdicts and evaluation context.
//!
//! The gate consumes a proposed action plus a `GateContext` and produces a
//! `GateVerdict`. The orchestrator never lets an action reach the
//! capability unless the verdict is `Allow` (directly, or via operator
//! approval of `RequireHuman`).

use serde::{Deserialize, Serialize};

use crate::target::Rect;

/// The decision emitted by the policy gate for a single proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateVerdict {
    /// The action is permitted. Execution continues.
    Allow,

    /// The action is denied.
    ///
    /// Recorded in the episode with the reason; never retried verbatim —
    /// the proposer is re-asked with the reason added to its context.
    Block { reason: String },

    /// The action requires operator sign-off before execution.
    ///
    /// The orchestrator suspends on its operator interface; this is never
    /// a silent skip.
    RequireHuman { reason: String },
}

/// Everything the gate needs beyond the action itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateContext {
    /// Resolved bounds of the action's target, when it addresses a mark.
    pub target_bounds: Option<Rect>,
}

/// The operator's answer to a `RequireHuman` suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorDecision {
    Approve,
    Deny { reason: String },
}
