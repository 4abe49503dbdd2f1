//! Context payloads passed to the reasoning services.
//!
//! These are the runtime's side of the request contracts: the orchestrator
//! assembles them, the reasoning boundary serializes them into prompts.

use serde::{Deserialize, Serialize};

use crate::{
    action::{Action, ActionResult},
    frame::FrameRef,
    plan::PlanStep,
    target::Target,
};

/// Retrieved memory handed to the planner and proposer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    /// One-line digests of prior episodes relevant to the goal.
    pub episode_digests: Vec<String>,
    /// Retrieved semantic notes.
    pub notes: Vec<String>,
    /// Names + trigger descriptions of retrievable skills.
    pub skills: Vec<String>,
}

/// Repeat information injected after the same action recurs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatInfo {
    /// How many times the action has repeated consecutively.
    pub count: u32,
    /// Signature of the repeated action.
    pub action_signature: String,
    /// An unblocking hint from the reflector, when one was requested.
    pub hint: Option<String>,
}

/// Everything the proposer receives for one Proposing phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalContext {
    pub goal: String,
    pub current_step: Option<PlanStep>,
    /// The grounding generation of `targets`; proposed marks must carry it.
    pub generation: u64,
    pub targets: Vec<Target>,
    /// Tail of the episode history, most recent last.
    pub recent_history: Vec<String>,
    pub memory: MemoryContext,
    pub repeat: Option<RepeatInfo>,
    /// Block reasons from gate rejections of earlier proposals this step.
    pub block_reasons: Vec<String>,
    /// Failure notes from malformed/timed-out attempts this phase.
    pub attempt_failures: Vec<String>,
}

/// The full step bundle handed to the reflector after Verifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionRequest {
    pub goal: String,
    pub step: Option<PlanStep>,
    pub action: Action,
    pub result: ActionResult,
    pub pre_frame: FrameRef,
    pub post_frame: FrameRef,
    pub changed: bool,
    pub magnitude: f64,
    pub recent_history: Vec<String>,
}
