//! Episodes and per-step records.
//!
//! A `StepRecord` is the immutable bundle the orchestrator commits for every
//! step — successful, blocked, or failed. An `Episode` is the ordered
//! sequence of those records plus the terminal outcome. Episodes are
//! append-only once a step is committed; the orchestrator is the sole
//! writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    action::{ActionResult, ProposedAction},
    frame::FrameRef,
    gate::GateVerdict,
    plan::Plan,
    reflection::ReflectionVerdict,
    target::Target,
};

/// Unique identifier for one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId(pub uuid::Uuid);

impl EpisodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal outcome of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    HaltedByLimit,
    HaltedByUser,
    Failed,
}

/// The immutable record of one orchestrator step.
///
/// Blocked actions produce a record with `result` and `post_frame` absent;
/// locally refused actions (e.g. a deduplicated hotkey) produce a record
/// with `gate` absent because the gate was never consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step counter within the episode, starting at 0.
    pub step: u64,
    /// Index of the plan step that was active, when a plan existed.
    pub plan_step: Option<usize>,
    pub pre_frame: FrameRef,
    /// Snapshot of the grounded targets the proposer saw.
    pub targets: Vec<Target>,
    pub proposed: ProposedAction,
    pub gate: Option<GateVerdict>,
    pub result: Option<ActionResult>,
    pub post_frame: Option<FrameRef>,
    /// Change magnitude between pre and post frames, in [0, 1].
    pub magnitude: Option<f64>,
    pub reflection: Option<ReflectionVerdict>,
    /// Wall-clock time the record was created (UTC).
    pub timestamp: DateTime<Utc>,
}

/// Terminal statistics recorded alongside the outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub steps: u64,
    pub failures: u32,
    pub runtime_ms: u64,
    pub stuck_reasons: Vec<String>,
    pub replans: u32,
}

/// One full episode: goal, committed steps, and terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub goal: String,
    pub steps: Vec<StepRecord>,
    /// The plan as it stood at termination, when planning succeeded.
    pub plan: Option<Plan>,
    pub outcome: Option<Outcome>,
    /// The fatal error that terminated the episode, when outcome is
    /// `Failed`. No failure is ever swallowed silently.
    pub failure: Option<String>,
    pub summary: Option<EpisodeSummary>,
    pub started_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: EpisodeId::new(),
            goal: goal.into(),
            steps: Vec::new(),
            plan: None,
            outcome: None,
            failure: None,
            summary: None,
            started_at: Utc::now(),
        }
    }
}
