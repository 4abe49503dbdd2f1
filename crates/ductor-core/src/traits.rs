//! Core trait definitions for the orchestration loop.
//!
//! These traits define the complete trust boundary of the runtime:
//!
//! - `Capability`  — the machine (capture, element tree, action execution)
//! - `Planner`     — untrusted long-horizon reasoning
//! - `Proposer`    — untrusted short-horizon reasoning
//! - `Reflector`   — untrusted post-action judgment
//! - `PolicyGate`  — trusted gate (evaluated before any action executes)
//! - `EpisodeSink` — trusted sink (records every step immutably)
//! - `Operator`    — the human in the loop for `RequireHuman` verdicts
//! - `Embedder`    — optional text embeddings for memory retrieval
//!
//! The orchestrator wires them together in the correct order. No action
//! reaches `Capability::execute` unless the gate allowed it (directly, or
//! via operator approval).

use ductor_contracts::{
    action::{Action, ActionResult, ProposedAction},
    capability::Health,
    context::{MemoryContext, ProposalContext, ReflectionRequest},
    episode::{EpisodeId, EpisodeSummary, Outcome, StepRecord},
    error::DuctorResult,
    frame::Frame,
    gate::{GateContext, GateVerdict, OperatorDecision},
    plan::Plan,
    reflection::ReflectionVerdict,
    target::ElementTree,
};

/// The platform adapter: everything the runtime can do to the machine.
///
/// Implementations are exclusively owned by one in-flight episode at a
/// time; the orchestrator takes `&mut self` so no concurrent execution can
/// occur against the same machine.
pub trait Capability: Send {
    /// Capture one frame at logical resolution.
    fn capture(&mut self) -> DuctorResult<Frame>;

    /// Query the platform's element tree, normalized. `Ok(None)` means the
    /// platform has no semantic tree for the current screen; grounding
    /// falls back to pixels.
    fn query_tree(&mut self) -> DuctorResult<Option<ElementTree>>;

    /// Execute one action. A failure here is recorded, never fatal: the
    /// loop proceeds to Verifying so real-world state can be assessed.
    fn execute(&mut self, action: &Action) -> DuctorResult<ActionResult>;

    /// Self-reported readiness (OS permissions, input access). The
    /// orchestrator refuses to start an episode while this is not ok.
    fn health_check(&self) -> Health;
}

/// Long-horizon planning. Untrusted — may be backed by an LLM.
pub trait Planner: Send + Sync {
    /// Produce an initial ordered plan for `goal`.
    fn make_plan(&self, goal: &str, memory: &MemoryContext) -> DuctorResult<Plan>;

    /// Revise an in-flight plan given the full episode history.
    fn revise_plan(&self, plan: &Plan, history: &[String]) -> DuctorResult<Plan>;
}

/// Short-horizon action proposal. Untrusted.
pub trait Proposer: Send + Sync {
    /// Propose exactly one action (or a terminal noop/halt) for the
    /// current grounded observation.
    fn propose(&self, ctx: &ProposalContext) -> DuctorResult<ProposedAction>;
}

/// Post-action judgment. Untrusted.
pub trait Reflector: Send + Sync {
    /// Judge whether the step succeeded and the plan remains viable.
    fn reflect(&self, request: &ReflectionRequest) -> DuctorResult<ReflectionVerdict>;

    /// Optionally suggest an unblocking hint when the loop is stalling.
    /// The default implementation has none.
    fn suggest_hint(&self, _ctx: &ProposalContext) -> DuctorResult<Option<String>> {
        Ok(None)
    }
}

/// The policy gate: trusted, deterministic, evaluated before every action.
pub trait PolicyGate: Send + Sync {
    fn evaluate(&self, action: &Action, ctx: &GateContext) -> DuctorResult<GateVerdict>;
}

/// The episode sink: the append-only execution record.
///
/// Every step — allowed, blocked, or failed — produces exactly one
/// `StepRecord` that must be persisted. A failed write is fatal to the
/// episode: a step that cannot be recorded cannot proceed.
pub trait EpisodeSink: Send + Sync {
    /// Open the record stream for a new episode.
    fn open(&self, episode: EpisodeId, goal: &str) -> DuctorResult<()>;

    /// Append one step record. Append-only: records are never modified.
    fn append(&self, episode: EpisodeId, record: &StepRecord) -> DuctorResult<()>;

    /// Seal the episode with its terminal outcome and summary.
    fn finalize(
        &self,
        episode: EpisodeId,
        outcome: Outcome,
        summary: &EpisodeSummary,
    ) -> DuctorResult<()>;
}

/// The human operator consulted on `RequireHuman` verdicts.
///
/// The orchestrator blocks on `resolve` — a suspension, not a skip.
pub trait Operator: Send + Sync {
    fn resolve(&self, action: &Action, reason: &str) -> DuctorResult<OperatorDecision>;
}

/// Text embeddings for semantic memory retrieval.
///
/// Fails with `ReasoningUnavailable` when no embedding credential is
/// configured; retrieval then falls back to keyword matching.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> DuctorResult<Vec<f32>>;
}
