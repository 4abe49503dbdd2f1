//! Runtime error types for the ductor orchestration loop.
//!
//! All fallible operations in the loop return `DuctorResult<T>`.
//! Error variants carry enough context to produce actionable episode records.

use thiserror::Error;

/// The unified error type for the ductor runtime.
#[derive(Debug, Error)]
pub enum DuctorError {
    /// The planner call errored or returned an empty plan.
    ///
    /// This is fatal to the episode: it terminates with outcome `Failed`
    /// before any capability action runs.
    #[error("planning failed: {reason}")]
    PlanningFailed { reason: String },

    /// Both the semantic element tree and the visual fallback produced zero
    /// targets for the current frame.
    #[error("no addressable targets found in the current frame")]
    NoTargetsFound,

    /// The reasoning service for a role has no credential configured.
    #[error("reasoning service unavailable for role '{role}': {reason}")]
    ReasoningUnavailable { role: String, reason: String },

    /// A reasoning response failed schema validation or could not be parsed
    /// into the expected typed payload.
    #[error("reasoning response malformed: {reason}")]
    ReasoningMalformed { reason: String },

    /// The policy gate blocked a proposed action.
    ///
    /// Never retried against the same action — the proposer is re-asked
    /// with this reason added to its context.
    #[error("policy blocked action: {reason}")]
    PolicyBlocked { reason: String },

    /// The capability failed to capture, query, or execute.
    ///
    /// Recorded and recovered from — a failed execute still proceeds to
    /// Verifying so the real-world state can be assessed.
    #[error("capability failure during {operation}: {reason}")]
    CapabilityFailure { operation: String, reason: String },

    /// A reasoning or capability call exceeded its per-call timeout.
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    /// The loop cannot make progress (e.g. the planner returned an
    /// equivalent plan twice in a row). Fatal to the episode.
    #[error("unrecoverable: {reason}")]
    Unrecoverable { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The episode sink could not persist a record.
    ///
    /// Fatal — a step that cannot be persisted cannot proceed.
    #[error("memory write failed: {reason}")]
    MemoryWriteFailed { reason: String },

    /// A persisted episode log failed chain verification or could not be
    /// decoded during replay.
    #[error("episode log corrupt: {reason}")]
    MemoryCorrupt { reason: String },
}

/// Convenience alias used throughout the ductor crates.
pub type DuctorResult<T> = Result<T, DuctorError>;
