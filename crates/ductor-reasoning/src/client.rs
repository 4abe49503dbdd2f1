//! The reasoning client boundary.
//!
//! Every external reasoning service — planner, proposer, reflector,
//! embedding model — sits behind the single `ReasoningClient` trait: a
//! schema-typed JSON request/response function with a per-call timeout
//! handled by the implementation. The core never talks to a concrete
//! provider; it sees this trait and nothing else.

use serde_json::{json, Value};

use ductor_contracts::error::{DuctorError, DuctorResult};

/// The reasoning roles the runtime consumes, one service each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningRole {
    Planner,
    Proposer,
    Reflector,
    Embedding,
}

impl ReasoningRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningRole::Planner => "planner",
            ReasoningRole::Proposer => "proposer",
            ReasoningRole::Reflector => "reflector",
            ReasoningRole::Embedding => "embedding",
        }
    }
}

/// A request/response reasoning service.
///
/// Implementations own transport, credentials, and the per-call timeout;
/// a timeout surfaces as `DuctorError::Timeout`, a missing credential as
/// `DuctorError::ReasoningUnavailable`. Responses are validated against
/// the role's schema by the typed adapters before parsing.
pub trait ReasoningClient: Send + Sync {
    fn request(&self, role: ReasoningRole, prompt: &Value) -> DuctorResult<Value>;
}

/// The deterministic offline client.
///
/// Returns a fixed no-op plan, a terminal noop action, an approving
/// reflection, and zero embeddings — enough for the rest of the loop to be
/// exercised without any network or credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubReasoningClient;

impl StubReasoningClient {
    pub fn new() -> Self {
        Self
    }
}

impl ReasoningClient for StubReasoningClient {
    fn request(&self, role: ReasoningRole, prompt: &Value) -> DuctorResult<Value> {
        let response = match role {
            ReasoningRole::Planner => json!({
                "steps": [
                    {
                        "intent": "Hold position and observe",
                        "completion": "No further action is required"
                    }
                ]
            }),
            ReasoningRole::Proposer => json!({
                "action": { "type": "noop", "reason": "stub reasoning mode" }
            }),
            ReasoningRole::Reflector => {
                // Hint requests get an empty hint; verdict requests get an
                // approving verdict.
                if prompt.get("kind").and_then(|v| v.as_str()) == Some("hint") {
                    json!({ "hint": null })
                } else {
                    json!({
                        "step_complete": true,
                        "progress": "progress",
                        "request_replan": false,
                        "reason": "stub reasoning mode"
                    })
                }
            }
            ReasoningRole::Embedding => json!({ "embedding": [0.0, 0.0, 0.0, 0.0] }),
        };
        Ok(response)
    }
}

/// The client used when no credential is configured for a role.
///
/// Every call fails with `ReasoningUnavailable`; an episode start against
/// an unconfigured planner therefore fails fast with `PlanningFailed`
/// before any capability action runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredReasoningClient;

impl UnconfiguredReasoningClient {
    pub fn new() -> Self {
        Self
    }
}

impl ReasoningClient for UnconfiguredReasoningClient {
    fn request(&self, role: ReasoningRole, _prompt: &Value) -> DuctorResult<Value> {
        Err(DuctorError::ReasoningUnavailable {
            role: role.as_str().to_string(),
            reason: "no credential configured".to_string(),
        })
    }
}
