//! # ductor-reasoning
//!
//! The schema-validated reasoning boundary for the ductor runtime.
//!
//! Planner, proposer, reflector, and embedding services are consumed
//! through the single [`ReasoningClient`] trait — a JSON request/response
//! function per role. The typed adapters ([`SchemaPlanner`],
//! [`SchemaProposer`], [`SchemaReflector`], [`SchemaEmbedder`]) validate
//! every response against its role's JSON Schema and parse it into the
//! contract types; a mismatch becomes `ReasoningMalformed` at this
//! boundary instead of an ambiguous payload downstream.
//!
//! Two built-in clients keep the rest of the loop testable offline:
//! [`StubReasoningClient`] (deterministic fixed responses) and
//! [`UnconfiguredReasoningClient`] (every call fails
//! `ReasoningUnavailable`, as when no credential is configured).

pub mod adapters;
pub mod client;
pub mod schema;

pub use adapters::{parse_action, SchemaEmbedder, SchemaPlanner, SchemaProposer, SchemaReflector};
pub use client::{ReasoningClient, ReasoningRole, StubReasoningClient, UnconfiguredReasoningClient};
pub use schema::{response_schema, validate_response};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use ductor_contracts::{
        action::{Action, ClickTarget, ScrollDirection},
        context::{MemoryContext, ProposalContext},
        error::{DuctorError, DuctorResult},
        plan::StepStatus,
    };
    use ductor_core::traits::{Embedder, Planner, Proposer};

    use super::{
        parse_action, validate_response, ReasoningClient, ReasoningRole, SchemaEmbedder,
        SchemaPlanner, SchemaProposer, StubReasoningClient, UnconfiguredReasoningClient,
    };

    /// A client that answers every request with one canned value.
    struct CannedClient {
        response: Value,
    }

    impl ReasoningClient for CannedClient {
        fn request(&self, _role: ReasoningRole, _prompt: &Value) -> DuctorResult<Value> {
            Ok(self.response.clone())
        }
    }

    fn ctx() -> ProposalContext {
        ProposalContext {
            goal: "open settings".to_string(),
            generation: 3,
            ..ProposalContext::default()
        }
    }

    // ── Stub client ──────────────────────────────────────────────────────────

    /// The stub produces a valid single-step no-op plan.
    #[test]
    fn test_stub_planner_yields_noop_plan() {
        let planner = SchemaPlanner::new(Arc::new(StubReasoningClient::new()));
        let plan = planner.make_plan("anything", &MemoryContext::default()).unwrap();

        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].status, StepStatus::Active);
        assert!(plan.steps[0].intent.contains("Hold position"));
    }

    /// The stub proposer returns a terminal noop carrying the grounding
    /// generation it was asked against.
    #[test]
    fn test_stub_proposer_is_terminal() {
        let proposer = SchemaProposer::new(Arc::new(StubReasoningClient::new()));
        let proposed = proposer.propose(&ctx()).unwrap();

        assert!(proposed.action.is_terminal());
        assert_eq!(proposed.provenance.grounding_generation, 3);
    }

    #[test]
    fn test_stub_embedder_returns_vector() {
        let embedder = SchemaEmbedder::new(Arc::new(StubReasoningClient::new()));
        let vector = embedder.embed("some text").unwrap();
        assert!(!vector.is_empty());
    }

    // ── Unconfigured client ──────────────────────────────────────────────────

    #[test]
    fn test_unconfigured_client_is_unavailable() {
        let planner = SchemaPlanner::new(Arc::new(UnconfiguredReasoningClient::new()));
        match planner.make_plan("anything", &MemoryContext::default()) {
            Err(DuctorError::ReasoningUnavailable { role, .. }) => {
                assert_eq!(role, "planner");
            }
            other => panic!("expected ReasoningUnavailable, got {:?}", other.map(|p| p.goal)),
        }
    }

    // ── Schema validation ────────────────────────────────────────────────────

    /// A response missing required fields is rejected before parsing.
    #[test]
    fn test_malformed_planner_response_rejected() {
        let planner = SchemaPlanner::new(Arc::new(CannedClient {
            response: json!({ "steps": [] }),
        }));
        match planner.make_plan("anything", &MemoryContext::default()) {
            Err(DuctorError::ReasoningMalformed { reason }) => {
                assert!(reason.contains("planner"), "reason was: {reason}");
            }
            other => panic!("expected ReasoningMalformed, got {:?}", other.map(|p| p.goal)),
        }
    }

    #[test]
    fn test_malformed_proposer_response_rejected() {
        let proposer = SchemaProposer::new(Arc::new(CannedClient {
            response: json!({ "action": { "type": "teleport" } }),
        }));
        assert!(matches!(
            proposer.propose(&ctx()),
            Err(DuctorError::ReasoningMalformed { .. })
        ));
    }

    #[test]
    fn test_validate_response_accepts_good_payloads() {
        validate_response(
            ReasoningRole::Reflector,
            &json!({
                "step_complete": false,
                "progress": "no_progress",
                "reason": "nothing moved"
            }),
        )
        .unwrap();

        assert!(validate_response(
            ReasoningRole::Reflector,
            &json!({ "step_complete": "yes", "progress": "no_progress", "reason": "" }),
        )
        .is_err());
    }

    // ── Action parsing ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_action_variants() {
        assert_eq!(
            parse_action(&json!({ "type": "click", "mark": 4 })).unwrap(),
            Action::Click { target: ClickTarget::Mark { mark: 4 } }
        );
        assert_eq!(
            parse_action(&json!({ "type": "click", "x": 10, "y": 20 })).unwrap(),
            Action::Click { target: ClickTarget::Coordinate { x: 10, y: 20 } }
        );
        assert_eq!(
            parse_action(&json!({ "type": "type", "text": "hello" })).unwrap(),
            Action::Type { text: "hello".to_string() }
        );
        assert_eq!(
            parse_action(&json!({ "type": "key", "keys": ["cmd", "space"] })).unwrap(),
            Action::Key { combo: vec!["cmd".to_string(), "space".to_string()] }
        );
        assert_eq!(
            parse_action(&json!({ "type": "scroll", "direction": "down", "amount": 3 })).unwrap(),
            Action::Scroll { direction: ScrollDirection::Down, amount: 3 }
        );
        assert_eq!(
            parse_action(&json!({
                "type": "shell_op", "command": "ls", "args": ["-l"]
            }))
            .unwrap(),
            Action::ShellOp { command: "ls".to_string(), args: vec!["-l".to_string()] }
        );
    }

    #[test]
    fn test_parse_action_rejects_garbage() {
        // Unknown type.
        assert!(parse_action(&json!({ "type": "teleport" })).is_err());
        // Click with neither mark nor coordinates.
        assert!(parse_action(&json!({ "type": "click" })).is_err());
        // Empty key combo.
        assert!(parse_action(&json!({ "type": "key", "keys": [] })).is_err());
        // Non-object payload.
        assert!(parse_action(&json!("click")).is_err());
        // Non-string shell args.
        assert!(parse_action(&json!({
            "type": "shell_op", "command": "ls", "args": [1, 2]
        }))
        .is_err());
    }
}
