//! Response schemas and validation for the reasoning boundary.
//!
//! Every reasoning response is validated against its role's JSON Schema
//! before parsing. All violations are collected into one
//! `ReasoningMalformed` error so operators see the full failure set in one
//! pass, and an ambiguous payload never propagates downstream.

use serde_json::{json, Value};
use tracing::warn;

use ductor_contracts::error::{DuctorError, DuctorResult};

use crate::client::ReasoningRole;

/// The JSON Schema a role's response must satisfy.
pub fn response_schema(role: ReasoningRole) -> Value {
    match role {
        ReasoningRole::Planner => json!({
            "type": "object",
            "required": ["steps"],
            "properties": {
                "steps": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["intent", "completion"],
                        "properties": {
                            "intent": { "type": "string", "minLength": 1 },
                            "completion": { "type": "string" }
                        }
                    }
                }
            }
        }),
        ReasoningRole::Proposer => json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {
                    "type": "object",
                    "required": ["type"],
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": [
                                "click", "type", "key", "scroll", "browser_op",
                                "shell_op", "run_skill", "noop", "halt"
                            ]
                        }
                    }
                }
            }
        }),
        ReasoningRole::Reflector => json!({
            "type": "object",
            "required": ["step_complete", "progress", "reason"],
            "properties": {
                "step_complete": { "type": "boolean" },
                "progress": { "type": "string", "enum": ["progress", "no_progress"] },
                "request_replan": { "type": "boolean" },
                "reason": { "type": "string" }
            }
        }),
        ReasoningRole::Embedding => json!({
            "type": "object",
            "required": ["embedding"],
            "properties": {
                "embedding": {
                    "type": "array",
                    "minItems": 1,
                    "items": { "type": "number" }
                }
            }
        }),
    }
}

/// The schema for a reflector hint response (a separate prompt kind).
pub fn hint_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "hint": { "type": ["string", "null"] }
        }
    })
}

/// Validate `response` against `schema`.
///
/// Returns `ReasoningMalformed` listing every violation. A schema that
/// itself fails to compile is a `ConfigError` — the schemas ship with the
/// crate, so this only fires on a build defect.
pub fn validate_against(role: ReasoningRole, schema: &Value, response: &Value) -> DuctorResult<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| DuctorError::ConfigError {
        reason: format!("invalid response schema for role '{}': {}", role.as_str(), e),
    })?;

    let failures: Vec<String> = validator
        .iter_errors(response)
        .map(|error| format!("{} at {}", error, error.instance_path))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        let joined = failures.join("; ");
        warn!(role = role.as_str(), violations = %joined, "reasoning response failed schema validation");
        Err(DuctorError::ReasoningMalformed {
            reason: format!("{} response: {}", role.as_str(), joined),
        })
    }
}

/// Validate a response against its role's standard schema.
pub fn validate_response(role: ReasoningRole, response: &Value) -> DuctorResult<()> {
    validate_against(role, &response_schema(role), response)
}
