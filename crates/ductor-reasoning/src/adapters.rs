//! Typed adapters implementing the core reasoning traits over a
//! `ReasoningClient`.
//!
//! Each adapter builds a role prompt from runtime context, calls the
//! client, validates the response against the role's schema, and parses it
//! into the typed contract — mapping any mismatch to `ReasoningMalformed`
//! at this boundary rather than letting a loose payload travel further.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use ductor_contracts::{
    action::{Action, ClickTarget, ProposedAction, Provenance, ScrollDirection},
    context::{MemoryContext, ProposalContext, ReflectionRequest},
    error::{DuctorError, DuctorResult},
    plan::Plan,
    reflection::{ProgressSignal, ReflectionVerdict},
    target::Target,
};
use ductor_core::traits::{Embedder, Planner, Proposer, Reflector};

use crate::client::{ReasoningClient, ReasoningRole};
use crate::schema::{hint_schema, validate_against, validate_response};

// ── Payload parsing ───────────────────────────────────────────────────────────

fn malformed(reason: impl Into<String>) -> DuctorError {
    DuctorError::ReasoningMalformed { reason: reason.into() }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> DuctorResult<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| malformed(format!("missing or non-string field '{key}'")))
}

fn i64_field(obj: &Map<String, Value>, key: &str) -> DuctorResult<i64> {
    obj.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| malformed(format!("missing or non-integer field '{key}'")))
}

/// Parse a loosely-typed tool-call payload into the tagged `Action`.
///
/// This is the only place reasoning output becomes an action; anything the
/// vocabulary does not cover fails here with `ReasoningMalformed`.
pub fn parse_action(payload: &Value) -> DuctorResult<Action> {
    let obj = payload
        .as_object()
        .ok_or_else(|| malformed("action payload is not an object"))?;
    let kind = str_field(obj, "type")?;

    let action = match kind.as_str() {
        "click" => {
            if let Some(mark) = obj.get("mark").and_then(|v| v.as_u64()) {
                Action::Click { target: ClickTarget::Mark { mark: mark as u32 } }
            } else {
                let x = i64_field(obj, "x")? as i32;
                let y = i64_field(obj, "y")? as i32;
                Action::Click { target: ClickTarget::Coordinate { x, y } }
            }
        }
        "type" => Action::Type { text: str_field(obj, "text")? },
        "key" => {
            let keys = obj
                .get("keys")
                .or_else(|| obj.get("combo"))
                .and_then(|v| v.as_array())
                .ok_or_else(|| malformed("key action needs a 'keys' array"))?;
            let combo = keys
                .iter()
                .map(|k| {
                    k.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| malformed("key combo entries must be strings"))
                })
                .collect::<DuctorResult<Vec<_>>>()?;
            if combo.is_empty() {
                return Err(malformed("key combo cannot be empty"));
            }
            Action::Key { combo }
        }
        "scroll" => {
            let direction = match str_field(obj, "direction")?.as_str() {
                "up" => ScrollDirection::Up,
                "down" => ScrollDirection::Down,
                "left" => ScrollDirection::Left,
                "right" => ScrollDirection::Right,
                other => return Err(malformed(format!("unknown scroll direction '{other}'"))),
            };
            let amount = i64_field(obj, "amount")? as i32;
            Action::Scroll { direction, amount }
        }
        "browser_op" => Action::BrowserOp {
            kind: str_field(obj, "kind")?,
            args: obj.get("args").cloned().unwrap_or(Value::Null),
        },
        "shell_op" => {
            let args = match obj.get("args") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|a| {
                        a.as_str()
                            .map(|s| s.to_string())
                            .ok_or_else(|| malformed("shell args must be strings"))
                    })
                    .collect::<DuctorResult<Vec<_>>>()?,
                Some(_) => return Err(malformed("shell args must be an array")),
            };
            Action::ShellOp { command: str_field(obj, "command")?, args }
        }
        "run_skill" => Action::RunSkill {
            name: str_field(obj, "name")?,
            args: obj.get("args").cloned().unwrap_or(Value::Null),
        },
        "noop" => Action::Noop {
            reason: str_field(obj, "reason").unwrap_or_else(|_| "unspecified".to_string()),
        },
        "halt" => Action::Halt {
            reason: str_field(obj, "reason").unwrap_or_else(|_| "unspecified".to_string()),
        },
        other => return Err(malformed(format!("unknown action type '{other}'"))),
    };
    Ok(action)
}

/// Parse a validated planner response into a `Plan`.
fn parse_plan(goal: &str, response: &Value) -> DuctorResult<Plan> {
    let steps = response
        .get("steps")
        .and_then(|v| v.as_array())
        .ok_or_else(|| malformed("planner response has no 'steps' array"))?;

    let mut parsed = Vec::with_capacity(steps.len());
    for step in steps {
        let obj = step
            .as_object()
            .ok_or_else(|| malformed("plan step is not an object"))?;
        parsed.push((str_field(obj, "intent")?, str_field(obj, "completion")?));
    }
    Ok(Plan::new(goal, parsed))
}

fn targets_payload(targets: &[Target]) -> Value {
    Value::Array(
        targets
            .iter()
            .map(|t| {
                json!({
                    "mark": t.mark,
                    "role": t.role,
                    "text": t.text,
                    "bounds": t.bounds,
                })
            })
            .collect(),
    )
}

// ── Planner adapter ───────────────────────────────────────────────────────────

/// `Planner` over a `ReasoningClient`.
pub struct SchemaPlanner {
    client: Arc<dyn ReasoningClient>,
}

impl SchemaPlanner {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

impl Planner for SchemaPlanner {
    fn make_plan(&self, goal: &str, memory: &MemoryContext) -> DuctorResult<Plan> {
        let prompt = json!({
            "kind": "make_plan",
            "goal": goal,
            "prior_episodes": memory.episode_digests,
            "notes": memory.notes,
            "skills": memory.skills,
        });
        let response = self.client.request(ReasoningRole::Planner, &prompt)?;
        validate_response(ReasoningRole::Planner, &response)?;
        let plan = parse_plan(goal, &response)?;
        debug!(steps = plan.steps.len(), "plan parsed");
        Ok(plan)
    }

    fn revise_plan(&self, plan: &Plan, history: &[String]) -> DuctorResult<Plan> {
        let prompt = json!({
            "kind": "revise_plan",
            "goal": plan.goal,
            "current_plan": plan.steps.iter().map(|s| {
                json!({ "intent": s.intent, "completion": s.completion, "status": s.status })
            }).collect::<Vec<_>>(),
            "history": history,
        });
        let response = self.client.request(ReasoningRole::Planner, &prompt)?;
        validate_response(ReasoningRole::Planner, &response)?;
        parse_plan(&plan.goal, &response)
    }
}

// ── Proposer adapter ──────────────────────────────────────────────────────────

/// `Proposer` over a `ReasoningClient`.
pub struct SchemaProposer {
    client: Arc<dyn ReasoningClient>,
}

impl SchemaProposer {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

impl Proposer for SchemaProposer {
    fn propose(&self, ctx: &ProposalContext) -> DuctorResult<ProposedAction> {
        let prompt = json!({
            "kind": "propose_action",
            "goal": ctx.goal,
            "current_step": ctx.current_step.as_ref().map(|s| {
                json!({ "intent": s.intent, "completion": s.completion })
            }),
            "targets": targets_payload(&ctx.targets),
            "history": ctx.recent_history,
            "notes": ctx.memory.notes,
            "skills": ctx.memory.skills,
            "repeat": ctx.repeat,
            "block_reasons": ctx.block_reasons,
            "attempt_failures": ctx.attempt_failures,
        });
        let call_id = uuid::Uuid::new_v4();
        let response = self.client.request(ReasoningRole::Proposer, &prompt)?;
        validate_response(ReasoningRole::Proposer, &response)?;
        let action = parse_action(
            response
                .get("action")
                .ok_or_else(|| malformed("proposer response has no 'action'"))?,
        )?;
        Ok(ProposedAction {
            action,
            provenance: Provenance {
                proposer_call: call_id,
                grounding_generation: ctx.generation,
            },
        })
    }
}

// ── Reflector adapter ─────────────────────────────────────────────────────────

/// `Reflector` over a `ReasoningClient`.
pub struct SchemaReflector {
    client: Arc<dyn ReasoningClient>,
}

impl SchemaReflector {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

impl Reflector for SchemaReflector {
    fn reflect(&self, request: &ReflectionRequest) -> DuctorResult<ReflectionVerdict> {
        let prompt = json!({
            "kind": "evaluate_step",
            "goal": request.goal,
            "step": request.step.as_ref().map(|s| {
                json!({ "intent": s.intent, "completion": s.completion })
            }),
            "action": request.action,
            "result": request.result,
            "changed": request.changed,
            "magnitude": request.magnitude,
            "history": request.recent_history,
        });
        let response = self.client.request(ReasoningRole::Reflector, &prompt)?;
        validate_response(ReasoningRole::Reflector, &response)?;

        let progress = match response.get("progress").and_then(|v| v.as_str()) {
            Some("progress") => ProgressSignal::Progress,
            _ => ProgressSignal::NoProgress,
        };
        Ok(ReflectionVerdict {
            step_complete: response
                .get("step_complete")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            progress,
            request_replan: response
                .get("request_replan")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            reason: response
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn suggest_hint(&self, ctx: &ProposalContext) -> DuctorResult<Option<String>> {
        let prompt = json!({
            "kind": "hint",
            "goal": ctx.goal,
            "current_step": ctx.current_step.as_ref().map(|s| json!({ "intent": s.intent })),
            "history": ctx.recent_history,
            "repeat": ctx.repeat,
        });
        let response = self.client.request(ReasoningRole::Reflector, &prompt)?;
        validate_against(ReasoningRole::Reflector, &hint_schema(), &response)?;
        Ok(response
            .get("hint")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}

// ── Embedder adapter ──────────────────────────────────────────────────────────

/// `Embedder` over a `ReasoningClient`.
pub struct SchemaEmbedder {
    client: Arc<dyn ReasoningClient>,
}

impl SchemaEmbedder {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self { client }
    }
}

impl Embedder for SchemaEmbedder {
    fn embed(&self, text: &str) -> DuctorResult<Vec<f32>> {
        let prompt = json!({ "kind": "embed", "text": text });
        let response = self.client.request(ReasoningRole::Embedding, &prompt)?;
        validate_response(ReasoningRole::Embedding, &response)?;
        Ok(response
            .get("embedding")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|f| f as f32)
                    .collect()
            })
            .unwrap_or_default())
    }
}
