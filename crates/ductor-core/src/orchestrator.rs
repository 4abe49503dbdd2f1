//! The orchestrator: the policy-bound perception/action loop.
//!
//! One episode walks the state machine
//!
//!   Idle → Planning → Perceiving → Proposing → Gating → Acting →
//!   Verifying → Reflecting → {Perceiving | Replanning | Halted}
//!
//! The security invariant is absolute: `Capability::execute()` is NEVER
//! called unless the policy gate returned `Allow` — directly, or through
//! operator approval of a `RequireHuman` verdict. This is enforced
//! structurally; the only call site for `execute()` sits behind the gate.
//!
//! Every step — executed, blocked, or locally refused — commits exactly one
//! `StepRecord` to the episode sink before the loop moves on. Every
//! termination path finalizes the episode with its outcome; fatal errors
//! land in the episode's `failure` field rather than disappearing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use ductor_contracts::{
    action::{Action, ActionResult, ClickTarget, ProposedAction},
    context::{MemoryContext, ProposalContext, ReflectionRequest, RepeatInfo},
    episode::{Episode, EpisodeSummary, Outcome, StepRecord},
    error::{DuctorError, DuctorResult},
    frame::Frame,
    gate::{GateContext, GateVerdict, OperatorDecision},
    plan::Plan,
    reflection::{ProgressSignal, ReflectionVerdict},
    target::{Grounded, Rect},
};
use ductor_perception::{ChangeDetector, FrameStore, GroundingEngine};

use crate::stagnation::{StagnationDetector, StagnationState, StepSignal};
use crate::traits::{Capability, EpisodeSink, Operator, Planner, PolicyGate, Proposer, Reflector};

/// How many history lines the reasoning services see per call.
const HISTORY_TAIL: usize = 20;

/// Loop limits and thresholds. Loaded once per process; immutable during
/// an episode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Hard cap on committed steps per episode.
    pub max_steps: u64,
    /// Consecutive action failures that halt the episode.
    pub max_failures: u32,
    /// Optional wall-clock budget for one episode.
    pub max_wall_clock_ms: Option<u64>,
    /// Delay between acting and the verification recapture.
    pub settle_delay_ms: u64,
    /// Local retries for a malformed or timed-out proposer response.
    pub propose_retries: u32,
    /// Re-proposals allowed after policy blocks within one step.
    pub blocked_retries: u32,
    /// Attempts on one plan step before a replan is forced.
    pub step_attempts: u32,
    /// Stagnation window length (k).
    pub stagnation_window: usize,
    /// Consecutive stalls that escalate to Stagnant (m).
    pub stall_limit: u32,
    /// Times one hotkey combo may execute per episode.
    pub hotkey_repeat_limit: u32,
    /// Change-detector thresholds.
    pub hash_threshold: u32,
    pub similarity_threshold: f64,
    pub trivial_magnitude: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_failures: 5,
            max_wall_clock_ms: None,
            settle_delay_ms: 800,
            propose_retries: 2,
            blocked_retries: 3,
            step_attempts: 4,
            stagnation_window: 8,
            stall_limit: 3,
            hotkey_repeat_limit: 2,
            hash_threshold: 5,
            similarity_threshold: 0.985,
            trivial_magnitude: 0.02,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML limits document. Unknown keys are rejected so typos
    /// surface at startup rather than silently using defaults.
    pub fn from_toml_str(s: &str) -> DuctorResult<Self> {
        toml::from_str(s).map_err(|e| DuctorError::ConfigError {
            reason: format!("failed to parse orchestrator config TOML: {}", e),
        })
    }
}

/// What the gating phase decided for one step.
enum Gated {
    /// An action cleared the gate (possibly via operator approval).
    Cleared {
        proposed: ProposedAction,
        verdict: GateVerdict,
        bounds: Option<Rect>,
    },
    /// The proposer answered with a terminal noop/halt during re-proposal.
    Terminal(ProposedAction),
    /// Retries exhausted or the proposer failed; counts as a step failure.
    GaveUp(String),
}

/// The central loop driver. Owns the trusted components and the capability
/// for the duration of a process; episodes run strictly sequentially.
pub struct Orchestrator {
    capability: Box<dyn Capability>,
    planner: Box<dyn Planner>,
    proposer: Box<dyn Proposer>,
    reflector: Box<dyn Reflector>,
    gate: Box<dyn PolicyGate>,
    sink: Box<dyn EpisodeSink>,
    operator: Box<dyn Operator>,
    config: OrchestratorConfig,
    /// Set externally to request cancellation; observed between phases,
    /// never mid-action.
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capability: Box<dyn Capability>,
        planner: Box<dyn Planner>,
        proposer: Box<dyn Proposer>,
        reflector: Box<dyn Reflector>,
        gate: Box<dyn PolicyGate>,
        sink: Box<dyn EpisodeSink>,
        operator: Box<dyn Operator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            capability,
            planner,
            proposer,
            reflector,
            gate,
            sink,
            operator,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the hosting application can use to request cancellation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Drive one episode toward `goal`.
    ///
    /// Returns the finalized episode on every terminal path, including
    /// fatal ones (`PlanningFailed`, `Unrecoverable`), which set outcome
    /// `Failed` and the `failure` field. `Err` is reserved for
    /// infrastructure failures — a sink that cannot persist records.
    pub fn run_episode(&mut self, goal: &str, memory: &MemoryContext) -> DuctorResult<Episode> {
        let started = Instant::now();
        let mut episode = Episode::new(goal);
        self.sink.open(episode.id, goal)?;
        self.cancel.store(false, Ordering::SeqCst);

        info!(episode_id = %episode.id, goal, "episode starting");

        // ── Health gate ──────────────────────────────────────────────────────
        //
        // HID and semantic actions are refused while the capability reports
        // not-ok (e.g. missing OS permissions).
        let health = self.capability.health_check();
        if !health.ok {
            let reason = format!("capability not ready: {}", health.reasons.join("; "));
            return self.finish(episode, started, Outcome::Failed, Some(reason), vec![], 0, 0);
        }

        // ── Planning ─────────────────────────────────────────────────────────
        let mut plan = match self.planner.make_plan(goal, memory) {
            Ok(p) if p.steps.is_empty() => {
                let reason = DuctorError::PlanningFailed {
                    reason: "planner returned an empty plan".to_string(),
                }
                .to_string();
                return self.finish(episode, started, Outcome::Failed, Some(reason), vec![], 0, 0);
            }
            Ok(p) => p,
            Err(e) => {
                let reason = DuctorError::PlanningFailed { reason: e.to_string() }.to_string();
                return self.finish(episode, started, Outcome::Failed, Some(reason), vec![], 0, 0);
            }
        };
        info!(episode_id = %episode.id, steps = plan.steps.len(), "plan created");

        // ── Per-episode loop state ───────────────────────────────────────────
        let mut frames = FrameStore::new();
        let mut grounding = GroundingEngine::new();
        let change = ChangeDetector {
            hash_threshold: self.config.hash_threshold,
            similarity_threshold: self.config.similarity_threshold,
            trivial_magnitude: self.config.trivial_magnitude,
        };
        let mut stagnation = StagnationDetector::new(
            self.config.stagnation_window,
            self.config.stall_limit,
            self.config.trivial_magnitude,
        );

        let mut history: Vec<String> = vec![format!("goal:{goal}")];
        let mut hotkey_counts: HashMap<Vec<String>, u32> = HashMap::new();
        let mut stuck_reasons: Vec<String> = Vec::new();
        let mut step: u64 = 0;
        let mut total_failures: u32 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut replans: u32 = 0;
        let mut equivalent_replans: u32 = 0;
        let mut step_attempts_used: u32 = 0;
        let mut last_signature: Option<String> = None;
        let mut repeat_count: u32 = 0;
        let mut repeat_info: Option<RepeatInfo> = None;
        let mut hint_injected = false;

        let (outcome, failure) = 'episode: loop {
            // ── Between-phase checks ─────────────────────────────────────────
            if self.cancel.load(Ordering::SeqCst) {
                stuck_reasons.push("cancelled".to_string());
                break (Outcome::HaltedByUser, None);
            }
            if step >= self.config.max_steps {
                stuck_reasons.push("max_steps".to_string());
                break (Outcome::HaltedByLimit, None);
            }
            if let Some(budget) = self.config.max_wall_clock_ms {
                if started.elapsed() >= Duration::from_millis(budget) {
                    stuck_reasons.push("wall_clock".to_string());
                    break (Outcome::HaltedByLimit, None);
                }
            }

            // ── Perceiving ───────────────────────────────────────────────────
            let frame = match self.capability.capture() {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "capture failed");
                    history.push(format!("capture_failed:{e}"));
                    total_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_failures {
                        stuck_reasons.push("max_failures".to_string());
                        break (Outcome::HaltedByLimit, None);
                    }
                    continue;
                }
            };
            let pre = frame.clone();
            frames.push(frame);

            let tree = match self.capability.query_tree() {
                Ok(t) => t,
                Err(e) => {
                    // A missing tree is not fatal — grounding falls back to
                    // pixels.
                    warn!(error = %e, "element tree query failed; using visual fallback");
                    None
                }
            };

            let grounded = match grounding.ground(&pre, tree.as_ref()) {
                Ok(g) => g,
                Err(e) => {
                    warn!(error = %e, "grounding failed");
                    history.push(format!("grounding_failed:{e}"));
                    total_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_failures {
                        stuck_reasons.push("max_failures".to_string());
                        break (Outcome::HaltedByLimit, None);
                    }
                    continue;
                }
            };

            if let Some(prev) = frames.previous() {
                let report = change.compare(prev, &pre);
                history.push(format!(
                    "observation:changed={} magnitude={:.3}",
                    report.changed, report.magnitude
                ));
            } else {
                history.push("observation:initial".to_string());
            }

            // ── Proposing ────────────────────────────────────────────────────
            let mut ctx = ProposalContext {
                goal: goal.to_string(),
                current_step: plan.current_step().cloned(),
                generation: grounded.generation,
                targets: grounded.targets.clone(),
                recent_history: tail(&history, HISTORY_TAIL),
                memory: memory.clone(),
                repeat: repeat_info.clone(),
                block_reasons: Vec::new(),
                attempt_failures: Vec::new(),
            };

            let proposed = match self.propose_with_retry(&mut ctx) {
                Ok(p) => p,
                Err(e) => {
                    history.push(format!("proposing_failed:{e}"));
                    total_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_failures {
                        stuck_reasons.push("max_failures".to_string());
                        break (Outcome::HaltedByLimit, None);
                    }
                    continue;
                }
            };

            if proposed.action.is_terminal() {
                let record = terminal_record(step, &plan, &pre, &grounded, proposed.clone());
                self.commit_step(&mut episode, &mut step, record)?;
                break 'episode terminal_outcome(&proposed.action, &plan);
            }

            // ── Hotkey dedup (local refusal, gate never consulted) ───────────
            if let Action::Key { combo } = &proposed.action {
                let key = normalized_combo(combo);
                let count = hotkey_counts.entry(key).or_insert(0);
                if *count >= self.config.hotkey_repeat_limit {
                    info!(combo = ?combo, "hotkey deduplicated");
                    let mut record =
                        terminal_record(step, &plan, &pre, &grounded, proposed.clone());
                    record.result = Some(ActionResult::failed("hotkey deduplicated"));
                    self.commit_step(&mut episode, &mut step, record)?;
                    // A local refusal is not an action failure; surface it
                    // to the proposer as repeat context instead.
                    repeat_count += 1;
                    repeat_info = Some(RepeatInfo {
                        count: repeat_count,
                        action_signature: proposed.action.signature(),
                        hint: None,
                    });
                    continue;
                }
                *count += 1;
            }

            // ── Gating ───────────────────────────────────────────────────────
            let (proposed, gate_verdict, target_bounds) = match self.gate_with_reproposals(
                &mut episode,
                &mut step,
                &mut ctx,
                &plan,
                &pre,
                &grounded,
                proposed,
                &mut history,
            )? {
                Gated::Cleared { proposed, verdict, bounds } => (proposed, verdict, bounds),
                Gated::Terminal(p) => {
                    let record = terminal_record(step, &plan, &pre, &grounded, p.clone());
                    self.commit_step(&mut episode, &mut step, record)?;
                    break 'episode terminal_outcome(&p.action, &plan);
                }
                Gated::GaveUp(reason) => {
                    history.push(format!("gating_exhausted:{reason}"));
                    total_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_failures {
                        stuck_reasons.push("max_failures".to_string());
                        break (Outcome::HaltedByLimit, None);
                    }
                    continue;
                }
            };
            // Marks are an orchestrator-level addressing scheme; the
            // capability only understands coordinates. Resolve here, using
            // the bounds the gate already vetted.
            let exec_action = match (&proposed.action, target_bounds) {
                (Action::Click { target: ClickTarget::Mark { .. } }, Some(bounds)) => {
                    let (x, y) = bounds.center();
                    Action::Click { target: ClickTarget::Coordinate { x, y } }
                }
                _ => proposed.action.clone(),
            };

            // ── Acting ───────────────────────────────────────────────────────
            //
            // The only call site for execute(), reachable exclusively with a
            // cleared gate verdict. A capability failure is recorded, never
            // fatal — the loop still verifies real-world state afterwards.
            let result = match self.capability.execute(&exec_action) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "capability execute failed");
                    ActionResult::failed(e.to_string())
                }
            };
            history.push(format!(
                "action:{}:{}",
                proposed.action.kind(),
                if result.success { "ok" } else { "failed" }
            ));
            if result.success {
                consecutive_failures = 0;
            } else {
                total_failures += 1;
                consecutive_failures += 1;
            }

            // ── Verifying ────────────────────────────────────────────────────
            if self.config.settle_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
            }
            let (post, report) = match self.capability.capture() {
                Ok(f) => {
                    let report = change.compare(&pre, &f);
                    frames.push(f);
                    (frames.current().map(|f| f.reference()), Some(report))
                }
                Err(e) => {
                    warn!(error = %e, "verification capture failed");
                    history.push(format!("verify_capture_failed:{e}"));
                    (None, None)
                }
            };
            let changed = report.map(|r| r.changed).unwrap_or(false);
            let magnitude = report.map(|r| r.magnitude);

            // ── Reflecting ───────────────────────────────────────────────────
            let verdict = match post {
                Some(post_ref) => {
                    let request = ReflectionRequest {
                        goal: goal.to_string(),
                        step: plan.current_step().cloned(),
                        action: proposed.action.clone(),
                        result: result.clone(),
                        pre_frame: pre.reference(),
                        post_frame: post_ref,
                        changed,
                        magnitude: magnitude.unwrap_or(0.0),
                        recent_history: tail(&history, HISTORY_TAIL),
                    };
                    match self.reflector.reflect(&request) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(error = %e, "reflector unavailable; using heuristic verdict");
                            ReflectionVerdict::heuristic(result.success, changed)
                        }
                    }
                }
                None => ReflectionVerdict::heuristic(result.success, false),
            };

            // ── Commit the step record ───────────────────────────────────────
            let record = StepRecord {
                step,
                plan_step: plan.current_step().map(|s| s.index),
                pre_frame: pre.reference(),
                targets: grounded.targets.clone(),
                proposed: proposed.clone(),
                gate: Some(gate_verdict),
                result: Some(result.clone()),
                post_frame: post,
                magnitude,
                reflection: Some(verdict.clone()),
                timestamp: Utc::now(),
            };
            self.commit_step(&mut episode, &mut step, record)?;

            if consecutive_failures >= self.config.max_failures {
                stuck_reasons.push("max_failures".to_string());
                break (Outcome::HaltedByLimit, None);
            }

            // ── Plan bookkeeping ─────────────────────────────────────────────
            if verdict.step_complete && plan.current_step().is_some() {
                let finished = plan.current_step().map(|s| s.index);
                plan.advance();
                step_attempts_used = 0;
                history.push(format!("plan_step_completed:{:?}", finished));
                if plan.is_complete() {
                    info!(episode_id = %episode.id, "plan completed");
                    break (Outcome::Success, None);
                }
            } else {
                step_attempts_used += 1;
            }

            // ── Repeat bookkeeping for the next proposer call ────────────────
            let signature = proposed.action.signature();
            if last_signature.as_deref() == Some(signature.as_str()) {
                repeat_count += 1;
            } else {
                repeat_count = 0;
            }
            last_signature = Some(signature.clone());
            repeat_info = (repeat_count > 0).then(|| RepeatInfo {
                count: repeat_count,
                action_signature: signature.clone(),
                hint: None,
            });

            // ── Stagnation + replanning ──────────────────────────────────────
            let state = stagnation.observe(StepSignal {
                signature: signature.clone(),
                magnitude: magnitude.unwrap_or(0.0),
                progressed: verdict.progress == ProgressSignal::Progress,
            });

            let mut need_replan = state == StagnationState::Stagnant
                || verdict.request_replan
                || step_attempts_used >= self.config.step_attempts;

            if state == StagnationState::Stagnant && !hint_injected {
                // One chance to unblock with a reflector hint before
                // spending a planner call.
                if let Ok(Some(hint)) = self.reflector.suggest_hint(&ctx) {
                    info!(hint = %hint, "injected reflector hint");
                    history.push(format!("reflector_hint:{hint}"));
                    repeat_info = Some(RepeatInfo {
                        count: repeat_count,
                        action_signature: signature.clone(),
                        hint: Some(hint),
                    });
                    hint_injected = true;
                    stagnation.notify_replanned();
                    need_replan = false;
                }
            }

            if need_replan {
                let why = if state == StagnationState::Stagnant {
                    "stagnant"
                } else if verdict.request_replan {
                    "reflector_requested"
                } else {
                    "step_attempts_exhausted"
                };
                stuck_reasons.push(why.to_string());
                history.push(format!("replanning:{why}"));
                replans += 1;

                let new_plan = match self.planner.revise_plan(&plan, &history) {
                    Ok(p) if !p.steps.is_empty() => p,
                    Ok(_) => {
                        let reason = DuctorError::PlanningFailed {
                            reason: "replanner returned an empty plan".to_string(),
                        }
                        .to_string();
                        episode.plan = Some(plan);
                        return self.finish(
                            episode,
                            started,
                            Outcome::Failed,
                            Some(reason),
                            stuck_reasons,
                            total_failures,
                            replans,
                        );
                    }
                    Err(e) => {
                        let reason =
                            DuctorError::PlanningFailed { reason: e.to_string() }.to_string();
                        episode.plan = Some(plan);
                        return self.finish(
                            episode,
                            started,
                            Outcome::Failed,
                            Some(reason),
                            stuck_reasons,
                            total_failures,
                            replans,
                        );
                    }
                };

                if new_plan.is_equivalent(&plan) {
                    equivalent_replans += 1;
                    if equivalent_replans >= 2 {
                        let reason = DuctorError::Unrecoverable {
                            reason: "planner returned an equivalent plan twice in a row"
                                .to_string(),
                        }
                        .to_string();
                        break (Outcome::Failed, Some(reason));
                    }
                } else {
                    equivalent_replans = 0;
                }

                info!(
                    episode_id = %episode.id,
                    steps = new_plan.steps.len(),
                    "plan revised"
                );
                plan.abandon_remaining();
                plan = new_plan;
                step_attempts_used = 0;
                stagnation.notify_replanned();
            }
        };

        episode.plan = Some(plan);
        self.finish(episode, started, outcome, failure, stuck_reasons, total_failures, replans)
    }

    // ── Phase helpers ─────────────────────────────────────────────────────────

    /// Call the proposer, retrying malformed/timed-out responses up to the
    /// configured bound with each failure appended to the context.
    fn propose_with_retry(&mut self, ctx: &mut ProposalContext) -> DuctorResult<ProposedAction> {
        let mut attempts: u32 = 0;
        loop {
            match self.proposer.propose(ctx) {
                Ok(p) => return Ok(p),
                Err(e @ (DuctorError::ReasoningMalformed { .. } | DuctorError::Timeout { .. }))
                    if attempts < self.config.propose_retries =>
                {
                    attempts += 1;
                    warn!(error = %e, attempt = attempts, "proposer retry");
                    ctx.attempt_failures.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the gate, re-proposing on blocks (bounded) and consulting the
    /// operator on `RequireHuman`. Every rejection commits its own record.
    #[allow(clippy::too_many_arguments)]
    fn gate_with_reproposals(
        &mut self,
        episode: &mut Episode,
        step: &mut u64,
        ctx: &mut ProposalContext,
        plan: &Plan,
        pre: &Frame,
        grounded: &Grounded,
        mut proposed: ProposedAction,
        history: &mut Vec<String>,
    ) -> DuctorResult<Gated> {
        let mut rejections: u32 = 0;
        loop {
            // Resolve the target bounds when the action addresses a mark.
            // A mark from another generation is a stale reference and must
            // fail here, never re-resolve.
            let bounds = match &proposed.action {
                Action::Click { target: ClickTarget::Mark { mark } } => {
                    match grounded.resolve(*mark, proposed.provenance.grounding_generation) {
                        Some(t) => Some(t.bounds),
                        None => {
                            let reason = format!(
                                "mark {} does not resolve in generation {}",
                                mark, grounded.generation
                            );
                            let mut record =
                                terminal_record(*step, plan, pre, grounded, proposed.clone());
                            record.result = Some(ActionResult::failed(&reason));
                            self.commit_step(episode, step, record)?;
                            return Ok(Gated::GaveUp(reason));
                        }
                    }
                }
                _ => None,
            };

            let gate_ctx = GateContext { target_bounds: bounds };
            let verdict = self.gate.evaluate(&proposed.action, &gate_ctx)?;

            let rejection_reason = match verdict {
                GateVerdict::Allow => {
                    return Ok(Gated::Cleared { proposed, verdict: GateVerdict::Allow, bounds });
                }
                GateVerdict::RequireHuman { ref reason } => {
                    // Suspend on the operator; never a silent skip.
                    info!(reason = %reason, "awaiting operator decision");
                    match self.operator.resolve(&proposed.action, reason)? {
                        OperatorDecision::Approve => {
                            history.push(format!("operator_approved:{reason}"));
                            return Ok(Gated::Cleared { proposed, verdict, bounds });
                        }
                        OperatorDecision::Deny { reason: denial } => {
                            format!("operator denied: {denial}")
                        }
                    }
                }
                GateVerdict::Block { ref reason } => reason.clone(),
            };

            // Record the rejection; blocked actions never reach the
            // capability and are never retried verbatim.
            warn!(reason = %rejection_reason, "action rejected by gate");
            history.push(format!("policy_blocked:{rejection_reason}"));
            let mut record = terminal_record(*step, plan, pre, grounded, proposed.clone());
            record.gate = Some(GateVerdict::Block { reason: rejection_reason.clone() });
            self.commit_step(episode, step, record)?;

            rejections += 1;
            if rejections > self.config.blocked_retries {
                return Ok(Gated::GaveUp(format!(
                    "{} proposals rejected in one step",
                    rejections
                )));
            }

            // Re-ask the proposer with the rejection reason in context.
            ctx.block_reasons.push(rejection_reason);
            proposed = match self.propose_with_retry(ctx) {
                Ok(p) => p,
                Err(e) => return Ok(Gated::GaveUp(e.to_string())),
            };
            if proposed.action.is_terminal() {
                return Ok(Gated::Terminal(proposed));
            }
        }
    }

    /// Append one record to the sink and the in-memory episode, advancing
    /// the step counter. A sink failure is fatal to the episode.
    fn commit_step(
        &self,
        episode: &mut Episode,
        step: &mut u64,
        record: StepRecord,
    ) -> DuctorResult<()> {
        self.sink.append(episode.id, &record)?;
        episode.steps.push(record);
        *step += 1;
        Ok(())
    }

    /// Seal the episode on any terminal path and persist the outcome.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        mut episode: Episode,
        started: Instant,
        outcome: Outcome,
        failure: Option<String>,
        stuck_reasons: Vec<String>,
        total_failures: u32,
        replans: u32,
    ) -> DuctorResult<Episode> {
        let summary = EpisodeSummary {
            steps: episode.steps.len() as u64,
            failures: total_failures,
            runtime_ms: started.elapsed().as_millis() as u64,
            stuck_reasons,
            replans,
        };
        episode.outcome = Some(outcome);
        episode.failure = failure;
        episode.summary = Some(summary.clone());

        self.sink.finalize(episode.id, outcome, &summary)?;
        info!(
            episode_id = %episode.id,
            ?outcome,
            steps = summary.steps,
            failures = summary.failures,
            "episode finished"
        );
        Ok(episode)
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

fn tail(history: &[String], n: usize) -> Vec<String> {
    history.iter().rev().take(n).rev().cloned().collect()
}

fn normalized_combo(combo: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = combo.iter().map(|k| k.to_lowercase()).collect();
    keys.sort();
    keys
}

/// A record skeleton for steps that never executed (terminal signals,
/// blocked proposals, local refusals).
fn terminal_record(
    step: u64,
    plan: &Plan,
    pre: &Frame,
    grounded: &Grounded,
    proposed: ProposedAction,
) -> StepRecord {
    StepRecord {
        step,
        plan_step: plan.current_step().map(|s| s.index),
        pre_frame: pre.reference(),
        targets: grounded.targets.clone(),
        proposed,
        gate: None,
        result: None,
        post_frame: None,
        magnitude: None,
        reflection: None,
        timestamp: Utc::now(),
    }
}

/// Outcome for a proposer noop/halt: success only when the plan finished.
fn terminal_outcome(action: &Action, plan: &Plan) -> (Outcome, Option<String>) {
    let reason = match action {
        Action::Noop { reason } | Action::Halt { reason } => reason.clone(),
        _ => String::new(),
    };
    if plan.is_complete() {
        (Outcome::Success, None)
    } else {
        (
            Outcome::Failed,
            Some(format!("proposer halted before plan completion: {reason}")),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ductor_contracts::{
        action::{Action, ActionResult, ClickTarget, ProposedAction, Provenance},
        capability::Health,
        context::{MemoryContext, ProposalContext, ReflectionRequest},
        episode::{EpisodeId, EpisodeSummary, Outcome, StepRecord},
        error::{DuctorError, DuctorResult},
        frame::Frame,
        gate::{GateContext, GateVerdict, OperatorDecision},
        plan::Plan,
        reflection::{ProgressSignal, ReflectionVerdict},
        target::{ElementNode, ElementTree, Rect},
    };

    use crate::traits::{
        Capability, EpisodeSink, Operator, Planner, PolicyGate, Proposer, Reflector,
    };

    use super::{Orchestrator, OrchestratorConfig};

    // ── Mock capability ──────────────────────────────────────────────────────

    #[derive(Default)]
    struct CapabilityCounters {
        captures: u32,
        executes: u32,
    }

    /// A scripted screen: every successful execute brightens the frame so
    /// the change detector sees a real change (unless frozen).
    struct ScriptedCapability {
        counters: Arc<Mutex<CapabilityCounters>>,
        healthy: bool,
        /// When true, the screen never changes regardless of actions.
        frozen: bool,
        /// When true, every execute fails with a capability error.
        failing: bool,
        level: u8,
    }

    impl ScriptedCapability {
        fn new() -> Self {
            Self {
                counters: Arc::new(Mutex::new(CapabilityCounters::default())),
                healthy: true,
                frozen: false,
                failing: false,
                level: 40,
            }
        }

        fn frozen() -> Self {
            Self { frozen: true, ..Self::new() }
        }

        fn failing() -> Self {
            Self { failing: true, ..Self::new() }
        }

        fn unhealthy() -> Self {
            Self { healthy: false, ..Self::new() }
        }

        fn counters(&self) -> Arc<Mutex<CapabilityCounters>> {
            self.counters.clone()
        }
    }

    impl Capability for ScriptedCapability {
        fn capture(&mut self) -> DuctorResult<Frame> {
            self.counters.lock().unwrap().captures += 1;
            // Half the frame carries the level so changes flip hash bits.
            let mut luma = vec![10u8; 64 * 64];
            for row in luma.chunks_mut(64).take(32) {
                row.fill(self.level);
            }
            Ok(Frame::from_luma(64, 64, 1.0, luma))
        }

        fn query_tree(&mut self) -> DuctorResult<Option<ElementTree>> {
            let node = |x: i32, y: i32| ElementNode {
                role: "Button".to_string(),
                title: Some("button".to_string()),
                value: None,
                bounds: Rect::new(x, y, 20, 10),
                enabled: true,
                in_viewport: true,
                z_order: None,
            };
            Ok(Some(ElementTree { nodes: vec![node(4, 4), node(30, 4), node(4, 30)] }))
        }

        fn execute(&mut self, _action: &Action) -> DuctorResult<ActionResult> {
            self.counters.lock().unwrap().executes += 1;
            if self.failing {
                return Err(DuctorError::CapabilityFailure {
                    operation: "execute".to_string(),
                    reason: "input injection refused".to_string(),
                });
            }
            if !self.frozen {
                self.level = self.level.wrapping_add(60);
            }
            Ok(ActionResult::ok())
        }

        fn health_check(&self) -> Health {
            if self.healthy {
                Health::ok()
            } else {
                Health::not_ok(vec!["screen recording permission missing".to_string()])
            }
        }
    }

    // ── Mock reasoning ───────────────────────────────────────────────────────

    struct FixedPlanner {
        steps: Vec<&'static str>,
        /// Intents returned by revise_plan; cycles when exhausted.
        revisions: Vec<Vec<&'static str>>,
        revise_calls: Arc<Mutex<u32>>,
    }

    impl FixedPlanner {
        fn single_step() -> Self {
            Self {
                steps: vec!["do the thing"],
                revisions: vec![vec!["do the thing differently"]],
                revise_calls: Arc::new(Mutex::new(0)),
            }
        }

        fn two_step() -> Self {
            Self {
                steps: vec!["open the menu", "click settings"],
                revisions: vec![vec!["try another path"]],
                revise_calls: Arc::new(Mutex::new(0)),
            }
        }

        /// A planner that always revises to an equivalent plan.
        fn stubborn() -> Self {
            Self {
                steps: vec!["do the thing"],
                revisions: vec![vec!["do the thing"]],
                revise_calls: Arc::new(Mutex::new(0)),
            }
        }

        fn revise_count(&self) -> Arc<Mutex<u32>> {
            self.revise_calls.clone()
        }
    }

    impl Planner for FixedPlanner {
        fn make_plan(&self, goal: &str, _memory: &MemoryContext) -> DuctorResult<Plan> {
            Ok(Plan::new(
                goal,
                self.steps.iter().map(|s| (s.to_string(), "visible".to_string())).collect(),
            ))
        }

        fn revise_plan(&self, plan: &Plan, _history: &[String]) -> DuctorResult<Plan> {
            let mut calls = self.revise_calls.lock().unwrap();
            let idx = (*calls as usize).min(self.revisions.len() - 1);
            *calls += 1;
            Ok(Plan::new(
                &plan.goal,
                self.revisions[idx]
                    .iter()
                    .map(|s| (s.to_string(), "visible".to_string()))
                    .collect(),
            ))
        }
    }

    /// A planner with no credential configured.
    struct UnconfiguredPlanner;

    impl Planner for UnconfiguredPlanner {
        fn make_plan(&self, _goal: &str, _memory: &MemoryContext) -> DuctorResult<Plan> {
            Err(DuctorError::ReasoningUnavailable {
                role: "planner".to_string(),
                reason: "no credential configured".to_string(),
            })
        }

        fn revise_plan(&self, _plan: &Plan, _history: &[String]) -> DuctorResult<Plan> {
            Err(DuctorError::ReasoningUnavailable {
                role: "planner".to_string(),
                reason: "no credential configured".to_string(),
            })
        }
    }

    /// Serves a scripted action sequence, then noop forever.
    struct SeqProposer {
        script: Vec<Action>,
        cursor: Arc<Mutex<usize>>,
        calls: Arc<Mutex<u32>>,
    }

    impl SeqProposer {
        fn new(script: Vec<Action>) -> Self {
            Self {
                script,
                cursor: Arc::new(Mutex::new(0)),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn call_count(&self) -> Arc<Mutex<u32>> {
            self.calls.clone()
        }
    }

    impl Proposer for SeqProposer {
        fn propose(&self, ctx: &ProposalContext) -> DuctorResult<ProposedAction> {
            *self.calls.lock().unwrap() += 1;
            let mut cursor = self.cursor.lock().unwrap();
            let action = self
                .script
                .get(*cursor)
                .cloned()
                .unwrap_or(Action::Noop { reason: "script exhausted".to_string() });
            *cursor += 1;
            Ok(ProposedAction {
                action,
                provenance: Provenance {
                    proposer_call: uuid::Uuid::new_v4(),
                    grounding_generation: ctx.generation,
                },
            })
        }
    }

    /// A reflector with a fixed verdict.
    struct FixedReflector {
        step_complete: bool,
        progress: ProgressSignal,
    }

    impl FixedReflector {
        fn completing() -> Self {
            Self { step_complete: true, progress: ProgressSignal::Progress }
        }

        fn stalled() -> Self {
            Self { step_complete: false, progress: ProgressSignal::NoProgress }
        }
    }

    impl Reflector for FixedReflector {
        fn reflect(&self, _request: &ReflectionRequest) -> DuctorResult<ReflectionVerdict> {
            Ok(ReflectionVerdict {
                step_complete: self.step_complete,
                progress: self.progress,
                request_replan: false,
                reason: "fixed".to_string(),
            })
        }
    }

    // ── Mock gate / operator / sink ──────────────────────────────────────────

    /// Allows everything except the configured kinds.
    struct KindGate {
        block_kinds: Vec<&'static str>,
        require_human_kinds: Vec<&'static str>,
    }

    impl KindGate {
        fn allow_all() -> Self {
            Self { block_kinds: vec![], require_human_kinds: vec![] }
        }
    }

    impl PolicyGate for KindGate {
        fn evaluate(&self, action: &Action, _ctx: &GateContext) -> DuctorResult<GateVerdict> {
            if self.block_kinds.contains(&action.kind()) {
                return Ok(GateVerdict::Block {
                    reason: format!("kind '{}' is blocked", action.kind()),
                });
            }
            if self.require_human_kinds.contains(&action.kind()) {
                return Ok(GateVerdict::RequireHuman {
                    reason: format!("kind '{}' needs sign-off", action.kind()),
                });
            }
            Ok(GateVerdict::Allow)
        }
    }

    struct FixedOperator {
        approve: bool,
    }

    impl Operator for FixedOperator {
        fn resolve(&self, _action: &Action, _reason: &str) -> DuctorResult<OperatorDecision> {
            if self.approve {
                Ok(OperatorDecision::Approve)
            } else {
                Ok(OperatorDecision::Deny { reason: "operator said no".to_string() })
            }
        }
    }

    /// Records every append and finalize for later inspection.
    #[derive(Default)]
    struct VecSink {
        records: Arc<Mutex<Vec<StepRecord>>>,
        finalized: Arc<Mutex<Vec<(EpisodeId, Outcome)>>>,
    }

    impl VecSink {
        fn new() -> Self {
            Self::default()
        }

        fn records(&self) -> Arc<Mutex<Vec<StepRecord>>> {
            self.records.clone()
        }

        fn finalized(&self) -> Arc<Mutex<Vec<(EpisodeId, Outcome)>>> {
            self.finalized.clone()
        }
    }

    impl EpisodeSink for VecSink {
        fn open(&self, _episode: EpisodeId, _goal: &str) -> DuctorResult<()> {
            Ok(())
        }

        fn append(&self, _episode: EpisodeId, record: &StepRecord) -> DuctorResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn finalize(
            &self,
            episode: EpisodeId,
            outcome: Outcome,
            _summary: &EpisodeSummary,
        ) -> DuctorResult<()> {
            self.finalized.lock().unwrap().push((episode, outcome));
            Ok(())
        }
    }

    // ── Harness ──────────────────────────────────────────────────────────────

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            settle_delay_ms: 0,
            max_steps: 30,
            step_attempts: 10,
            ..OrchestratorConfig::default()
        }
    }

    fn click_mark(mark: u32) -> Action {
        Action::Click { target: ClickTarget::Mark { mark } }
    }

    fn click_at(x: i32) -> Action {
        Action::Click { target: ClickTarget::Coordinate { x, y: 5 } }
    }

    #[allow(clippy::too_many_arguments)]
    fn orchestrator(
        capability: ScriptedCapability,
        planner: impl Planner + 'static,
        proposer: impl Proposer + 'static,
        reflector: impl Reflector + 'static,
        gate: KindGate,
        sink: VecSink,
        approve: bool,
        config: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            Box::new(capability),
            Box::new(planner),
            Box::new(proposer),
            Box::new(reflector),
            Box::new(gate),
            Box::new(sink),
            Box::new(FixedOperator { approve }),
            config,
        )
    }

    // ── Test cases ───────────────────────────────────────────────────────────

    /// A healthy loop: two plan steps, each completed by one click.
    #[test]
    fn test_successful_two_step_episode() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();
        let finalized = sink.finalized();

        let mut orch = orchestrator(
            capability,
            FixedPlanner::two_step(),
            SeqProposer::new(vec![click_mark(1), click_mark(2)]),
            FixedReflector::completing(),
            KindGate::allow_all(),
            sink,
            true,
            fast_config(),
        );

        let episode = orch.run_episode("open settings", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Success));
        assert_eq!(episode.steps.len(), 2);
        assert_eq!(counters.lock().unwrap().executes, 2);
        assert_eq!(records.lock().unwrap().len(), 2);
        assert_eq!(finalized.lock().unwrap().len(), 1);
        assert_eq!(finalized.lock().unwrap()[0].1, Outcome::Success);

        // Executed records carry the full bundle.
        let first = &records.lock().unwrap()[0];
        assert_eq!(first.gate, Some(GateVerdict::Allow));
        assert!(first.result.as_ref().unwrap().success);
        assert!(first.post_frame.is_some());
        assert!(first.reflection.is_some());
        assert!(!first.targets.is_empty());
    }

    /// Stub-mode scenario: no reasoning credential → the episode fails at
    /// planning and the capability is never touched.
    #[test]
    fn test_unconfigured_planner_fails_fast_without_capability_calls() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let finalized = sink.finalized();

        let mut orch = orchestrator(
            capability,
            UnconfiguredPlanner,
            SeqProposer::new(vec![]),
            FixedReflector::completing(),
            KindGate::allow_all(),
            sink,
            true,
            fast_config(),
        );

        let episode = orch.run_episode("anything", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Failed));
        let failure = episode.failure.unwrap();
        assert!(failure.contains("planning failed"), "failure was: {failure}");
        assert_eq!(counters.lock().unwrap().captures, 0, "no capture may run");
        assert_eq!(counters.lock().unwrap().executes, 0, "no action may run");
        assert_eq!(finalized.lock().unwrap()[0].1, Outcome::Failed);
    }

    /// An unhealthy capability refuses the episode before planning.
    #[test]
    fn test_health_gate_refuses_start() {
        let capability = ScriptedCapability::unhealthy();
        let counters = capability.counters();
        let sink = VecSink::new();

        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![click_mark(1)]),
            FixedReflector::completing(),
            KindGate::allow_all(),
            sink,
            true,
            fast_config(),
        );

        let episode = orch.run_episode("anything", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Failed));
        assert!(episode.failure.unwrap().contains("capability not ready"));
        assert_eq!(counters.lock().unwrap().captures, 0);
    }

    /// A blocked proposal is recorded, never executed, and the proposer is
    /// re-asked with the block reason in context.
    #[test]
    fn test_policy_block_records_and_reproposes() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();

        let gate = KindGate { block_kinds: vec!["shell_op"], require_human_kinds: vec![] };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![
                Action::ShellOp { command: "rm".to_string(), args: vec!["-rf".to_string()] },
                click_mark(1),
            ]),
            FixedReflector::completing(),
            gate,
            sink,
            true,
            fast_config(),
        );

        let episode = orch.run_episode("clean up", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Success));
        // One blocked record, then one executed record.
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].gate, Some(GateVerdict::Block { .. })));
        assert!(records[0].result.is_none(), "blocked actions never execute");
        assert_eq!(records[1].proposed.action.kind(), "click");
        // Only the click reached the capability.
        assert_eq!(counters.lock().unwrap().executes, 1);
    }

    /// An operator denial behaves like a block: recorded and re-proposed.
    #[test]
    fn test_operator_denial_recorded() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();

        let gate = KindGate { block_kinds: vec![], require_human_kinds: vec!["shell_op"] };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![Action::ShellOp {
                command: "diskutil".to_string(),
                args: vec!["eraseDisk".to_string()],
            }]),
            FixedReflector::completing(),
            gate,
            sink,
            false, // operator denies
            fast_config(),
        );

        let episode = orch.run_episode("erase", &MemoryContext::default()).unwrap();

        // The shell op was denied; the script then exhausts into a noop,
        // ending the episode with the plan incomplete.
        assert_eq!(episode.outcome, Some(Outcome::Failed));
        assert_eq!(counters.lock().unwrap().executes, 0);

        let records = records.lock().unwrap();
        let denial = records
            .iter()
            .find(|r| matches!(&r.gate, Some(GateVerdict::Block { reason }) if reason.contains("operator denied")))
            .expect("denial must be recorded");
        assert!(denial.result.is_none());
    }

    /// An operator approval lets a RequireHuman action execute.
    #[test]
    fn test_operator_approval_executes() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();

        let gate = KindGate { block_kinds: vec![], require_human_kinds: vec!["click"] };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![click_mark(1)]),
            FixedReflector::completing(),
            gate,
            sink,
            true, // operator approves
            fast_config(),
        );

        let episode = orch.run_episode("click it", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Success));
        assert_eq!(counters.lock().unwrap().executes, 1);
        // The executed record keeps the RequireHuman verdict so the
        // approval path stays visible in the audit trail.
        assert!(matches!(
            records.lock().unwrap()[0].gate,
            Some(GateVerdict::RequireHuman { .. })
        ));
    }

    /// Capability failures are tolerated and recorded until the
    /// consecutive-failure limit halts the episode.
    #[test]
    fn test_capability_failure_tolerated_until_limit() {
        let capability = ScriptedCapability::failing();
        let sink = VecSink::new();
        let records = sink.records();

        let config = OrchestratorConfig { max_failures: 3, ..fast_config() };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![
                click_at(1),
                click_at(2),
                click_at(3),
                click_at(4),
            ]),
            FixedReflector::stalled(),
            KindGate::allow_all(),
            sink,
            true,
            config,
        );

        let episode = orch.run_episode("try anyway", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::HaltedByLimit));
        let summary = episode.summary.unwrap();
        assert!(summary.stuck_reasons.contains(&"max_failures".to_string()));

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 3, "exactly max_failures steps committed");
        for record in records.iter() {
            let result = record.result.as_ref().unwrap();
            assert!(!result.success);
            // The loop still verified after the failed action.
            assert!(record.post_frame.is_some(), "verification runs even after a failure");
        }
    }

    /// Three consecutive no-effect steps trigger exactly one planner call
    /// before the next proposing phase.
    #[test]
    fn test_stagnation_triggers_exactly_one_replan() {
        let capability = ScriptedCapability::frozen();
        let sink = VecSink::new();

        let planner = FixedPlanner::single_step();
        let revise_calls = planner.revise_count();
        let proposer = SeqProposer::new(vec![click_at(1), click_at(2), click_at(3)]);
        let proposer_calls = proposer.call_count();

        let config = OrchestratorConfig { stall_limit: 3, ..fast_config() };
        let mut orch = orchestrator(
            capability,
            planner,
            proposer,
            FixedReflector::stalled(),
            KindGate::allow_all(),
            sink,
            true,
            config,
        );

        let episode = orch.run_episode("make progress", &MemoryContext::default()).unwrap();

        assert_eq!(*revise_calls.lock().unwrap(), 1, "exactly one replan");
        // Three stalled proposals, then the post-replan call that drains
        // the script into a terminal noop.
        assert_eq!(*proposer_calls.lock().unwrap(), 4);
        assert!(episode
            .summary
            .unwrap()
            .stuck_reasons
            .contains(&"stagnant".to_string()));
    }

    /// Two equivalent replans in a row are unrecoverable.
    #[test]
    fn test_equivalent_replans_are_unrecoverable() {
        let capability = ScriptedCapability::frozen();
        let sink = VecSink::new();

        let script: Vec<Action> = (1..=12).map(click_at).collect();
        let config = OrchestratorConfig { stall_limit: 3, ..fast_config() };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::stubborn(),
            SeqProposer::new(script),
            FixedReflector::stalled(),
            KindGate::allow_all(),
            sink,
            true,
            config,
        );

        let episode = orch.run_episode("make progress", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::Failed));
        assert!(episode.failure.unwrap().contains("equivalent plan"));
    }

    /// A proposer that requests cancellation as a side effect of every
    /// call, then proposes a click — modeling a user interrupt arriving
    /// while an action is in flight.
    struct CancellingProposer {
        handle: Arc<Mutex<Option<Arc<std::sync::atomic::AtomicBool>>>>,
    }

    impl Proposer for CancellingProposer {
        fn propose(&self, ctx: &ProposalContext) -> DuctorResult<ProposedAction> {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(ProposedAction {
                action: click_at(1),
                provenance: Provenance {
                    proposer_call: uuid::Uuid::new_v4(),
                    grounding_generation: ctx.generation,
                },
            })
        }
    }

    /// Cancellation is observed between phases, never mid-action: the
    /// in-flight step finishes (and is verified) before the halt.
    #[test]
    fn test_cancellation_between_phases() {
        let capability = ScriptedCapability::frozen();
        let counters = capability.counters();
        let sink = VecSink::new();

        let cell: Arc<Mutex<Option<Arc<std::sync::atomic::AtomicBool>>>> =
            Arc::new(Mutex::new(None));
        let proposer = CancellingProposer { handle: cell.clone() };

        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            proposer,
            FixedReflector::stalled(),
            KindGate::allow_all(),
            sink,
            true,
            fast_config(),
        );
        *cell.lock().unwrap() = Some(orch.cancel_handle());

        let episode = orch.run_episode("anything", &MemoryContext::default()).unwrap();

        assert_eq!(episode.outcome, Some(Outcome::HaltedByUser));
        // The in-flight action completed and was recorded before the halt.
        assert_eq!(counters.lock().unwrap().executes, 1);
        assert_eq!(episode.steps.len(), 1);
        assert!(episode.steps[0].post_frame.is_some());
    }

    /// A repeated hotkey is refused locally after the per-episode limit.
    #[test]
    fn test_hotkey_dedup() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();

        let combo = Action::Key { combo: vec!["cmd".to_string(), "space".to_string()] };
        let config = OrchestratorConfig { hotkey_repeat_limit: 1, ..fast_config() };
        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![combo.clone(), combo.clone(), combo]),
            FixedReflector::stalled(),
            KindGate::allow_all(),
            sink,
            true,
            config,
        );

        let episode = orch.run_episode("summon spotlight", &MemoryContext::default()).unwrap();

        // Only the first combo reached the capability.
        assert_eq!(counters.lock().unwrap().executes, 1);
        let records = records.lock().unwrap();
        let deduped: Vec<_> = records
            .iter()
            .filter(|r| {
                r.result.as_ref().is_some_and(|res| {
                    res.error.as_deref() == Some("hotkey deduplicated")
                })
            })
            .collect();
        assert_eq!(deduped.len(), 2);
        // Local refusals never consulted the gate.
        assert!(deduped.iter().all(|r| r.gate.is_none()));
        // Local refusals are not action failures: the episode halted on
        // script exhaustion, not on max_failures.
        assert!(!episode
            .summary
            .unwrap()
            .stuck_reasons
            .contains(&"max_failures".to_string()));
    }

    /// A mark that does not resolve in the current generation fails the
    /// step instead of silently re-resolving.
    #[test]
    fn test_unresolvable_mark_fails_step() {
        let capability = ScriptedCapability::new();
        let counters = capability.counters();
        let sink = VecSink::new();
        let records = sink.records();

        let mut orch = orchestrator(
            capability,
            FixedPlanner::single_step(),
            SeqProposer::new(vec![click_mark(99)]),
            FixedReflector::completing(),
            KindGate::allow_all(),
            sink,
            true,
            fast_config(),
        );

        let episode = orch.run_episode("click nothing", &MemoryContext::default()).unwrap();

        assert_eq!(counters.lock().unwrap().executes, 0);
        assert_eq!(episode.outcome, Some(Outcome::Failed));
        let records = records.lock().unwrap();
        let failed = records
            .iter()
            .find(|r| {
                r.result
                    .as_ref()
                    .is_some_and(|res| res.error.as_deref().is_some_and(|e| e.contains("does not resolve")))
            })
            .expect("the stale mark must be recorded as a failure");
        assert!(failed.gate.is_none(), "the gate never saw the unresolvable action");
    }

    /// Config TOML parsing rejects unknown keys.
    #[test]
    fn test_config_from_toml() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            max_steps = 10
            settle_delay_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.settle_delay_ms, 0);
        // Unspecified fields keep defaults.
        assert_eq!(config.max_failures, OrchestratorConfig::default().max_failures);

        let err = OrchestratorConfig::from_toml_str("max_stepz = 10");
        assert!(matches!(err, Err(DuctorError::ConfigError { .. })));
    }
}
