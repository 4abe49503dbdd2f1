//! ductor runtime — Demo CLI
//!
//! Runs the orchestration loop end-to-end against a scripted screen, with
//! real ductor components (policy gate, hash-chained episode log,
//! schema-validated reasoning boundary) and no network.
//!
//! Usage:
//!   cargo run -p demo -- scripted
//!   cargo run -p demo -- stub
//!   cargo run -p demo -- unconfigured

use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ductor_contracts::{
    action::{Action, ActionResult},
    capability::Health,
    context::MemoryContext,
    error::DuctorResult,
    frame::Frame,
    gate::OperatorDecision,
    target::{ElementNode, ElementTree, Rect},
};
use ductor_core::{
    traits::{Capability, Operator},
    Orchestrator, OrchestratorConfig,
};
use ductor_memory::InMemoryEpisodeLog;
use ductor_policy::TomlPolicyGate;
use ductor_reasoning::{
    ReasoningClient, ReasoningRole, SchemaPlanner, SchemaProposer, SchemaReflector,
    StubReasoningClient, UnconfiguredReasoningClient,
};
use serde_json::{json, Value};

// ── CLI definition ────────────────────────────────────────────────────────────

/// ductor — policy-bound computer-use orchestration demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "ductor orchestration loop demo",
    long_about = "Runs the ductor loop against a scripted screen, showing grounding,\n\
                  policy gating, change verification, and episode chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scripted reasoning: a two-step plan with one policy-blocked detour.
    Scripted,
    /// Stub reasoning mode: deterministic no-op plan, no network.
    Stub,
    /// No reasoning credential: the episode fails fast at planning.
    Unconfigured,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialize structured logging. Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::Scripted => run_with_client(Arc::new(ScriptedReasoningClient::new())),
        Command::Stub => run_with_client(Arc::new(StubReasoningClient::new())),
        Command::Unconfigured => run_with_client(Arc::new(UnconfiguredReasoningClient::new())),
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!();
    println!("ductor — policy-bound computer-use orchestration");
    println!("================================================");
    println!();
    println!("Loop per step:");
    println!("  [1] Perceive: capture frame, ground targets (Set-of-Mark)");
    println!("  [2] Propose: one action from the reasoning service");
    println!("  [3] Gate: block / allow / require-human before execution");
    println!("  [4] Act + Verify: execute, recapture, grade the change");
    println!("  [5] Reflect + Record: verdict, hash-chained step record");
    println!();
}

// ── Demo wiring ───────────────────────────────────────────────────────────────

const DEMO_POLICY: &str = r#"
[[allow]]
id = "allow-pointer"
description = "Pointer and keyboard interaction is fine"
kinds = ["click", "type", "key", "scroll"]

[[allow]]
id = "allow-shell"
description = "Shell ops are kind-allowed; the guardrail vets content"
kinds = ["shell_op"]

[[exclusion_zones]]
x = 0
y = 0
w = 320
h = 24
label = "menu bar"

[shell_guardrail]
allowed_commands = ["ls", "echo"]
destructive_patterns = ["rm -rf"]
"#;

fn run_with_client(client: Arc<dyn ReasoningClient>) -> DuctorResult<()> {
    let sink = InMemoryEpisodeLog::new();
    let verify_handle = Arc::new(sink);

    // The sink is shared so the demo can inspect the chain afterwards.
    struct SharedSink(Arc<InMemoryEpisodeLog>);
    impl ductor_core::traits::EpisodeSink for SharedSink {
        fn open(
            &self,
            episode: ductor_contracts::episode::EpisodeId,
            goal: &str,
        ) -> DuctorResult<()> {
            self.0.open(episode, goal)
        }
        fn append(
            &self,
            episode: ductor_contracts::episode::EpisodeId,
            record: &ductor_contracts::episode::StepRecord,
        ) -> DuctorResult<()> {
            self.0.append(episode, record)
        }
        fn finalize(
            &self,
            episode: ductor_contracts::episode::EpisodeId,
            outcome: ductor_contracts::episode::Outcome,
            summary: &ductor_contracts::episode::EpisodeSummary,
        ) -> DuctorResult<()> {
            self.0.finalize(episode, outcome, summary)
        }
    }

    let config = OrchestratorConfig { settle_delay_ms: 0, ..OrchestratorConfig::default() };
    let mut orchestrator = Orchestrator::new(
        Box::new(DemoScreen::new()),
        Box::new(SchemaPlanner::new(client.clone())),
        Box::new(SchemaProposer::new(client.clone())),
        Box::new(SchemaReflector::new(client)),
        Box::new(TomlPolicyGate::from_toml_str(DEMO_POLICY)?),
        Box::new(SharedSink(verify_handle.clone())),
        Box::new(PrintingOperator),
        config,
    );

    let episode =
        orchestrator.run_episode("open the settings pane", &MemoryContext::default())?;

    println!("Episode {} finished:", episode.id);
    println!("  outcome:  {:?}", episode.outcome);
    if let Some(failure) = &episode.failure {
        println!("  failure:  {failure}");
    }
    if let Some(summary) = &episode.summary {
        println!(
            "  steps: {}  failures: {}  replans: {}  runtime: {}ms",
            summary.steps, summary.failures, summary.replans, summary.runtime_ms
        );
    }
    for record in &episode.steps {
        println!(
            "  step {}: {} gate={:?} success={:?}",
            record.step,
            record.proposed.action.kind(),
            record.gate.as_ref().map(verdict_name),
            record.result.as_ref().map(|r| r.success),
        );
    }

    println!(
        "  episode chain intact: {}",
        verify_handle.verify_integrity(episode.id)
    );
    let replayed = verify_handle.replay(episode.id)?;
    println!(
        "  replay round-trip: {} steps, outcome {:?}",
        replayed.steps.len(),
        replayed.outcome
    );
    println!();
    Ok(())
}

fn verdict_name(v: &ductor_contracts::gate::GateVerdict) -> &'static str {
    match v {
        ductor_contracts::gate::GateVerdict::Allow => "allow",
        ductor_contracts::gate::GateVerdict::Block { .. } => "block",
        ductor_contracts::gate::GateVerdict::RequireHuman { .. } => "require_human",
    }
}

// ── Scripted screen ───────────────────────────────────────────────────────────

/// A deterministic "desktop": three buttons on a flat background. Every
/// executed action repaints part of the screen so the change detector sees
/// real effects.
struct DemoScreen {
    level: u8,
}

impl DemoScreen {
    fn new() -> Self {
        Self { level: 60 }
    }
}

impl Capability for DemoScreen {
    fn capture(&mut self) -> DuctorResult<Frame> {
        let mut luma = vec![24u8; 320 * 200];
        for row in luma.chunks_mut(320).take(100) {
            row.fill(self.level);
        }
        Ok(Frame::from_luma(320, 200, 1.0, luma))
    }

    fn query_tree(&mut self) -> DuctorResult<Option<ElementTree>> {
        let button = |title: &str, x: i32, y: i32| ElementNode {
            role: "Button".to_string(),
            title: Some(title.to_string()),
            value: None,
            bounds: Rect::new(x, y, 60, 20),
            enabled: true,
            in_viewport: true,
            z_order: None,
        };
        Ok(Some(ElementTree {
            nodes: vec![
                button("Menu", 20, 40),
                button("Settings", 120, 40),
                button("Help", 220, 40),
            ],
        }))
    }

    fn execute(&mut self, action: &Action) -> DuctorResult<ActionResult> {
        tracing::info!(kind = action.kind(), "demo screen executing");
        self.level = self.level.wrapping_add(70);
        Ok(ActionResult::ok())
    }

    fn health_check(&self) -> Health {
        Health::ok()
    }
}

/// Prints the request and approves — the demo is non-interactive.
struct PrintingOperator;

impl Operator for PrintingOperator {
    fn resolve(&self, action: &Action, reason: &str) -> DuctorResult<OperatorDecision> {
        println!("  [operator] approving '{}' ({reason})", action.kind());
        Ok(OperatorDecision::Approve)
    }
}

// ── Scripted reasoning ────────────────────────────────────────────────────────

/// A canned reasoning service: a two-step plan, a proposer that first
/// tries a non-allowlisted shell command (the gate blocks it), then clicks
/// through the plan, and an approving reflector.
struct ScriptedReasoningClient {
    proposals: Mutex<usize>,
}

impl ScriptedReasoningClient {
    fn new() -> Self {
        Self { proposals: Mutex::new(0) }
    }
}

impl ReasoningClient for ScriptedReasoningClient {
    fn request(&self, role: ReasoningRole, _prompt: &Value) -> DuctorResult<Value> {
        Ok(match role {
            ReasoningRole::Planner => json!({
                "steps": [
                    { "intent": "Open the menu", "completion": "Menu is visible" },
                    { "intent": "Click Settings", "completion": "Settings pane is visible" }
                ]
            }),
            ReasoningRole::Proposer => {
                let mut cursor = self.proposals.lock().expect("demo lock poisoned");
                let action = match *cursor {
                    0 => json!({ "type": "shell_op", "command": "curl", "args": ["http://example.com"] }),
                    1 => json!({ "type": "click", "mark": 1 }),
                    2 => json!({ "type": "click", "mark": 2 }),
                    _ => json!({ "type": "noop", "reason": "script exhausted" }),
                };
                *cursor += 1;
                json!({ "action": action })
            }
            ReasoningRole::Reflector => json!({
                "step_complete": true,
                "progress": "progress",
                "request_replan": false,
                "reason": "scripted approval"
            }),
            ReasoningRole::Embedding => json!({ "embedding": [0.0, 0.0] }),
        })
    }
}
