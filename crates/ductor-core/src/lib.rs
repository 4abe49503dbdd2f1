//! # ductor-core
//!
//! The orchestration runtime for ductor agents.
//!
//! This crate provides:
//! - The component traits (`Capability`, `Planner`, `Proposer`, `Reflector`,
//!   `PolicyGate`, `EpisodeSink`, `Operator`, `Embedder`)
//! - The `Orchestrator` that wires them together in the correct trust order
//! - The `StagnationDetector` state machine that keeps episodes from
//!   looping forever
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ductor_core::{Orchestrator, OrchestratorConfig};
//!
//! let mut orchestrator = Orchestrator::new(
//!     capability, planner, proposer, reflector, gate, sink, operator,
//!     OrchestratorConfig::default(),
//! );
//! let episode = orchestrator.run_episode("open the settings pane", &memory)?;
//! ```

pub mod orchestrator;
pub mod stagnation;
pub mod traits;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use stagnation::{StagnationDetector, StagnationState, StepSignal};
