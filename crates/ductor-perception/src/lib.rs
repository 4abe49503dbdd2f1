//! # ductor-perception
//!
//! The perception pipeline for the ductor runtime: frame bookkeeping,
//! frame-to-frame change detection, and Set-of-Mark grounding.
//!
//! ## Overview
//!
//! - [`FrameStore`] rotates the current and previous capture.
//! - [`ChangeDetector`] grades the difference between two frames with a
//!   perceptual-hash signal OR'd with a global similarity signal, and
//!   returns a magnitude the stagnation detector consumes.
//! - [`GroundingEngine`] turns the capability's element tree (or a pixel
//!   fallback) into numbered, generation-tagged targets.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ductor_perception::{ChangeDetector, FrameStore, GroundingEngine};
//!
//! let mut frames = FrameStore::new();
//! let mut grounding = GroundingEngine::new();
//! let detector = ChangeDetector::default();
//!
//! frames.push(capability.capture()?);
//! let grounded = grounding.ground(frames.current().unwrap(), tree.as_ref())?;
//! ```

pub mod change;
pub mod frames;
pub mod ground;

pub use change::{ChangeDetector, ChangeReport};
pub use frames::FrameStore;
pub use ground::GroundingEngine;
