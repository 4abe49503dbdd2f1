//! # ductor-contracts
//!
//! Shared types, schemas, and contracts for the ductor runtime.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate — only data definitions, derived-field constructors, and error
//! types.

pub mod action;
pub mod capability;
pub mod context;
pub mod episode;
pub mod error;
pub mod frame;
pub mod gate;
pub mod plan;
pub mod reflection;
pub mod target;
