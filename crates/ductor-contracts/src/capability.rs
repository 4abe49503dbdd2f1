//! Capability health reporting.
//!
//! The capability adapter owns screen capture, input injection, and tree
//! queries; the orchestrator only sees its health before starting an
//! episode. HID and semantic actions are refused while the adapter reports
//! not-ok (e.g. missing OS accessibility permissions).

use serde::{Deserialize, Serialize};

/// The capability adapter's self-reported readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    /// Human-readable reasons when not ok, surfaced verbatim to the
    /// operator.
    pub reasons: Vec<String>,
}

impl Health {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reasons: Vec::new(),
        }
    }

    pub fn not_ok(reasons: Vec<String>) -> Self {
        Self { ok: false, reasons }
    }
}
