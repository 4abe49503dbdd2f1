//! Hash-chain primitives for the episodic log.
//!
//! Every persisted event links to the previous event via its SHA-256 hash.
//! Tampering with any event — even a single byte — breaks the chain and is
//! detected by `verify_chain`, so a replayed episode is exactly what the
//! orchestrator recorded.
//!
//! Hash input layout (bytes, in order):
//!   1. episode id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of the event body (serde_json, no pretty-printing)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ductor_contracts::episode::{EpisodeSummary, Outcome, StepRecord};

/// What one chain event records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventBody {
    /// The episode started. Always sequence 0.
    Opened { goal: String },
    /// One committed orchestrator step.
    Step(StepRecord),
    /// The episode terminated. Always the last event.
    Finalized {
        outcome: Outcome,
        summary: EpisodeSummary,
    },
}

/// A single entry in the hash chain for one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeEvent {
    /// Monotonically increasing position in the chain, starting at 0.
    pub sequence: u64,

    /// The episode this event belongs to.
    pub episode_id: String,

    pub body: EventBody,

    /// SHA-256 hash (hex) of the previous event, or `GENESIS_HASH` for
    /// the first event.
    pub prev_hash: String,

    /// SHA-256 hash (hex) of this event's canonical content.
    pub this_hash: String,

    /// Wall-clock time the event was written (UTC).
    pub written_at: DateTime<Utc>,
}

impl EpisodeEvent {
    /// The sentinel `prev_hash` used for the first event in every chain.
    ///
    /// 64 hex zeros — a value that can never be the SHA-256 of real data,
    /// making genesis detection unambiguous.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// Compute the SHA-256 hash for a single event.
///
/// Returns a lowercase 64-character hex string.
///
/// # Panics
///
/// Panics if `body` cannot be serialized to JSON — which cannot happen for
/// the well-formed `EventBody` type.
pub fn hash_event(episode_id: &str, sequence: u64, body: &EventBody, prev_hash: &str) -> String {
    let body_json =
        serde_json::to_vec(body).expect("EventBody must always be serializable to JSON");

    let mut hasher = Sha256::new();
    hasher.update(episode_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&body_json);

    hex::encode(hasher.finalize())
}

/// Verify the integrity of a hash chain.
///
/// Returns `true` when every event's `prev_hash` matches the preceding
/// event's `this_hash` (or `GENESIS_HASH` for event 0) AND every
/// `this_hash` matches the value recomputed from the event's own fields.
/// An empty chain is defined as valid.
pub fn verify_chain(events: &[EpisodeEvent]) -> bool {
    let mut expected_prev = EpisodeEvent::GENESIS_HASH.to_string();

    for event in events {
        if event.prev_hash != expected_prev {
            return false;
        }

        let recomputed = hash_event(
            &event.episode_id,
            event.sequence,
            &event.body,
            &event.prev_hash,
        );
        if event.this_hash != recomputed {
            return false;
        }

        expected_prev = event.this_hash.clone();
    }

    true
}
