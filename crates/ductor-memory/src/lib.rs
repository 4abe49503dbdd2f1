//! # ductor-memory
//!
//! Durable memory for the ductor runtime:
//!
//! - **Episodic log** — an append-only, SHA-256 hash-chained record of
//!   every orchestrator step, in-memory or JSON-lines on disk. Tampering
//!   breaks the chain; a full `Episode` is replayable from nothing but the
//!   persisted events.
//! - **Semantic notes** — free-text observations retrieved by embedding
//!   similarity when an embedder is configured, keyword match otherwise.
//! - **Skill library** — reusable action sequences distilled from
//!   successful episodes, deduplicated by fingerprint, superseded (never
//!   deleted) on update.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ductor_memory::{FileEpisodeLog, NoteIndex, SkillLibrary};
//!
//! let log = FileEpisodeLog::open(".agent_memory/episodes")?;
//! let notes = NoteIndex::open(".agent_memory/notes")?;
//! let skills = SkillLibrary::open(".agent_memory/skills")?;
//! ```

pub mod chain;
pub mod episodic;
pub mod semantic;
pub mod skills;

pub use chain::{hash_event, verify_chain, EpisodeEvent, EventBody};
pub use episodic::{episode_digest, relevant_digests, replay_events, FileEpisodeLog, InMemoryEpisodeLog};
pub use semantic::{cosine_similarity, Note, NoteIndex};
pub use skills::{fingerprint_actions, slug, Skill, SkillLibrary};

// ── Tests ─────────────────────────────────────────────────────────────────────
