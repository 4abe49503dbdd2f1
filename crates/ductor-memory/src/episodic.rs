//! Episode sinks: in-memory and JSON-lines file backed.
//!
//! Both implementations append hash-chained events and can replay a full
//! `Episode` from nothing but the persisted records — reconstructing the
//! timeline requires no live process memory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::info;

use ductor_contracts::{
    episode::{Episode, EpisodeId, EpisodeSummary, Outcome},
    error::{DuctorError, DuctorResult},
};
use ductor_core::traits::EpisodeSink;

use crate::chain::{hash_event, verify_chain, EpisodeEvent, EventBody};

// ── Shared chain bookkeeping ──────────────────────────────────────────────────

/// Per-episode chain head: next sequence and last hash.
#[derive(Debug, Clone)]
struct ChainHead {
    sequence: u64,
    last_hash: String,
}

impl ChainHead {
    fn genesis() -> Self {
        Self {
            sequence: 0,
            last_hash: EpisodeEvent::GENESIS_HASH.to_string(),
        }
    }

    /// Build the next event in this chain and advance the head.
    fn next_event(&mut self, episode_id: &str, body: EventBody) -> EpisodeEvent {
        let prev_hash = self.last_hash.clone();
        let sequence = self.sequence;
        let this_hash = hash_event(episode_id, sequence, &body, &prev_hash);

        self.sequence += 1;
        self.last_hash = this_hash.clone();

        EpisodeEvent {
            sequence,
            episode_id: episode_id.to_string(),
            body,
            prev_hash,
            this_hash,
            written_at: Utc::now(),
        }
    }
}

/// Reconstruct an `Episode` from its chain events.
///
/// Fails with `MemoryCorrupt` when the chain does not verify or is
/// structurally impossible (no opening event).
pub fn replay_events(events: &[EpisodeEvent]) -> DuctorResult<Episode> {
    if !verify_chain(events) {
        return Err(DuctorError::MemoryCorrupt {
            reason: "hash chain verification failed".to_string(),
        });
    }

    let first = events.first().ok_or_else(|| DuctorError::MemoryCorrupt {
        reason: "episode log is empty".to_string(),
    })?;
    let EventBody::Opened { goal } = &first.body else {
        return Err(DuctorError::MemoryCorrupt {
            reason: "episode log does not start with an opening event".to_string(),
        });
    };

    let id = first
        .episode_id
        .parse::<uuid::Uuid>()
        .map(EpisodeId)
        .map_err(|e| DuctorError::MemoryCorrupt {
            reason: format!("bad episode id '{}': {}", first.episode_id, e),
        })?;

    let mut episode = Episode::new(goal.clone());
    episode.id = id;
    episode.started_at = first.written_at;

    for event in &events[1..] {
        match &event.body {
            EventBody::Opened { .. } => {
                return Err(DuctorError::MemoryCorrupt {
                    reason: format!("duplicate opening event at sequence {}", event.sequence),
                });
            }
            EventBody::Step(record) => episode.steps.push(record.clone()),
            EventBody::Finalized { outcome, summary } => {
                episode.outcome = Some(*outcome);
                episode.summary = Some(summary.clone());
            }
        }
    }

    Ok(episode)
}

// ── In-memory sink ────────────────────────────────────────────────────────────

/// An in-memory, append-only episode log backed by a SHA-256 hash chain.
///
/// The reference implementation of `EpisodeSink`, used by tests and the
/// demo. `write`/`finalize` acquire an internal mutex, so the sink can be
/// shared across threads without extra synchronization.
#[derive(Default)]
pub struct InMemoryEpisodeLog {
    state: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    events: HashMap<String, Vec<EpisodeEvent>>,
    heads: HashMap<String, ChainHead>,
}

impl InMemoryEpisodeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events for one episode, in chain order.
    pub fn export_log(&self, episode: EpisodeId) -> Vec<EpisodeEvent> {
        let state = self.state.lock().expect("episode log lock poisoned");
        state.events.get(&episode.to_string()).cloned().unwrap_or_default()
    }

    /// Verify that an episode's chain has not been tampered with.
    pub fn verify_integrity(&self, episode: EpisodeId) -> bool {
        verify_chain(&self.export_log(episode))
    }

    /// Reconstruct the episode purely from the stored events.
    pub fn replay(&self, episode: EpisodeId) -> DuctorResult<Episode> {
        replay_events(&self.export_log(episode))
    }

    fn append_body(&self, episode: EpisodeId, body: EventBody) -> DuctorResult<()> {
        let mut state = self.state.lock().map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("episode log lock poisoned: {}", e),
        })?;
        let key = episode.to_string();
        let head = state.heads.entry(key.clone()).or_insert_with(ChainHead::genesis);
        let event = head.next_event(&key, body);
        state.events.entry(key).or_default().push(event);
        Ok(())
    }
}

impl EpisodeSink for InMemoryEpisodeLog {
    fn open(&self, episode: EpisodeId, goal: &str) -> DuctorResult<()> {
        self.append_body(episode, EventBody::Opened { goal: goal.to_string() })
    }

    fn append(
        &self,
        episode: EpisodeId,
        record: &ductor_contracts::episode::StepRecord,
    ) -> DuctorResult<()> {
        self.append_body(episode, EventBody::Step(record.clone()))
    }

    fn finalize(
        &self,
        episode: EpisodeId,
        outcome: Outcome,
        summary: &EpisodeSummary,
    ) -> DuctorResult<()> {
        self.append_body(
            episode,
            EventBody::Finalized { outcome, summary: summary.clone() },
        )?;
        info!(episode_id = %episode, ?outcome, "episode log finalized");
        Ok(())
    }
}

// ── File-backed sink ──────────────────────────────────────────────────────────

/// A durable episode log: one JSON-lines file per episode under a root
/// directory, one hash-chained event per line.
///
/// Records are keyed by episode id (the filename) and step index (inside
/// the step events), and are independently replayable with `replay`.
pub struct FileEpisodeLog {
    root: PathBuf,
    heads: Mutex<HashMap<String, ChainHead>>,
}

impl FileEpisodeLog {
    /// Open (creating if needed) an episode log rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> DuctorResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to create episode log root '{}': {}", root.display(), e),
        })?;
        Ok(Self { root, heads: Mutex::new(HashMap::new()) })
    }

    fn path_for(&self, episode: &str) -> PathBuf {
        self.root.join(format!("{episode}.jsonl"))
    }

    /// Episode ids present on disk, in no particular order.
    pub fn list_episodes(&self) -> DuctorResult<Vec<EpisodeId>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| DuctorError::MemoryCorrupt {
            reason: format!("failed to read episode log root: {}", e),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| DuctorError::MemoryCorrupt {
                reason: format!("failed to read episode log entry: {}", e),
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(id) = stem.parse::<uuid::Uuid>() {
                        out.push(EpisodeId(id));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Load all events for one episode from disk.
    pub fn load_events(&self, episode: EpisodeId) -> DuctorResult<Vec<EpisodeEvent>> {
        let path = self.path_for(&episode.to_string());
        let file = File::open(&path).map_err(|e| DuctorError::MemoryCorrupt {
            reason: format!("failed to open '{}': {}", path.display(), e),
        })?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| DuctorError::MemoryCorrupt {
                reason: format!("failed to read '{}': {}", path.display(), e),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: EpisodeEvent =
                serde_json::from_str(&line).map_err(|e| DuctorError::MemoryCorrupt {
                    reason: format!("bad event line in '{}': {}", path.display(), e),
                })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Reconstruct an episode purely from its on-disk records.
    pub fn replay(&self, episode: EpisodeId) -> DuctorResult<Episode> {
        replay_events(&self.load_events(episode)?)
    }

    fn append_body(&self, episode: EpisodeId, body: EventBody) -> DuctorResult<()> {
        let key = episode.to_string();
        let mut heads = self.heads.lock().map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("episode log lock poisoned: {}", e),
        })?;
        let head = heads.entry(key.clone()).or_insert_with(ChainHead::genesis);
        let event = head.next_event(&key, body);

        let line = serde_json::to_string(&event).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to serialize event: {}", e),
        })?;
        let path = self.path_for(&key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DuctorError::MemoryWriteFailed {
                reason: format!("failed to open '{}': {}", path.display(), e),
            })?;
        writeln!(file, "{line}").map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to append to '{}': {}", path.display(), e),
        })?;
        Ok(())
    }
}

impl EpisodeSink for FileEpisodeLog {
    fn open(&self, episode: EpisodeId, goal: &str) -> DuctorResult<()> {
        self.append_body(episode, EventBody::Opened { goal: goal.to_string() })
    }

    fn append(
        &self,
        episode: EpisodeId,
        record: &ductor_contracts::episode::StepRecord,
    ) -> DuctorResult<()> {
        self.append_body(episode, EventBody::Step(record.clone()))
    }

    fn finalize(
        &self,
        episode: EpisodeId,
        outcome: Outcome,
        summary: &EpisodeSummary,
    ) -> DuctorResult<()> {
        self.append_body(
            episode,
            EventBody::Finalized { outcome, summary: summary.clone() },
        )?;
        info!(episode_id = %episode, ?outcome, path = %self.path_for(&episode.to_string()).display(), "episode log finalized");
        Ok(())
    }
}

// ── Digests for memory context ────────────────────────────────────────────────

/// One-line digest of a finished episode, for planner/proposer context.
pub fn episode_digest(episode: &Episode) -> String {
    let outcome = episode
        .outcome
        .map(|o| format!("{o:?}").to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "[{}] \"{}\" — {} steps, outcome {}",
        episode.started_at.format("%Y-%m-%d %H:%M"),
        episode.goal,
        episode.steps.len(),
        outcome
    )
}

/// Digests for every episode on disk whose goal shares a keyword with
/// `query`, newest last. Corrupt logs are skipped, never fatal to
/// retrieval.
pub fn relevant_digests(log: &FileEpisodeLog, query: &str, limit: usize) -> Vec<String> {
    let Ok(ids) = log.list_episodes() else {
        return Vec::new();
    };
    let needle = query.to_lowercase();
    let mut episodes: Vec<Episode> = ids
        .into_iter()
        .filter_map(|id| log.replay(id).ok())
        .filter(|e| {
            let goal = e.goal.to_lowercase();
            needle.split_whitespace().any(|w| goal.contains(w))
        })
        .collect();
    episodes.sort_by_key(|e| e.started_at);
    episodes
        .iter()
        .rev()
        .take(limit)
        .rev()
        .map(episode_digest)
        .collect()
}

impl std::fmt::Debug for FileEpisodeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEpisodeLog").field("root", &self.root).finish()
    }
}

impl std::fmt::Debug for InMemoryEpisodeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEpisodeLog").finish()
    }
}
