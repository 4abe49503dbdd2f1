//! Semantic notes index with embedding / keyword retrieval.
//!
//! Notes are small free-text observations ("the settings pane is under the
//! gear icon") written during or after episodes. Retrieval prefers cosine
//! similarity over embeddings when an embedder is configured; otherwise it
//! falls back to keyword matching so the runtime keeps working offline.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ductor_contracts::error::{DuctorError, DuctorResult};
use ductor_core::traits::Embedder;

/// One stored note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

/// The semantic notes index. Optionally file-backed: one JSON file per
/// note under the root directory.
#[derive(Debug, Default)]
pub struct NoteIndex {
    root: Option<PathBuf>,
    notes: Vec<Note>,
}

impl NoteIndex {
    /// A purely in-memory index.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (creating if needed) a file-backed index rooted at `root`,
    /// loading any existing notes. Unreadable note files are skipped with
    /// a warning, never fatal.
    pub fn open(root: impl Into<PathBuf>) -> DuctorResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to create notes root '{}': {}", root.display(), e),
        })?;

        let mut notes = Vec::new();
        let entries = fs::read_dir(&root).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to read notes root: {}", e),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|s| serde_json::from_str::<Note>(&s).map_err(|e| e.to_string()))
                {
                    Ok(note) => notes.push(note),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable note"),
                }
            }
        }
        notes.sort_by_key(|n| n.created_at);
        Ok(Self { root: Some(root), notes })
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Add one note, embedding it when an embedder is available. An
    /// embedder failure degrades to an unembedded note rather than losing
    /// the text.
    pub fn add(
        &mut self,
        text: impl Into<String>,
        metadata: serde_json::Value,
        embedder: Option<&dyn Embedder>,
    ) -> DuctorResult<&Note> {
        let text = text.into();
        let embedding = match embedder {
            Some(embedder) => match embedder.embed(&text) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "embedding failed; storing note without a vector");
                    None
                }
            },
            None => None,
        };

        let note = Note {
            id: uuid::Uuid::new_v4(),
            created_at: Utc::now(),
            text,
            metadata,
            embedding,
        };

        if let Some(root) = &self.root {
            let path = root.join(format!("{}.json", note.id));
            let body = serde_json::to_string_pretty(&note).map_err(|e| {
                DuctorError::MemoryWriteFailed { reason: format!("failed to serialize note: {}", e) }
            })?;
            fs::write(&path, body).map_err(|e| DuctorError::MemoryWriteFailed {
                reason: format!("failed to write '{}': {}", path.display(), e),
            })?;
        }

        self.notes.push(note);
        Ok(self.notes.last().expect("note just pushed"))
    }

    /// Retrieve up to `top_k` notes for `query`.
    ///
    /// With an embedder and at least one embedded note: cosine similarity,
    /// best first. Otherwise: case-insensitive keyword containment in
    /// insertion order.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        embedder: Option<&dyn Embedder>,
    ) -> Vec<&Note> {
        if self.notes.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if let Some(embedder) = embedder {
            if self.notes.iter().any(|n| n.embedding.is_some()) {
                match embedder.embed(query) {
                    Ok(query_vec) => {
                        let mut scored: Vec<(f32, &Note)> = self
                            .notes
                            .iter()
                            .filter_map(|n| {
                                n.embedding
                                    .as_ref()
                                    .map(|v| (cosine_similarity(&query_vec, v), n))
                            })
                            .collect();
                        scored.sort_by(|a, b| {
                            b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                        });
                        return scored.into_iter().take(top_k).map(|(_, n)| n).collect();
                    }
                    Err(e) => {
                        warn!(error = %e, "query embedding failed; falling back to keywords");
                    }
                }
            }
        }

        let needle = query.to_lowercase();
        self.notes
            .iter()
            .filter(|n| {
                let haystack = n.text.to_lowercase();
                needle.split_whitespace().any(|w| haystack.contains(w))
            })
            .take(top_k)
            .collect()
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
