//! The procedural skill library.
//!
//! A skill is a reusable, parameterizable action sequence distilled from a
//! reflector-confirmed successful episode. Skills are deduplicated by a
//! fingerprint of their canonical action sequence, keyed by name, and never
//! deleted — saving new content under an existing name supersedes it with a
//! version bump.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ductor_contracts::{
    action::Action,
    episode::Episode,
    error::{DuctorError, DuctorResult},
    plan::StepStatus,
};

/// Stable hash of an action sequence for deduplication.
pub fn fingerprint_actions(actions: &[Action]) -> String {
    let canonical =
        serde_json::to_vec(actions).expect("actions must always be serializable to JSON");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// One stored skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: uuid::Uuid,
    /// The retrieval key. Unique within the library.
    pub name: String,
    /// Trigger description matched during retrieval, e.g. the plan-step
    /// intent the sequence accomplished.
    pub trigger: String,
    pub actions: Vec<Action>,
    pub fingerprint: String,
    /// Bumped every time the skill's content is superseded.
    pub version: u32,
    pub uses: u32,
    pub successes: u32,
    pub failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

/// The skill library. Optionally file-backed: one JSON file per skill,
/// named by a slug of the skill name.
#[derive(Debug, Default)]
pub struct SkillLibrary {
    root: Option<PathBuf>,
    skills: Vec<Skill>,
}

impl SkillLibrary {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (creating if needed) a file-backed library, loading existing
    /// skills. Unreadable skill files are skipped with a warning.
    pub fn open(root: impl Into<PathBuf>) -> DuctorResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to create skills root '{}': {}", root.display(), e),
        })?;

        let mut skills = Vec::new();
        let entries = fs::read_dir(&root).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to read skills root: {}", e),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|s| serde_json::from_str::<Skill>(&s).map_err(|e| e.to_string()))
                {
                    Ok(skill) => skills.push(skill),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable skill"),
                }
            }
        }
        skills.sort_by_key(|s| s.created_at);
        Ok(Self { root: Some(root), skills })
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    /// All skills, oldest first.
    pub fn all(&self) -> impl Iterator<Item = &Skill> {
        self.skills.iter()
    }

    /// "name — trigger" lines for prompt context.
    pub fn catalog(&self) -> Vec<String> {
        self.skills
            .iter()
            .map(|s| format!("{} — {}", s.name, s.trigger))
            .collect()
    }

    /// Save a skill.
    ///
    /// - Identical action sequence (by fingerprint) anywhere in the
    ///   library: the existing skill's usage count is bumped and its
    ///   trigger is kept; no duplicate is created.
    /// - Existing name with different content: the skill is superseded in
    ///   place — actions replaced, version bumped. Never deleted.
    /// - Otherwise a new skill is created.
    pub fn save(
        &mut self,
        name: impl Into<String>,
        trigger: impl Into<String>,
        actions: Vec<Action>,
    ) -> DuctorResult<&Skill> {
        if actions.is_empty() {
            return Err(DuctorError::MemoryWriteFailed {
                reason: "skill actions cannot be empty".to_string(),
            });
        }
        let name = name.into();
        let trigger = trigger.into();
        let fingerprint = fingerprint_actions(&actions);
        let now = Utc::now();

        if let Some(idx) = self.skills.iter().position(|s| s.fingerprint == fingerprint) {
            debug!(name = %self.skills[idx].name, "duplicate action sequence; updating existing skill");
            self.skills[idx].uses += 1;
            self.skills[idx].updated_at = now;
            self.persist(idx)?;
            return Ok(&self.skills[idx]);
        }

        if let Some(idx) = self.skills.iter().position(|s| s.name == name) {
            debug!(name = %name, version = self.skills[idx].version + 1, "superseding skill");
            let skill = &mut self.skills[idx];
            skill.actions = actions;
            skill.fingerprint = fingerprint;
            skill.trigger = trigger;
            skill.version += 1;
            skill.updated_at = now;
            self.persist(idx)?;
            return Ok(&self.skills[idx]);
        }

        let skill = Skill {
            id: uuid::Uuid::new_v4(),
            name,
            trigger,
            actions,
            fingerprint,
            version: 1,
            uses: 0,
            successes: 0,
            failures: 0,
            created_at: now,
            updated_at: now,
            embedding: None,
        };
        self.skills.push(skill);
        let idx = self.skills.len() - 1;
        self.persist(idx)?;
        Ok(&self.skills[idx])
    }

    /// Record one use of a skill and whether it succeeded.
    pub fn record_usage(&mut self, name: &str, success: bool) -> DuctorResult<()> {
        let Some(idx) = self.skills.iter().position(|s| s.name == name) else {
            return Err(DuctorError::MemoryWriteFailed {
                reason: format!("no skill named '{name}'"),
            });
        };
        let skill = &mut self.skills[idx];
        skill.uses += 1;
        if success {
            skill.successes += 1;
        } else {
            skill.failures += 1;
        }
        skill.updated_at = Utc::now();
        self.persist(idx)
    }

    /// Distill skills from a finished episode.
    ///
    /// For every plan step the reflector confirmed complete, the
    /// successfully executed actions recorded under that step become one
    /// skill, keyed by a slug of the step intent. Returns the names saved.
    pub fn learn_from_episode(&mut self, episode: &Episode) -> DuctorResult<Vec<String>> {
        let Some(plan) = &episode.plan else {
            return Ok(Vec::new());
        };

        let mut saved = Vec::new();
        for step in plan.steps.iter().filter(|s| s.status == StepStatus::Done) {
            let confirmed = episode.steps.iter().any(|r| {
                r.plan_step == Some(step.index)
                    && r.reflection.as_ref().is_some_and(|v| v.step_complete)
            });
            if !confirmed {
                continue;
            }

            let actions: Vec<Action> = episode
                .steps
                .iter()
                .filter(|r| {
                    r.plan_step == Some(step.index)
                        && r.result.as_ref().is_some_and(|res| res.success)
                })
                .map(|r| r.proposed.action.clone())
                .collect();
            if actions.is_empty() {
                continue;
            }

            let name = slug(&step.intent);
            self.save(&name, &step.intent, actions)?;
            saved.push(name);
        }
        Ok(saved)
    }

    fn persist(&self, idx: usize) -> DuctorResult<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let skill = &self.skills[idx];
        let path = root.join(format!("{}.json", slug(&skill.name)));
        let body = serde_json::to_string_pretty(skill).map_err(|e| {
            DuctorError::MemoryWriteFailed { reason: format!("failed to serialize skill: {}", e) }
        })?;
        fs::write(&path, body).map_err(|e| DuctorError::MemoryWriteFailed {
            reason: format!("failed to write '{}': {}", path.display(), e),
        })
    }
}

/// Lowercase, dash-separated, filesystem-safe slug of a name.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
