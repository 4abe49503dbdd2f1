//! Task plans and plan steps.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Abandoned,
}

/// One ordered step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    /// Natural-language intent, e.g. "Click the Search icon".
    pub intent: String,
    /// Textual completion predicate the reflector checks against, e.g.
    /// "Search bar is visible".
    pub completion: String,
    pub status: StepStatus,
}

/// An ordered task plan produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: uuid::Uuid,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    /// Index of the active step; equals `steps.len()` when complete.
    pub active: usize,
}

impl Plan {
    /// Build a plan from (intent, completion) pairs; the first step starts
    /// active, the rest pending.
    pub fn new(goal: impl Into<String>, steps: Vec<(String, String)>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, (intent, completion))| PlanStep {
                index,
                intent,
                completion,
                status: if index == 0 {
                    StepStatus::Active
                } else {
                    StepStatus::Pending
                },
            })
            .collect();
        Self {
            id: uuid::Uuid::new_v4(),
            goal: goal.into(),
            steps,
            active: 0,
        }
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.active)
    }

    /// Mark the active step done and activate the next one.
    pub fn advance(&mut self) {
        if let Some(step) = self.steps.get_mut(self.active) {
            step.status = StepStatus::Done;
        }
        self.active += 1;
        if let Some(step) = self.steps.get_mut(self.active) {
            step.status = StepStatus::Active;
        }
    }

    /// Mark the active step and everything after it abandoned.
    ///
    /// Used when a replan discards the remainder of a plan.
    pub fn abandon_remaining(&mut self) {
        for step in self.steps.iter_mut().skip(self.active) {
            step.status = StepStatus::Abandoned;
        }
        self.active = self.steps.len();
    }

    pub fn is_complete(&self) -> bool {
        self.active >= self.steps.len()
    }

    /// Replan-loop detection: two plans are equivalent when their ordered
    /// step intents match after lowercasing and whitespace normalization.
    /// Ids, statuses, and completion predicates are ignored.
    pub fn is_equivalent(&self, other: &Plan) -> bool {
        fn normalize(s: &str) -> String {
            s.split_whitespace()
                .map(|w| w.to_lowercase())
                .collect::<Vec<_>>()
                .join(" ")
        }
        self.steps.len() == other.steps.len()
            && self
                .steps
                .iter()
                .zip(other.steps.iter())
                .all(|(a, b)| normalize(&a.intent) == normalize(&b.intent))
    }
}
