//! Stagnation detection.
//!
//! A bounded sliding window of (action-signature, magnitude, verdict)
//! triples drives a three-state machine: Progressing → Stalling → Stagnant.
//! Stagnant is a signal, not a terminal state — the orchestrator consumes
//! it to force a replan.
//!
//! Authority note: when the reflector reports "progress" but the
//! repeated-action heuristic fires, the detector wins. It is purely
//! observational, and a replan on a false positive is cheap; looping on a
//! false negative is not.

use std::collections::VecDeque;

use tracing::debug;

/// The detector's three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagnationState {
    Progressing,
    Stalling,
    Stagnant,
}

/// One observed step, as the detector sees it.
#[derive(Debug, Clone)]
pub struct StepSignal {
    /// Stable action signature (same kind + same target/text ⇒ equal).
    pub signature: String,
    /// Change magnitude from the change detector, in [0, 1].
    pub magnitude: f64,
    /// True when the reflector reported progress.
    pub progressed: bool,
}

/// The stagnation detector state machine.
#[derive(Debug)]
pub struct StagnationDetector {
    /// Window of the last `window_len` signals, oldest first.
    window: VecDeque<StepSignal>,
    window_len: usize,
    /// Consecutive stalls that escalate Stalling → Stagnant.
    stall_limit: u32,
    /// Magnitudes at or below this are trivial (no real change).
    trivial_magnitude: f64,
    consecutive_stalls: u32,
    state: StagnationState,
    /// Signals observed before this count are excluded from the
    /// repeated-action check. Advanced on replan so a fresh plan is not
    /// immediately re-flagged by pre-replan history (the window itself is
    /// retained for diagnostics).
    repeat_horizon: u64,
    observed: u64,
}

impl StagnationDetector {
    pub fn new(window_len: usize, stall_limit: u32, trivial_magnitude: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(window_len),
            window_len: window_len.max(1),
            stall_limit: stall_limit.max(1),
            trivial_magnitude,
            consecutive_stalls: 0,
            state: StagnationState::Progressing,
            repeat_horizon: 0,
            observed: 0,
        }
    }

    pub fn state(&self) -> StagnationState {
        self.state
    }

    /// The retained window, oldest first, for diagnostics.
    pub fn window(&self) -> impl Iterator<Item = &StepSignal> {
        self.window.iter()
    }

    /// Feed one completed step and return the new state.
    pub fn observe(&mut self, signal: StepSignal) -> StagnationState {
        self.observed += 1;

        // Progressing requires both: real change AND a progress verdict.
        if signal.magnitude > self.trivial_magnitude && signal.progressed {
            self.consecutive_stalls = 0;
            self.state = StagnationState::Progressing;
            self.push(signal);
            return self.state;
        }

        // Otherwise this observation stalls: trivial magnitude, or the
        // reflector said no progress.
        self.consecutive_stalls += 1;
        self.state = StagnationState::Stalling;

        let repeated = self.repeats_in_active_window(&signal.signature);
        self.push(signal);

        if self.consecutive_stalls >= self.stall_limit || repeated {
            self.state = StagnationState::Stagnant;
        }

        debug!(
            state = ?self.state,
            consecutive_stalls = self.consecutive_stalls,
            repeated,
            "stagnation observation"
        );
        self.state
    }

    /// Called after a replan. Clears the stall count and the repeated-action
    /// horizon; the window contents are kept for diagnostics. The state
    /// returns to Progressing only after the next genuinely progressing
    /// step.
    pub fn notify_replanned(&mut self) {
        self.consecutive_stalls = 0;
        self.repeat_horizon = self.observed;
        self.state = StagnationState::Stalling;
    }

    fn push(&mut self, signal: StepSignal) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(signal);
    }

    /// True when `signature` already appears among signals observed after
    /// the current horizon.
    fn repeats_in_active_window(&self, signature: &str) -> bool {
        let in_window = self.window.len() as u64;
        // Index (in self.observed counting) of the oldest window entry.
        // observed was already incremented for the incoming signal, which
        // is not yet pushed.
        let oldest = self.observed.saturating_sub(in_window) - 1;
        self.window
            .iter()
            .enumerate()
            .any(|(i, s)| oldest + 1 + i as u64 > self.repeat_horizon && s.signature == signature)
    }
}
