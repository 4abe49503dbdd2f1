//! The frame store: current and previous captures.

use ductor_contracts::frame::Frame;

/// Holds the current and previous captured frame for one episode.
///
/// The orchestrator pushes every capture; the change detector compares the
/// two ends of the store. Frames older than one step are archived into the
/// episode log by reference and dropped here.
#[derive(Debug, Default)]
pub struct FrameStore {
    previous: Option<Frame>,
    current: Option<Frame>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotate in a new capture; the old current becomes previous.
    pub fn push(&mut self, frame: Frame) {
        self.previous = self.current.take();
        self.current = Some(frame);
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Frame> {
        self.previous.as_ref()
    }

    /// Drop both frames at episode end.
    pub fn clear(&mut self) {
        self.previous = None;
        self.current = None;
    }
}
