//! Frame-to-frame change detection.
//!
//! Two signals are combined: the Hamming distance between the frames'
//! 64-bit average hashes, and a global similarity score over the luma
//! buffers. Either strong signal alone declares "changed" (OR, not AND) —
//! a localized but significant change can keep global similarity high
//! while flipping hash bits, and vice versa.

use ductor_contracts::frame::{hash_distance, Frame};
use tracing::debug;

/// The report produced for one frame pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeReport {
    pub changed: bool,
    /// Overall change magnitude in [0, 1]; symmetric in argument order.
    pub magnitude: f64,
    pub hash_distance: u32,
    /// Global similarity in [0, 1]; 1.0 means identical buffers.
    pub similarity: f64,
}

impl ChangeReport {
    /// The report used when no previous frame exists: the initial capture
    /// counts as a full-magnitude change.
    pub fn initial() -> Self {
        Self {
            changed: true,
            magnitude: 1.0,
            hash_distance: u32::MAX,
            similarity: 0.0,
        }
    }
}

/// Compares logical-resolution frames and grades the difference.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    /// Hash bits that must differ before the hash signal fires.
    pub hash_threshold: u32,
    /// Similarity below this fires the similarity signal.
    pub similarity_threshold: f64,
    /// Magnitudes at or below this count as "trivial" (cursor blink,
    /// clock tick) for the stagnation detector.
    pub trivial_magnitude: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            hash_threshold: 5,
            similarity_threshold: 0.985,
            trivial_magnitude: 0.02,
        }
    }
}

impl ChangeDetector {
    /// Compare two frames.
    ///
    /// `changed` is true when the hash distance exceeds `hash_threshold`
    /// OR similarity falls below `similarity_threshold`. The magnitude is
    /// `max(hash_distance / 64, 1 - similarity)` and is symmetric in
    /// argument order, so the boolean outcome is too.
    pub fn compare(&self, prev: &Frame, curr: &Frame) -> ChangeReport {
        let hd = hash_distance(prev.phash, curr.phash);
        let similarity = luma_similarity(prev, curr);

        let changed = hd > self.hash_threshold || similarity < self.similarity_threshold;
        let magnitude = (hd as f64 / 64.0).max(1.0 - similarity).clamp(0.0, 1.0);

        debug!(
            hash_distance = hd,
            similarity,
            magnitude,
            changed,
            "frames compared"
        );

        ChangeReport {
            changed,
            magnitude,
            hash_distance: hd,
            similarity,
        }
    }

    /// True when a magnitude is below the trivial threshold.
    pub fn is_trivial(&self, magnitude: f64) -> bool {
        magnitude <= self.trivial_magnitude
    }
}

/// Mean-absolute-difference similarity over two luma buffers.
///
/// Returns a score in [0, 1], 1.0 for identical buffers. Mismatched
/// dimensions score 0.0 — a resolution change is always a full change.
fn luma_similarity(a: &Frame, b: &Frame) -> f64 {
    if a.width != b.width || a.height != b.height || a.luma.len() != b.luma.len() {
        return 0.0;
    }
    if a.luma.is_empty() {
        return 1.0;
    }
    let total: u64 = a
        .luma
        .iter()
        .zip(b.luma.iter())
        .map(|(&pa, &pb)| (pa as i32 - pb as i32).unsigned_abs() as u64)
        .sum();
    let mad = total as f64 / a.luma.len() as f64;
    1.0 - (mad / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ductor_contracts::frame::Frame;

    fn flat_frame(level: u8) -> Frame {
        Frame::from_luma(64, 64, 1.0, vec![level; 64 * 64])
    }

    fn frame_with_patch(base: u8, patch: u8, patch_rows: usize) -> Frame {
        let mut luma = vec![base; 64 * 64];
        for row in luma.chunks_mut(64).take(patch_rows) {
            row.fill(patch);
        }
        Frame::from_luma(64, 64, 1.0, luma)
    }

    #[test]
    fn identical_frames_do_not_change() {
        let detector = ChangeDetector::default();
        let a = flat_frame(128);
        let b = flat_frame(128);
        let report = detector.compare(&a, &b);
        assert!(!report.changed);
        assert_eq!(report.hash_distance, 0);
        assert!(report.magnitude <= detector.trivial_magnitude);
    }

    #[test]
    fn gross_change_is_detected() {
        let detector = ChangeDetector::default();
        let a = flat_frame(20);
        let b = frame_with_patch(20, 230, 32);
        let report = detector.compare(&a, &b);
        assert!(report.changed);
        assert!(report.magnitude > detector.trivial_magnitude);
    }

    #[test]
    fn boolean_outcome_is_symmetric() {
        let detector = ChangeDetector::default();
        let a = frame_with_patch(40, 200, 8);
        let b = flat_frame(40);
        let ab = detector.compare(&a, &b);
        let ba = detector.compare(&b, &a);
        assert_eq!(ab.changed, ba.changed);
        assert_eq!(ab.hash_distance, ba.hash_distance);
        assert!((ab.magnitude - ba.magnitude).abs() < 1e-9);
    }

    #[test]
    fn localized_change_fires_via_hash_signal() {
        // A bright band big enough to flip hash cells but small enough to
        // keep global similarity above the threshold.
        let detector = ChangeDetector {
            hash_threshold: 3,
            similarity_threshold: 0.5,
            trivial_magnitude: 0.02,
        };
        let a = flat_frame(30);
        let b = frame_with_patch(30, 250, 16);
        let report = detector.compare(&a, &b);
        assert!(
            report.similarity >= detector.similarity_threshold,
            "test premise: similarity stays high ({})",
            report.similarity
        );
        assert!(report.changed, "hash signal alone must declare change");
    }

    #[test]
    fn resolution_change_is_a_full_change() {
        let detector = ChangeDetector::default();
        let a = flat_frame(128);
        let b = Frame::from_luma(32, 32, 1.0, vec![128; 32 * 32]);
        let report = detector.compare(&a, &b);
        assert!(report.changed);
        assert_eq!(report.similarity, 0.0);
        assert_eq!(report.magnitude, 1.0);
    }
}
