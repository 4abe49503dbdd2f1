//! Captured screen frames and their perceptual hashes.
//!
//! A `Frame` is immutable once captured. Episode records reference frames by
//! `FrameRef` (id + hash), never by pixel buffer, so persisted records stay
//! compact and independently replayable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub uuid::Uuid);

impl FrameId {
    /// Create a new, unique frame ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

/// A captured screen frame at logical resolution.
///
/// The pixel buffer is a row-major grayscale (luma) plane; the capability
/// adapter is responsible for downscaling physical captures to logical
/// resolution so coordinates stay aligned on HiDPI displays.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    /// Wall-clock capture time (UTC).
    pub captured_at: DateTime<Utc>,
    /// Logical width in pixels.
    pub width: u32,
    /// Logical height in pixels.
    pub height: u32,
    /// Device-to-logical scale factor (1.0 on standard displays, 2.0 on HiDPI).
    pub scale_factor: f64,
    /// Row-major luma buffer, `width * height` bytes.
    pub luma: Vec<u8>,
    /// 64-bit average perceptual hash of the luma buffer.
    pub phash: u64,
}

impl Frame {
    /// Build a frame from a luma buffer, deriving the perceptual hash.
    pub fn from_luma(width: u32, height: u32, scale_factor: f64, luma: Vec<u8>) -> Self {
        let phash = average_hash(width, height, &luma);
        Self {
            id: FrameId::new(),
            captured_at: Utc::now(),
            width,
            height,
            scale_factor,
            luma,
            phash,
        }
    }

    /// The compact reference stored in episode records.
    pub fn reference(&self) -> FrameRef {
        FrameRef {
            id: self.id,
            phash: self.phash,
            captured_at: self.captured_at,
        }
    }
}

/// A compact, serializable reference to a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    pub id: FrameId,
    pub phash: u64,
    pub captured_at: DateTime<Utc>,
}

/// 64-bit average hash (aHash) over an 8x8 downsample of the luma buffer.
///
/// Bit i is set when downsampled cell i is brighter than the mean.
/// An empty or zero-area buffer hashes to 0.
pub fn average_hash(width: u32, height: u32, luma: &[u8]) -> u64 {
    const GRID: u32 = 8;
    if width == 0 || height == 0 || luma.is_empty() {
        return 0;
    }

    // Box-downsample into an 8x8 grid of cell means.
    let mut cells = [0u64; (GRID * GRID) as usize];
    for (gy, cell_row) in cells.chunks_mut(GRID as usize).enumerate() {
        let y0 = gy as u32 * height / GRID;
        let y1 = ((gy as u32 + 1) * height / GRID).max(y0 + 1).min(height);
        for (gx, cell) in cell_row.iter_mut().enumerate() {
            let x0 = gx as u32 * width / GRID;
            let x1 = ((gx as u32 + 1) * width / GRID).max(x0 + 1).min(width);
            let mut sum = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += luma[(y * width + x) as usize] as u64;
                }
            }
            *cell = sum / ((y1 - y0) as u64 * (x1 - x0) as u64);
        }
    }

    let mean: u64 = cells.iter().sum::<u64>() / cells.len() as u64;
    let mut bits = 0u64;
    for (i, cell) in cells.iter().enumerate() {
        if *cell > mean {
            bits |= 1 << i;
        }
    }
    bits
}

/// Hamming distance between two 64-bit perceptual hashes.
pub fn hash_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
