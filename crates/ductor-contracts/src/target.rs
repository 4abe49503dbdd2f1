//! Grounded targets and the normalized element tree.
//!
//! The capability adapter returns whatever accessibility shape its platform
//! provides, normalized into the flat `ElementTree` defined here. The
//! grounding engine turns that tree (or a visual fallback) into the numbered
//! `Target` set that actions address.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// True when the rectangles share any interior area.
    pub fn intersects(&self, other: &Rect) -> bool {
        let (ax1, ay1) = (self.x + self.w as i32, self.y + self.h as i32);
        let (bx1, by1) = (other.x + other.w as i32, other.y + other.h as i32);
        self.x < bx1 && other.x < ax1 && self.y < by1 && other.y < ay1
    }

    /// True when `other` lies entirely within this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w as i32 <= self.x + self.w as i32
            && other.y + other.h as i32 <= self.y + self.h as i32
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.w as i32 && y >= self.y && y < self.y + self.h as i32
    }

    /// Center point, used when an action addresses a target by mark.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w as i32 / 2, self.y + self.h as i32 / 2)
    }
}

/// The role of a grounded target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Button,
    TextField,
    Link,
    Checkbox,
    ComboBox,
    MenuItem,
    /// Static text detected semantically or by the visual fallback.
    Text,
    /// A bounded visual control whose precise role is unknown.
    Control,
    Other(String),
}

impl Role {
    /// Roles the grounding engine considers actionable.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Role::Button
                | Role::TextField
                | Role::Link
                | Role::Checkbox
                | Role::ComboBox
                | Role::MenuItem
                | Role::Control
        )
    }
}

/// One node of the normalized element tree.
///
/// Nodes are listed in paint order: later nodes draw above earlier ones.
/// `z_order`, when the platform provides it, takes precedence over paint
/// order for occlusion checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementNode {
    /// Platform role string (e.g. "AXButton", "Button", "hyperlink").
    pub role: String,
    pub title: Option<String>,
    pub value: Option<String>,
    pub bounds: Rect,
    pub enabled: bool,
    pub in_viewport: bool,
    pub z_order: Option<i32>,
}

/// The flat, normalized element tree returned by the capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementTree {
    pub nodes: Vec<ElementNode>,
}

/// A single addressable target with its Set-of-Mark number.
///
/// Targets are derived, never mutated, and regenerated every perception
/// cycle. Marks are 1-based and unique within one grounding generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub mark: u32,
    pub bounds: Rect,
    pub role: Role,
    pub text: Option<String>,
}

/// The grounded target set for exactly one step.
///
/// The generation number enforces the staleness invariant: a mark proposed
/// against one generation must not resolve against another. `resolve`
/// rejects mismatched generations instead of silently re-resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grounded {
    pub generation: u64,
    pub targets: Vec<Target>,
}

impl Grounded {
    /// Resolve a mark proposed against `generation`.
    ///
    /// Returns `None` when the generation does not match (a stale
    /// reference) or the mark does not exist in this set.
    pub fn resolve(&self, mark: u32, generation: u64) -> Option<&Target> {
        if generation != self.generation {
            return None;
        }
        self.targets.iter().find(|t| t.mark == mark)
    }
}
