//! Set-of-Mark grounding.
//!
//! Turns a capability-provided element tree — or, when none is available, a
//! purely visual detection pass over the frame — into the numbered target
//! set actions address. Mark assignment is deterministic: a fixed frame and
//! tree always yield identical marks, so tests and replays are stable.

use ductor_contracts::{
    error::{DuctorError, DuctorResult},
    frame::Frame,
    target::{ElementNode, ElementTree, Grounded, Rect, Role, Target},
};
use tracing::{debug, warn};

/// Upper bound on targets per step, shared by both detection paths.
/// Keeps proposer prompts bounded on dense screens.
const MAX_TARGETS: usize = 80;

/// Minimum blob area (px²) the visual fallback keeps.
const MIN_BLOB_AREA: u64 = 100;

/// Luma delta from the frame mean that counts as "ink" in the fallback.
const INK_DELTA: i32 = 48;

/// The grounding engine. Owns the generation counter that enforces the
/// one-step lifetime of marks.
#[derive(Debug, Default)]
pub struct GroundingEngine {
    generation: u64,
}

impl GroundingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ground one perception cycle.
    ///
    /// Prefers the semantic tree; falls back to visual detection when the
    /// capability returned none. Fails with `NoTargetsFound` when both
    /// paths produce zero targets — the loop must never act against an
    /// empty set.
    pub fn ground(&mut self, frame: &Frame, tree: Option<&ElementTree>) -> DuctorResult<Grounded> {
        self.generation += 1;

        let mut boxes = match tree {
            Some(tree) => semantic_candidates(tree),
            None => Vec::new(),
        };
        if boxes.is_empty() {
            if tree.is_some() {
                warn!("semantic tree yielded no usable targets; trying visual fallback");
            }
            boxes = visual_candidates(frame);
        }

        if boxes.is_empty() {
            return Err(DuctorError::NoTargetsFound);
        }

        boxes.truncate(MAX_TARGETS);

        // Stable top-to-bottom, left-to-right order over top-left corners.
        // The sort is stable, so detection order breaks remaining ties and
        // the same layout yields the same marks across runs.
        boxes.sort_by_key(|c| (c.bounds.y, c.bounds.x));

        let targets = boxes
            .into_iter()
            .enumerate()
            .map(|(i, c)| Target {
                mark: i as u32 + 1,
                bounds: c.bounds,
                role: c.role,
                text: c.text,
            })
            .collect::<Vec<_>>();

        debug!(
            generation = self.generation,
            targets = targets.len(),
            "frame grounded"
        );

        Ok(Grounded {
            generation: self.generation,
            targets,
        })
    }
}

/// An unnumbered detection, before mark assignment.
struct Candidate {
    bounds: Rect,
    role: Role,
    text: Option<String>,
}

// ── Semantic path ─────────────────────────────────────────────────────────────

/// Map platform role strings onto the normalized role vocabulary.
fn normalize_role(platform_role: &str) -> Role {
    let stripped = platform_role.strip_prefix("AX").unwrap_or(platform_role);
    match stripped.to_lowercase().as_str() {
        "button" => Role::Button,
        "textfield" | "textarea" | "searchfield" | "edit" => Role::TextField,
        "link" | "hyperlink" => Role::Link,
        "checkbox" => Role::Checkbox,
        "combobox" | "popupbutton" => Role::ComboBox,
        "menuitem" => Role::MenuItem,
        "statictext" | "text" | "label" => Role::Text,
        "control" | "unknown" => Role::Control,
        _ => Role::Other(platform_role.to_string()),
    }
}

/// Keep in-viewport, interactive, enabled, visibly-painted elements.
fn semantic_candidates(tree: &ElementTree) -> Vec<Candidate> {
    let mut out = Vec::new();
    for (idx, node) in tree.nodes.iter().enumerate() {
        if !node.enabled || !node.in_viewport || node.bounds.area() == 0 {
            continue;
        }
        let role = normalize_role(&node.role);
        if !role.is_interactive() {
            continue;
        }
        if is_occluded(idx, node, &tree.nodes) {
            continue;
        }
        out.push(Candidate {
            bounds: node.bounds,
            role,
            text: node.title.clone().or_else(|| node.value.clone()),
        });
    }
    out
}

/// Occlusion check for one node.
///
/// With z-order information: occluded when any other node with a strictly
/// higher z fully contains this node's bounds. Without it: paint order is
/// the authority — a later node that fully contains this one covers it.
fn is_occluded(idx: usize, node: &ElementNode, nodes: &[ElementNode]) -> bool {
    match node.z_order {
        Some(z) => nodes.iter().enumerate().any(|(i, other)| {
            i != idx
                && other.z_order.is_some_and(|oz| oz > z)
                && other.bounds.contains(&node.bounds)
        }),
        None => nodes
            .iter()
            .skip(idx + 1)
            .any(|later| later.bounds.contains(&node.bounds)),
    }
}

// ── Visual fallback ───────────────────────────────────────────────────────────

/// Detect text blocks and bounded controls purely from pixels.
///
/// "Ink" pixels (luma far from the frame mean) are merged into connected
/// components by row-run tracking. Components are filtered by area and
/// classified best-effort: short, wide blobs read as text, the rest as
/// controls.
fn visual_candidates(frame: &Frame) -> Vec<Candidate> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w == 0 || h == 0 || frame.luma.len() < w * h {
        return Vec::new();
    }

    let mean: i32 =
        (frame.luma.iter().map(|&p| p as u64).sum::<u64>() / frame.luma.len() as u64) as i32;

    // Open components carry their bounding box and the x-extent of their
    // runs in the previous row, so the next row's runs can attach.
    struct Open {
        bounds: Rect,
        prev_x0: usize,
        prev_x1: usize,
        last_row: usize,
    }
    let mut open: Vec<Open> = Vec::new();
    let mut closed: Vec<Rect> = Vec::new();

    for y in 0..h {
        let row = &frame.luma[y * w..(y + 1) * w];
        let mut x = 0usize;
        while x < w {
            // Find the next ink run in this row.
            while x < w && (row[x] as i32 - mean).abs() <= INK_DELTA {
                x += 1;
            }
            if x >= w {
                break;
            }
            let run_start = x;
            while x < w && (row[x] as i32 - mean).abs() > INK_DELTA {
                x += 1;
            }
            let run_end = x; // exclusive

            // Attach to an open component whose previous-row run overlaps.
            let attached = open.iter_mut().find(|c| {
                c.last_row + 1 == y && c.prev_x0 < run_end && run_start < c.prev_x1
            });
            match attached {
                Some(c) => {
                    let x0 = c.bounds.x.min(run_start as i32);
                    let x1 = (c.bounds.x + c.bounds.w as i32).max(run_end as i32);
                    c.bounds = Rect::new(x0, c.bounds.y, (x1 - x0) as u32, (y as i32 - c.bounds.y + 1) as u32);
                    c.prev_x0 = run_start;
                    c.prev_x1 = run_end;
                    c.last_row = y;
                }
                None => open.push(Open {
                    bounds: Rect::new(run_start as i32, y as i32, (run_end - run_start) as u32, 1),
                    prev_x0: run_start,
                    prev_x1: run_end,
                    last_row: y,
                }),
            }
        }

        // Close components no run extended this row.
        let mut still_open = Vec::new();
        for c in open.drain(..) {
            if c.last_row == y {
                still_open.push(c);
            } else {
                closed.push(c.bounds);
            }
        }
        open = still_open;
    }
    closed.extend(open.into_iter().map(|c| c.bounds));

    let max_area = (w as u64 * h as u64) / 4;
    let mut blobs: Vec<Rect> = closed
        .into_iter()
        .filter(|b| b.area() >= MIN_BLOB_AREA && b.area() <= max_area)
        .collect();

    // Largest blobs first before the cap, matching the semantic path's
    // bias toward prominent elements on dense screens.
    blobs.sort_by_key(|b| std::cmp::Reverse(b.area()));
    blobs.truncate(MAX_TARGETS);

    blobs
        .into_iter()
        .map(|bounds| {
            let wide_and_short = bounds.h <= 24 && bounds.w >= bounds.h * 2;
            Candidate {
                role: if wide_and_short { Role::Text } else { Role::Control },
                bounds,
                text: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ductor_contracts::frame::Frame;
    use ductor_contracts::target::{ElementNode, ElementTree, Rect};

    fn node(role: &str, bounds: Rect) -> ElementNode {
        ElementNode {
            role: role.to_string(),
            title: Some(format!("{role}@{},{}", bounds.x, bounds.y)),
            value: None,
            bounds,
            enabled: true,
            in_viewport: true,
            z_order: None,
        }
    }

    fn blank_frame() -> Frame {
        Frame::from_luma(200, 100, 1.0, vec![128; 200 * 100])
    }

    // ── Semantic path ────────────────────────────────────────────────────────

    #[test]
    fn marks_follow_reading_order() {
        let tree = ElementTree {
            nodes: vec![
                node("AXButton", Rect::new(50, 40, 20, 10)),
                node("AXButton", Rect::new(5, 10, 20, 10)),
                node("AXLink", Rect::new(100, 10, 20, 10)),
            ],
        };
        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&blank_frame(), Some(&tree)).unwrap();

        // Top row first (left to right), then the lower button.
        assert_eq!(grounded.targets.len(), 3);
        assert_eq!(grounded.targets[0].bounds, Rect::new(5, 10, 20, 10));
        assert_eq!(grounded.targets[1].bounds, Rect::new(100, 10, 20, 10));
        assert_eq!(grounded.targets[2].bounds, Rect::new(50, 40, 20, 10));
        assert_eq!(
            grounded.targets.iter().map(|t| t.mark).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn grounding_is_deterministic() {
        let tree = ElementTree {
            nodes: vec![
                node("Button", Rect::new(10, 10, 30, 12)),
                node("Link", Rect::new(60, 10, 30, 12)),
                node("TextField", Rect::new(10, 40, 80, 16)),
            ],
        };
        let frame = blank_frame();
        let mut a = GroundingEngine::new();
        let mut b = GroundingEngine::new();
        let ga = a.ground(&frame, Some(&tree)).unwrap();
        let gb = b.ground(&frame, Some(&tree)).unwrap();
        assert_eq!(ga.targets, gb.targets);

        // Repeated calls on the same engine keep the marks but advance the
        // generation, so stale references cannot re-resolve.
        let ga2 = a.ground(&frame, Some(&tree)).unwrap();
        assert_eq!(ga.targets, ga2.targets);
        assert_ne!(ga.generation, ga2.generation);
    }

    #[test]
    fn non_interactive_disabled_and_empty_nodes_are_dropped() {
        let mut text = node("AXStaticText", Rect::new(0, 0, 50, 10));
        text.title = Some("just a label".to_string());
        let mut disabled = node("AXButton", Rect::new(0, 20, 50, 10));
        disabled.enabled = false;
        let mut offscreen = node("AXButton", Rect::new(0, 40, 50, 10));
        offscreen.in_viewport = false;
        let zero = node("AXButton", Rect::new(0, 60, 0, 0));
        let kept = node("AXButton", Rect::new(0, 80, 50, 10));

        let tree = ElementTree { nodes: vec![text, disabled, offscreen, zero, kept] };
        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&blank_frame(), Some(&tree)).unwrap();

        assert_eq!(grounded.targets.len(), 1);
        assert_eq!(grounded.targets[0].bounds, Rect::new(0, 80, 50, 10));
    }

    #[test]
    fn occluded_elements_are_dropped() {
        // Paint order: the dialog (later node) fully covers the button.
        let tree = ElementTree {
            nodes: vec![
                node("AXButton", Rect::new(20, 20, 30, 10)),
                node("AXButton", Rect::new(0, 0, 200, 100)),
            ],
        };
        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&blank_frame(), Some(&tree)).unwrap();
        assert_eq!(grounded.targets.len(), 1);
        assert_eq!(grounded.targets[0].bounds, Rect::new(0, 0, 200, 100));
    }

    #[test]
    fn z_order_overrides_paint_order() {
        let mut covered = node("AXButton", Rect::new(20, 20, 30, 10));
        covered.z_order = Some(1);
        // Earlier in paint order but explicitly above.
        let mut overlay = node("AXButton", Rect::new(0, 0, 200, 100));
        overlay.z_order = Some(5);

        let tree = ElementTree { nodes: vec![overlay.clone(), covered.clone()] };
        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&blank_frame(), Some(&tree)).unwrap();
        assert_eq!(grounded.targets.len(), 1);
        assert_eq!(grounded.targets[0].bounds, overlay.bounds);
    }

    // ── Visual fallback ──────────────────────────────────────────────────────

    #[test]
    fn visual_fallback_finds_bright_boxes() {
        let mut luma = vec![30u8; 200 * 100];
        // Two bright rectangles on a dark background.
        for y in 10..40 {
            for x in 20..60 {
                luma[y * 200 + x] = 230;
            }
        }
        for y in 50..90 {
            for x in 120..160 {
                luma[y * 200 + x] = 230;
            }
        }
        let frame = Frame::from_luma(200, 100, 1.0, luma);

        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&frame, None).unwrap();

        assert_eq!(grounded.targets.len(), 2);
        assert_eq!(grounded.targets[0].bounds, Rect::new(20, 10, 40, 30));
        assert_eq!(grounded.targets[1].bounds, Rect::new(120, 50, 40, 40));
        assert!(grounded.targets.iter().all(|t| t.role == Role::Control));
    }

    #[test]
    fn blank_frame_without_tree_fails_with_no_targets() {
        let mut engine = GroundingEngine::new();
        let result = engine.ground(&blank_frame(), None);
        assert!(matches!(result, Err(DuctorError::NoTargetsFound)));
    }

    #[test]
    fn empty_tree_falls_back_to_pixels() {
        let mut luma = vec![20u8; 200 * 100];
        for y in 40..60 {
            for x in 40..120 {
                luma[y * 200 + x] = 240;
            }
        }
        let frame = Frame::from_luma(200, 100, 1.0, luma);
        let tree = ElementTree { nodes: vec![] };

        let mut engine = GroundingEngine::new();
        let grounded = engine.ground(&frame, Some(&tree)).unwrap();
        assert_eq!(grounded.targets.len(), 1);
    }
}
