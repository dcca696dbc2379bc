//! Turns a requested rect into the effective rect of a session.
//!
//! The effective rect is never written by callers. It is always the output
//! of [`compute_effective_rect`] for the latest request, so it satisfies the
//! session's limits and, when one is set, its aspect ratio.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::limits::{WindowLimits, is_ratio_enabled, validate_aspect_ratio};
use crate::common::error::{WmError, WmResult};
use crate::sys::geometry::Rect;

bitflags! {
    /// Edges being manipulated by a resize. Corners are two edges.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ResizeEdges: u8 {
        const LEFT   = 1 << 0;
        const TOP    = 1 << 1;
        const RIGHT  = 1 << 2;
        const BOTTOM = 1 << 3;

        const HORIZONTAL = Self::LEFT.bits() | Self::RIGHT.bits();
        const VERTICAL   = Self::TOP.bits() | Self::BOTTOM.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutConstraints {
    pub limits: WindowLimits,
    /// width / height; `0.0` when unconstrained.
    pub aspect_ratio: f64,
}

impl LayoutConstraints {
    pub fn new(limits: WindowLimits, aspect_ratio: f64) -> Self {
        LayoutConstraints { limits, aspect_ratio }
    }

    /// Full consistency check, run before any rect is derived.
    pub fn validate(&self) -> WmResult<()> {
        self.limits.validate()?;
        validate_aspect_ratio(self.aspect_ratio, &self.limits).map(|_| ())
    }

    pub fn is_satisfied_by(&self, rect: &Rect) -> bool {
        self.limits.contains_size(rect.width, rect.height)
            && super::limits::satisfies_ratio(rect.width, rect.height, self.aspect_ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Width,
    Height,
}

fn dimension_to_keep(requested: &Rect, prior: &Rect, edges: ResizeEdges) -> Keep {
    let horizontal = edges.intersects(ResizeEdges::HORIZONTAL);
    let vertical = edges.intersects(ResizeEdges::VERTICAL);
    match (horizontal, vertical) {
        (false, true) => Keep::Height,
        (true, true) => {
            let dw = requested.width.abs_diff(prior.width);
            let dh = requested.height.abs_diff(prior.height);
            if dh > dw { Keep::Height } else { Keep::Width }
        }
        _ => Keep::Width,
    }
}

/// Start coordinate that keeps `start + len` fixed once the length becomes
/// `resolved`.
fn keep_far_edge(start: i32, len: i32, resolved: i32) -> WmResult<i32> {
    start
        .checked_add(len)
        .and_then(|far| far.checked_sub(resolved))
        .ok_or_else(|| WmError::invalid_parameter(format!("edge at {start} + {len} is out of range")))
}

/// Resolves `requested` against `constraints`.
///
/// `edges` names the edges the user is dragging; the dimension they move is
/// preserved when the aspect ratio forces the other one to change, and the
/// opposite edges stay fixed. On error the caller keeps `prior`.
pub fn compute_effective_rect(
    requested: Rect,
    prior: Rect,
    constraints: &LayoutConstraints,
    edges: ResizeEdges,
) -> WmResult<Rect> {
    constraints.validate()?;
    let limits = &constraints.limits;
    let ratio = constraints.aspect_ratio;

    let (width, height) = if is_ratio_enabled(ratio) {
        let Some((h_lo, h_hi)) = limits.heights_for_ratio(ratio) else {
            return Err(WmError::invalid_parameter("aspect ratio cannot be satisfied"));
        };
        let height = match dimension_to_keep(&requested, &prior, edges) {
            Keep::Width => {
                let width = limits.clamp_width(requested.width);
                (f64::from(width) / ratio).round() as i32
            }
            Keep::Height => requested.height,
        }
        .clamp(h_lo, h_hi);
        let width = limits.clamp_width((f64::from(height) * ratio).round() as i32);
        (width, height)
    } else {
        (limits.clamp_width(requested.width), limits.clamp_height(requested.height))
    };

    let x = if edges.contains(ResizeEdges::LEFT) {
        keep_far_edge(requested.x, requested.width, width)?
    } else {
        requested.x
    };
    let y = if edges.contains(ResizeEdges::TOP) {
        keep_far_edge(requested.y, requested.height, height)?
    } else {
        requested.y
    };
    let effective = Rect::new(x, y, width, height);
    trace!(%requested, %effective, ?edges, "computed effective rect");
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn c(limits: WindowLimits, ratio: f64) -> LayoutConstraints { LayoutConstraints::new(limits, ratio) }

    #[test]
    fn clamps_into_limits() {
        let cons = c(WindowLimits::new(100, 100, 800, 600), 0.0);
        let r = compute_effective_rect(
            Rect::new(5, 6, 2000, 10),
            Rect::ZERO,
            &cons,
            ResizeEdges::empty(),
        )
        .unwrap();
        assert_eq!(r, Rect::new(5, 6, 800, 100));
    }

    #[test]
    fn limit_boundaries_are_inclusive() {
        let cons = c(WindowLimits::new(100, 100, 800, 600), 0.0);
        let req = Rect::new(0, 0, 800, 100);
        assert_eq!(
            compute_effective_rect(req, Rect::ZERO, &cons, ResizeEdges::empty()).unwrap(),
            req
        );
    }

    #[test]
    fn inconsistent_limits_report_invalid_parameter() {
        let cons = c(WindowLimits::new(900, 100, 800, 600), 0.0);
        let res = compute_effective_rect(
            Rect::new(0, 0, 850, 300),
            Rect::ZERO,
            &cons,
            ResizeEdges::empty(),
        );
        assert!(matches!(res, Err(WmError::InvalidParameter(_))));
    }

    #[test]
    fn right_edge_drag_keeps_width() {
        let cons = c(WindowLimits::default(), 2.0);
        let prior = Rect::new(0, 0, 400, 200);
        let r = compute_effective_rect(Rect::new(0, 0, 600, 200), prior, &cons, ResizeEdges::RIGHT)
            .unwrap();
        assert_eq!(r, Rect::new(0, 0, 600, 300));
    }

    #[test]
    fn bottom_edge_drag_keeps_height() {
        let cons = c(WindowLimits::default(), 2.0);
        let prior = Rect::new(0, 0, 400, 200);
        let r = compute_effective_rect(Rect::new(0, 0, 400, 250), prior, &cons, ResizeEdges::BOTTOM)
            .unwrap();
        assert_eq!(r, Rect::new(0, 0, 500, 250));
    }

    #[test]
    fn top_left_corner_keeps_bottom_right_fixed() {
        let cons = c(WindowLimits::default(), 1.0);
        let prior = Rect::new(100, 100, 300, 300);
        // Dragged left by 100 and up by 20: width delta dominates.
        let requested = Rect::new(0, 80, 400, 320);
        let r = compute_effective_rect(requested, prior, &cons, ResizeEdges::LEFT | ResizeEdges::TOP)
            .unwrap();
        assert_eq!(r, Rect::new(0, 0, 400, 400));
        assert_eq!(r.right(), prior.right());
        assert_eq!(r.bottom(), prior.bottom());
    }

    #[test]
    fn ratio_and_limits_hold_for_arbitrary_requests() {
        let limits = WindowLimits::new(120, 90, 1900, 1000);
        let edge_sets = [
            ResizeEdges::empty(),
            ResizeEdges::LEFT,
            ResizeEdges::BOTTOM,
            ResizeEdges::RIGHT | ResizeEdges::BOTTOM,
            ResizeEdges::LEFT | ResizeEdges::TOP,
        ];
        let mut seed: u32 = 0x2545_f491;
        let mut next = move |m: i32| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 8) as i32 % m
        };
        for ratio in [0.0, 0.5, 0.75, 1.0, 16.0 / 9.0, 1.9] {
            let cons = c(limits, ratio);
            for edges in edge_sets {
                for _ in 0..200 {
                    let req = Rect::new(next(400) - 200, next(400) - 200, next(3000), next(3000));
                    let prior = Rect::new(0, 0, 300 + next(300), 300 + next(300));
                    let r = compute_effective_rect(req, prior, &cons, edges).unwrap();
                    assert!(cons.is_satisfied_by(&r), "{r} for {req} ratio {ratio}");
                }
            }
        }
    }

    #[test]
    fn left_edge_near_the_coordinate_limit_is_rejected() {
        let cons = c(WindowLimits::new(100, 100, 800, 600), 0.0);
        let requested = Rect::new(i32::MAX - 50, 0, 400, 300);
        let res = compute_effective_rect(requested, Rect::ZERO, &cons, ResizeEdges::LEFT);
        assert!(matches!(res, Err(WmError::InvalidParameter(_))));
        // Without a fixed far edge the origin is taken as is.
        let r = compute_effective_rect(requested, Rect::ZERO, &cons, ResizeEdges::RIGHT).unwrap();
        assert_eq!(r, requested);
        // Sizes are clamped before the far edge is kept.
        let huge = Rect::new(0, -10, i32::MAX, -50);
        let corner = ResizeEdges::LEFT | ResizeEdges::TOP;
        let r = compute_effective_rect(huge, Rect::new(0, 0, 300, 300), &cons, corner).unwrap();
        assert_eq!(r, Rect::new(i32::MAX - 800, -160, 800, 100));
    }

    #[test]
    fn unsatisfiable_ratio_fails_without_output() {
        let cons = c(WindowLimits::new(2000, 2000, 3000, 3000), 0.1);
        let res = compute_effective_rect(
            Rect::new(0, 0, 2500, 2500),
            Rect::ZERO,
            &cons,
            ResizeEdges::empty(),
        );
        assert!(matches!(res, Err(WmError::InvalidParameter(_))));
    }
}
