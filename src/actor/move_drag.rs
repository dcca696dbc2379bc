//! Gesture state for interactive move and resize of one session.
//!
//! ```text
//! Idle --down--> PointerDown --threshold--> Moving --up--> Idle
//! Idle --down on hot zone--> Resizing --up--> Idle
//! Idle <--> ZoomDuringDrag   (driven by a parent's gesture)
//! ```
//!
//! All coordinates are global. The rects produced here are requests; they
//! still go through the rect controller before they become effective.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::trace;

use crate::common::error::{WmError, WmResult};
use crate::layout_engine::ResizeEdges;
use crate::model::session::SizeChangeReason;
use crate::sys::geometry::{Point, Rect};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointerId(pub u32);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum DragPhase {
    #[default]
    Idle,
    PointerDown,
    Moving,
    Resizing,
    /// A parent is being dragged and this anchored session follows it.
    ZoomDuringDrag,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GestureStep {
    pub rect: Rect,
    pub reason: SizeChangeReason,
    pub edges: ResizeEdges,
}

/// Edges whose hot zone contains `p`. Empty when `p` is outside `rect` or
/// in its interior.
pub fn hot_zone_edges(rect: &Rect, p: Point, zone: i32) -> ResizeEdges {
    let mut edges = ResizeEdges::empty();
    if zone <= 0 || !rect.contains(p) {
        return edges;
    }
    if p.x < rect.x.saturating_add(zone) {
        edges |= ResizeEdges::LEFT;
    } else if p.x >= rect.right().saturating_sub(zone) {
        edges |= ResizeEdges::RIGHT;
    }
    if p.y < rect.y.saturating_add(zone) {
        edges |= ResizeEdges::TOP;
    } else if p.y >= rect.bottom().saturating_sub(zone) {
        edges |= ResizeEdges::BOTTOM;
    }
    edges
}

#[derive(Debug, Clone, Default)]
pub struct MoveDrag {
    phase: DragPhase,
    pointer: Option<PointerId>,
    start_rect: Rect,
    start_point: Point,
    edges: ResizeEdges,
    current: Rect,
}

impl MoveDrag {
    pub fn phase(&self) -> DragPhase { self.phase }

    /// Moving or resizing, i.e. rect changes are being produced.
    pub fn is_active(&self) -> bool { matches!(self.phase, DragPhase::Moving | DragPhase::Resizing) }

    /// True while this session's rect is being driven by a gesture, its own
    /// or its parent's.
    pub fn in_gesture(&self) -> bool { self.is_active() || self.phase == DragPhase::ZoomDuringDrag }

    pub fn start_rect(&self) -> Rect { self.start_rect }

    pub fn pointer_down(
        &mut self,
        pointer: PointerId,
        point: Point,
        rect: Rect,
        hot_zone: i32,
    ) -> WmResult<DragPhase> {
        if let Some(owner) = self.pointer {
            return Err(WmError::RepeatOperation(format!(
                "pointer {} already owns the gesture",
                owner.0
            )));
        }
        if self.phase == DragPhase::ZoomDuringDrag {
            return Err(WmError::RepeatOperation("session follows a parent gesture".into()));
        }
        if !rect.contains(point) {
            return Err(WmError::invalid_parameter(format!(
                "pointer-down at ({}, {}) is outside {rect}",
                point.x, point.y
            )));
        }
        self.edges = hot_zone_edges(&rect, point, hot_zone);
        self.phase = if self.edges.is_empty() {
            DragPhase::PointerDown
        } else {
            DragPhase::Resizing
        };
        self.pointer = Some(pointer);
        self.start_rect = rect;
        self.current = rect;
        self.start_point = point;
        trace!(phase = %self.phase, edges = ?self.edges, "gesture started");
        Ok(self.phase)
    }

    fn check_owner(&self, pointer: PointerId) -> WmResult<()> {
        match self.pointer {
            Some(owner) if owner != pointer => Err(WmError::invalid_parameter(format!(
                "pointer {} does not own the gesture",
                pointer.0
            ))),
            _ => Ok(()),
        }
    }

    /// A step that would leave the `i32` range is refused and the gesture
    /// stays where it was.
    pub fn pointer_move(
        &mut self,
        pointer: PointerId,
        point: Point,
        threshold: i32,
    ) -> WmResult<Option<GestureStep>> {
        self.check_owner(pointer)?;
        let (next, reason) = match self.phase {
            DragPhase::Idle | DragPhase::ZoomDuringDrag => return Ok(None),
            DragPhase::PointerDown => {
                if self.start_point.max_axis_distance(point) < threshold.unsigned_abs() {
                    return Ok(None);
                }
                (DragPhase::Moving, SizeChangeReason::Drag)
            }
            DragPhase::Moving => (DragPhase::Moving, SizeChangeReason::DragMove),
            DragPhase::Resizing => (DragPhase::Resizing, SizeChangeReason::Resize),
        };
        let rect = self.step_rect(point).ok_or_else(|| {
            WmError::invalid_parameter(format!(
                "pointer at ({}, {}) moves {} out of range",
                point.x, point.y, self.start_rect
            ))
        })?;
        self.phase = next;
        self.current = rect;
        Ok(Some(GestureStep { rect, reason, edges: self.edges }))
    }

    fn step_rect(&self, point: Point) -> Option<Rect> {
        let delta = point.checked_offset_from(self.start_point)?;
        let s = self.start_rect;
        if self.phase != DragPhase::Resizing {
            return s.checked_translate(delta);
        }
        let mut r = s;
        if self.edges.contains(ResizeEdges::LEFT) {
            r.x = s.x.checked_add(delta.dx)?;
            r.width = s.width.checked_sub(delta.dx)?;
        } else if self.edges.contains(ResizeEdges::RIGHT) {
            r.width = s.width.checked_add(delta.dx)?;
        }
        if self.edges.contains(ResizeEdges::TOP) {
            r.y = s.y.checked_add(delta.dy)?;
            r.height = s.height.checked_sub(delta.dy)?;
        } else if self.edges.contains(ResizeEdges::BOTTOM) {
            r.height = s.height.checked_add(delta.dy)?;
        }
        Some(r)
    }

    /// Ends the gesture. Returns the final step, tagged `DragEnd`, when the
    /// pointer actually moved or resized the session.
    pub fn pointer_up(&mut self, pointer: PointerId) -> WmResult<Option<GestureStep>> {
        self.check_owner(pointer)?;
        let was_active = self.is_active();
        if self.pointer.is_none() {
            return Ok(None);
        }
        let last = GestureStep {
            rect: self.current,
            reason: SizeChangeReason::DragEnd,
            edges: self.edges,
        };
        self.reset();
        Ok(was_active.then_some(last))
    }

    /// Abandons the gesture without a final rect. Returns whether one was in
    /// progress.
    pub fn cancel(&mut self) -> bool {
        let had = self.pointer.is_some() || self.phase == DragPhase::ZoomDuringDrag;
        self.reset();
        had
    }

    pub fn enter_zoom(&mut self) -> bool {
        if self.phase != DragPhase::Idle {
            return false;
        }
        self.phase = DragPhase::ZoomDuringDrag;
        true
    }

    pub fn leave_zoom(&mut self) -> bool {
        if self.phase != DragPhase::ZoomDuringDrag {
            return false;
        }
        self.phase = DragPhase::Idle;
        true
    }

    fn reset(&mut self) { *self = MoveDrag::default() }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const P: PointerId = PointerId(1);
    const WIN: Rect = Rect::new(100, 100, 400, 300);

    #[test]
    fn move_starts_after_threshold() {
        let mut md = MoveDrag::default();
        assert_eq!(md.pointer_down(P, Point::new(300, 200), WIN, 8).unwrap(), DragPhase::PointerDown);
        assert_eq!(md.pointer_move(P, Point::new(302, 201), 4).unwrap(), None);
        let step = md.pointer_move(P, Point::new(310, 200), 4).unwrap().unwrap();
        assert_eq!(step.reason, SizeChangeReason::Drag);
        assert_eq!(step.rect, Rect::new(110, 100, 400, 300));
        let step = md.pointer_move(P, Point::new(350, 250), 4).unwrap().unwrap();
        assert_eq!(step.reason, SizeChangeReason::DragMove);
        assert_eq!(step.rect, Rect::new(150, 150, 400, 300));
        let end = md.pointer_up(P).unwrap().unwrap();
        assert_eq!(end.rect, Rect::new(150, 150, 400, 300));
        assert_eq!(end.reason, SizeChangeReason::DragEnd);
        assert_eq!(md.phase(), DragPhase::Idle);
    }

    #[test]
    fn second_pointer_is_rejected() {
        let mut md = MoveDrag::default();
        md.pointer_down(P, Point::new(300, 200), WIN, 8).unwrap();
        let res = md.pointer_down(PointerId(2), Point::new(300, 200), WIN, 8);
        assert!(matches!(res, Err(WmError::RepeatOperation(_))));
        assert!(md.pointer_move(PointerId(2), Point::new(350, 200), 4).is_err());
    }

    #[test]
    fn click_without_travel_emits_nothing() {
        let mut md = MoveDrag::default();
        md.pointer_down(P, Point::new(300, 200), WIN, 8).unwrap();
        assert_eq!(md.pointer_up(P).unwrap(), None);
        assert_eq!(md.phase(), DragPhase::Idle);
    }

    #[test]
    fn hot_zones_pick_edges() {
        assert_eq!(hot_zone_edges(&WIN, Point::new(102, 250), 8), ResizeEdges::LEFT);
        assert_eq!(hot_zone_edges(&WIN, Point::new(499, 399), 8), ResizeEdges::RIGHT | ResizeEdges::BOTTOM);
        assert_eq!(hot_zone_edges(&WIN, Point::new(300, 250), 8), ResizeEdges::empty());
        assert_eq!(hot_zone_edges(&WIN, Point::new(90, 250), 8), ResizeEdges::empty());
    }

    #[test]
    fn left_edge_resize_moves_origin() {
        let mut md = MoveDrag::default();
        assert_eq!(md.pointer_down(P, Point::new(101, 250), WIN, 8).unwrap(), DragPhase::Resizing);
        let step = md.pointer_move(P, Point::new(61, 260), 4).unwrap().unwrap();
        assert_eq!(step.reason, SizeChangeReason::Resize);
        assert_eq!(step.rect, Rect::new(60, 100, 440, 300));
        assert_eq!(step.rect.right(), WIN.right());
    }

    #[test]
    fn cancel_returns_to_idle_without_rect() {
        let mut md = MoveDrag::default();
        md.pointer_down(P, Point::new(300, 200), WIN, 8).unwrap();
        md.pointer_move(P, Point::new(400, 200), 4).unwrap();
        assert!(md.cancel());
        assert_eq!(md.phase(), DragPhase::Idle);
        assert_eq!(md.pointer_up(P).unwrap(), None);
    }

    #[test]
    fn out_of_range_step_keeps_the_gesture() {
        let mut md = MoveDrag::default();
        let far = Rect::new(i32::MAX - 500, 0, 400, 300);
        md.pointer_down(P, Point::new(i32::MAX - 300, 100), far, 8).unwrap();
        let res = md.pointer_move(P, Point::new(i32::MIN, 100), 4);
        assert!(matches!(res, Err(WmError::InvalidParameter(_))));
        assert_eq!(md.phase(), DragPhase::PointerDown);
        let step = md.pointer_move(P, Point::new(i32::MAX, 100), 4).unwrap().unwrap();
        assert_eq!(step.rect.x, i32::MAX - 200);
        assert_eq!(step.rect.right(), i32::MAX);
        let step = md.pointer_move(P, Point::new(i32::MAX - 310, 100), 4).unwrap().unwrap();
        assert_eq!(step.rect, Rect::new(i32::MAX - 510, 0, 400, 300));
        assert_eq!(step.reason, SizeChangeReason::DragMove);
    }

    #[test]
    fn zoom_only_from_idle() {
        let mut md = MoveDrag::default();
        assert!(md.enter_zoom());
        assert!(md.in_gesture());
        assert!(md.pointer_down(P, Point::new(300, 200), WIN, 8).is_err());
        assert!(md.leave_zoom());
        md.pointer_down(P, Point::new(300, 200), WIN, 8).unwrap();
        assert!(!md.enter_zoom());
    }
}
