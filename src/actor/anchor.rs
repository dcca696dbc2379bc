//! Keeps children that are anchored to a parent attached to it while the
//! parent is dragged or zoomed across displays.
//!
//! During the gesture an anchored, visible child gets a clone of its
//! presentation node on every physical display its projected rect overlaps.
//! The clones live until the gesture ends.

use tracing::{debug, warn};

use crate::actor::broadcast::SceneEvent;
use crate::common::error::{WmError, WmResult};
use crate::layout_engine::{ResizeEdges, compute_effective_rect, coordinates};
use crate::model::session::{SessionData, SessionId, SizeChangeReason};
use crate::sys::geometry::Rect;
use crate::sys::render::RenderService;
use crate::sys::screen::{DisplayId, DisplayRegistry};

/// A parent's new placement, as handed to each following child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowUpdate {
    pub parent: SessionId,
    /// Global.
    pub parent_rect: Rect,
    pub parent_display: DisplayId,
    pub reason: SizeChangeReason,
    /// The parent is visible and its rect is being driven by a gesture.
    pub during_gesture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    /// Relative to `display`.
    pub requested: Rect,
    /// Global.
    pub effective: Rect,
    pub display: DisplayId,
}

pub struct AnchorFollower<'a> {
    displays: &'a DisplayRegistry,
    render: &'a dyn RenderService,
}

impl<'a> AnchorFollower<'a> {
    pub fn new(displays: &'a DisplayRegistry, render: &'a dyn RenderService) -> Self {
        AnchorFollower { displays, render }
    }

    /// Where `child` lands given the parent's new rect. The child keeps its
    /// offset from the parent's origin and its own constraints.
    pub fn project(&self, child: &SessionData, update: &FollowUpdate) -> WmResult<Projection> {
        let relative = match child.parent_relative {
            Some(relative) => relative,
            None => coordinates::to_relative(child.effective, update.parent_rect)?,
        };
        let global = coordinates::to_global(relative, update.parent_rect.origin())?;
        let requested = self.displays.to_display_relative(global, update.parent_display)?;
        let resolved =
            compute_effective_rect(requested, child.requested, &child.constraints, ResizeEdges::empty())?;
        let effective = self.displays.to_global(resolved, update.parent_display)?;
        Ok(Projection {
            requested,
            effective,
            display: update.parent_display,
        })
    }

    /// Clones the child's node onto newly overlapped physical displays.
    /// Hidden children and children without a node are skipped.
    pub fn track_clones(&self, id: SessionId, child: &mut SessionData) -> Vec<SceneEvent> {
        let mut events = Vec::new();
        if !child.state.is_visible() {
            return events;
        }
        let Some(node) = child.node else {
            return events;
        };
        for target in self.displays.physical_displays_overlapping(&child.effective) {
            if target == child.display || child.cloned_on.contains(&target) {
                continue;
            }
            if let Err(e) = self.render.clone_node(node, target) {
                warn!(%id, display = %target, ?e, "clone request failed");
                continue;
            }
            child.cloned_on.insert(target);
            child.clone_count += 1;
            debug!(%id, display = %target, count = child.clone_count, "cloned onto display");
            events.push(SceneEvent::CloneChanged {
                id,
                display: target,
                added: true,
                count: child.clone_count,
            });
        }
        events
    }

    /// Removes every clone. The counter never drops below zero.
    pub fn release_clones(&self, id: SessionId, child: &mut SessionData) -> Vec<SceneEvent> {
        let displays = std::mem::take(&mut child.cloned_on);
        displays
            .into_iter()
            .map(|display| self.release_one(id, child, display))
            .collect()
    }

    /// Removes the clone on `display`, if any.
    pub fn release_clone_on(
        &self,
        id: SessionId,
        child: &mut SessionData,
        display: DisplayId,
    ) -> Option<SceneEvent> {
        child.cloned_on.remove(&display).then(|| self.release_one(id, child, display))
    }

    fn release_one(&self, id: SessionId, child: &mut SessionData, display: DisplayId) -> SceneEvent {
        if let Some(node) = child.node {
            self.render.remove_clone(node, display);
        }
        child.clone_count = child.clone_count.saturating_sub(1);
        SceneEvent::CloneChanged {
            id,
            display,
            added: false,
            count: child.clone_count,
        }
    }
}

/// Checks that `child` may be anchored at all.
pub fn ensure_anchorable(id: SessionId, supports_anchor: bool) -> WmResult<()> {
    if supports_anchor {
        Ok(())
    } else {
        Err(WmError::invalid_parameter(format!("{id} does not support anchoring")))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::layout_engine::{LayoutConstraints, WindowLimits};
    use crate::model::session::SessionProps;
    use crate::model::state::SessionState;
    use crate::sys::render::{HeadlessRender, NodeId};
    use crate::sys::screen::ScreenDescriptor;

    fn displays() -> DisplayRegistry {
        let mut cast = ScreenDescriptor::new(3, Rect::new(0, 1080, 1920, 1080));
        cast.is_virtual = true;
        DisplayRegistry::new([
            ScreenDescriptor::new(1, Rect::new(0, 0, 1920, 1080)),
            ScreenDescriptor::new(2, Rect::new(1920, 0, 1920, 1080)),
            cast,
        ])
    }

    fn child(state: SessionState) -> SessionData {
        let mut data = SessionData::new(
            DisplayId(1),
            LayoutConstraints::new(WindowLimits::default(), 0.0),
            SessionProps { anchored: true, ..SessionProps::default() },
        );
        data.state = state;
        data.requested = Rect::new(50, 50, 200, 200);
        data.effective = Rect::new(50, 50, 200, 200);
        data.parent_relative = Some(Rect::new(0, 0, 200, 200));
        data.node = Some(NodeId(9));
        data
    }

    fn update(x: i32) -> FollowUpdate {
        FollowUpdate {
            parent: SessionId::new(1),
            parent_rect: Rect::new(x, 50, 500, 500),
            parent_display: DisplayId(1),
            reason: SizeChangeReason::DragMove,
            during_gesture: true,
        }
    }

    #[test]
    fn projection_keeps_offset_from_parent() {
        let (d, r) = (displays(), HeadlessRender::new());
        let follower = AnchorFollower::new(&d, &r);
        let p = follower.project(&child(SessionState::Foreground), &update(1800)).unwrap();
        assert_eq!(p.effective, Rect::new(1800, 50, 200, 200));
        assert_eq!(p.requested, Rect::new(1800, 50, 200, 200));
    }

    #[test]
    fn clones_only_onto_new_physical_displays() {
        let (d, r) = (displays(), HeadlessRender::new());
        let follower = AnchorFollower::new(&d, &r);
        let mut c = child(SessionState::Foreground);
        c.effective = Rect::new(1800, 1000, 200, 200);
        let events = follower.track_clones(SessionId::new(2), &mut c);
        assert_eq!(events.len(), 1);
        assert_eq!(c.clone_count, 1);
        // A second step over the same displays adds nothing.
        assert!(follower.track_clones(SessionId::new(2), &mut c).is_empty());
        assert_eq!(r.clones_of(NodeId(9)), vec![DisplayId(2)]);

        follower.release_clones(SessionId::new(2), &mut c);
        assert_eq!(c.clone_count, 0);
        assert!(r.clones_of(NodeId(9)).is_empty());
        // Releasing again never goes below zero.
        follower.release_clones(SessionId::new(2), &mut c);
        assert_eq!(c.clone_count, 0);
    }

    #[test]
    fn background_child_is_never_cloned() {
        let (d, r) = (displays(), HeadlessRender::new());
        let follower = AnchorFollower::new(&d, &r);
        let mut c = child(SessionState::Background);
        c.effective = Rect::new(1800, 0, 200, 200);
        assert!(follower.track_clones(SessionId::new(2), &mut c).is_empty());
        assert_eq!(c.clone_count, 0);
    }

    #[test]
    fn anchoring_requires_kind_support() {
        assert!(ensure_anchorable(SessionId::new(1), true).is_ok());
        assert!(ensure_anchorable(SessionId::new(1), false).is_err());
    }
}
