//! The session entity: one per logical window.
//!
//! A [`Session`] is a cheap shared handle. Its mutable fields live in
//! [`SessionData`] behind a lock and are only written from closures running
//! on the session's own [`TaskQueue`]; other threads take read snapshots.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::actor::move_drag::{DragPhase, MoveDrag};
use crate::actor::task_queue::TaskQueue;
use crate::common::collections::BTreeSet;
use crate::common::error::{WmError, WmResult};
use crate::layout_engine::{LayoutConstraints, WindowLimits};
use crate::model::ability_store::AbilityKey;
use crate::model::state::SessionState;
use crate::sys::geometry::Rect;
use crate::sys::render::NodeId;
use crate::sys::screen::DisplayId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(i32);

impl SessionId {
    pub const fn new(id: i32) -> Self { SessionId(id) }

    pub fn get(self) -> i32 { self.0 }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum WindowKind {
    Main,
    Sub,
    Dialog,
    System,
}

/// Per-kind behaviour switches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KindCaps {
    pub topmost_allowed: bool,
    pub supports_anchor: bool,
    pub focusable: bool,
    /// Destroyed together with its parent instead of being detached.
    pub requires_parent: bool,
    pub privileged: bool,
}

impl WindowKind {
    pub const fn caps(self) -> KindCaps {
        match self {
            WindowKind::Main => KindCaps {
                topmost_allowed: false,
                supports_anchor: false,
                focusable: true,
                requires_parent: false,
                privileged: false,
            },
            WindowKind::Sub => KindCaps {
                topmost_allowed: false,
                supports_anchor: true,
                focusable: true,
                requires_parent: true,
                privileged: false,
            },
            WindowKind::Dialog => KindCaps {
                topmost_allowed: false,
                supports_anchor: true,
                focusable: true,
                requires_parent: true,
                privileged: false,
            },
            WindowKind::System => KindCaps {
                topmost_allowed: true,
                supports_anchor: false,
                focusable: false,
                requires_parent: false,
                privileged: true,
            },
        }
    }
}

/// Why a session's rect last changed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum SizeChangeReason {
    #[default]
    Undefined,
    Move,
    Resize,
    /// First step of a pointer move.
    Drag,
    DragMove,
    DragEnd,
    DisplayChange,
}

impl SizeChangeReason {
    /// Reasons that make children recompute their rects.
    pub fn implies_layout(self) -> bool { self != SizeChangeReason::Undefined }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionProperty {
    Anchored(bool),
    FollowParent(bool),
    Focusable(bool),
    Movable(bool),
    Topmost(bool),
    Title(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum PropertyKey {
    Anchored,
    FollowParent,
    Focusable,
    Movable,
    Topmost,
    Title,
}

impl SessionProperty {
    pub fn key(&self) -> PropertyKey {
        match self {
            SessionProperty::Anchored(_) => PropertyKey::Anchored,
            SessionProperty::FollowParent(_) => PropertyKey::FollowParent,
            SessionProperty::Focusable(_) => PropertyKey::Focusable,
            SessionProperty::Movable(_) => PropertyKey::Movable,
            SessionProperty::Topmost(_) => PropertyKey::Topmost,
            SessionProperty::Title(_) => PropertyKey::Title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProps {
    pub anchored: bool,
    pub follow_parent: bool,
    pub focusable: bool,
    pub movable: bool,
    pub topmost: bool,
    pub title: String,
}

impl Default for SessionProps {
    fn default() -> Self {
        SessionProps {
            anchored: false,
            follow_parent: false,
            focusable: true,
            movable: true,
            topmost: false,
            title: String::new(),
        }
    }
}

impl SessionProps {
    pub fn get(&self, key: PropertyKey) -> SessionProperty {
        match key {
            PropertyKey::Anchored => SessionProperty::Anchored(self.anchored),
            PropertyKey::FollowParent => SessionProperty::FollowParent(self.follow_parent),
            PropertyKey::Focusable => SessionProperty::Focusable(self.focusable),
            PropertyKey::Movable => SessionProperty::Movable(self.movable),
            PropertyKey::Topmost => SessionProperty::Topmost(self.topmost),
            PropertyKey::Title => SessionProperty::Title(self.title.clone()),
        }
    }

    pub fn set(&mut self, prop: SessionProperty) {
        match prop {
            SessionProperty::Anchored(v) => self.anchored = v,
            SessionProperty::FollowParent(v) => self.follow_parent = v,
            SessionProperty::Focusable(v) => self.focusable = v,
            SessionProperty::Movable(v) => self.movable = v,
            SessionProperty::Topmost(v) => self.topmost = v,
            SessionProperty::Title(v) => self.title = v,
        }
    }
}

/// What a client supplies when it asks for a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub kind: WindowKind,
    pub display: DisplayId,
    /// Display-relative.
    pub rect: Rect,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub ability: Option<AbilityKey>,
    #[serde(default)]
    pub parent: Option<SessionId>,
    #[serde(default)]
    pub limits: Option<WindowLimits>,
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
    #[serde(default)]
    pub anchored: bool,
    #[serde(default)]
    pub follow_parent: bool,
    #[serde(default)]
    pub focusable: Option<bool>,
    /// Whether the requesting client holds system privileges.
    #[serde(default)]
    pub privileged: bool,
}

impl SessionConfig {
    pub fn new(kind: WindowKind, display: DisplayId, rect: Rect) -> Self {
        SessionConfig {
            kind,
            display,
            rect,
            title: String::new(),
            ability: None,
            parent: None,
            limits: None,
            aspect_ratio: None,
            anchored: false,
            follow_parent: false,
            focusable: None,
            privileged: false,
        }
    }

    pub fn with_parent(mut self, parent: SessionId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn anchored(mut self, anchored: bool) -> Self {
        self.anchored = anchored;
        self
    }

    pub fn follow_parent(mut self, follow: bool) -> Self {
        self.follow_parent = follow;
        self
    }
}

/// Mutable state of a session. Written only on the session's queue.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub state: SessionState,
    pub display: DisplayId,
    /// Display-relative rect most recently requested.
    pub requested: Rect,
    /// Global rect derived from `requested`.
    pub effective: Rect,
    pub reason: SizeChangeReason,
    pub constraints: LayoutConstraints,
    pub props: SessionProps,
    pub drag: MoveDrag,
    /// Rect relative to the parent's origin, captured when attached.
    pub parent_relative: Option<Rect>,
    pub node: Option<NodeId>,
    /// Displays this session is cloned onto.
    pub cloned_on: BTreeSet<DisplayId>,
    pub clone_count: u32,
}

impl SessionData {
    pub fn new(display: DisplayId, constraints: LayoutConstraints, props: SessionProps) -> Self {
        SessionData {
            state: SessionState::Disconnected,
            display,
            requested: Rect::ZERO,
            effective: Rect::ZERO,
            reason: SizeChangeReason::Undefined,
            constraints,
            props,
            drag: MoveDrag::default(),
            parent_relative: None,
            node: None,
            cloned_on: BTreeSet::new(),
            clone_count: 0,
        }
    }

    pub fn can_update_rect(&self, id: SessionId) -> WmResult<()> {
        if !self.state.accepts_layout() {
            return Err(WmError::invalid_session(
                id,
                format!("cannot change the rect of a session in state {}", self.state),
            ));
        }
        Ok(())
    }
}

pub struct Session {
    id: SessionId,
    kind: WindowKind,
    privileged: bool,
    ability: Option<AbilityKey>,
    queue: TaskQueue,
    data: RwLock<SessionData>,
    first_frame: Mutex<bool>,
    first_frame_cv: Condvar,
}

impl Session {
    pub fn new(
        id: SessionId,
        kind: WindowKind,
        privileged: bool,
        ability: Option<AbilityKey>,
        queue: TaskQueue,
        data: SessionData,
    ) -> Self {
        Session {
            id,
            kind,
            privileged,
            ability,
            queue,
            data: RwLock::new(data),
            first_frame: Mutex::new(false),
            first_frame_cv: Condvar::new(),
        }
    }

    pub fn id(&self) -> SessionId { self.id }

    pub fn kind(&self) -> WindowKind { self.kind }

    pub fn is_privileged(&self) -> bool { self.privileged }

    pub fn ability(&self) -> Option<&AbilityKey> { self.ability.as_ref() }

    pub fn queue(&self) -> &TaskQueue { &self.queue }

    pub fn read(&self) -> RwLockReadGuard<'_, SessionData> { self.data.read() }

    /// Only for closures running on this session's queue.
    pub fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        debug_assert!(
            self.queue.is_current(),
            "session {} mutated off its queue",
            self.id
        );
        self.data.write()
    }

    pub fn state(&self) -> SessionState { self.data.read().state }

    pub fn mark_first_frame(&self) -> bool {
        let mut ready = self.first_frame.lock();
        let first = !*ready;
        *ready = true;
        self.first_frame_cv.notify_all();
        first
    }

    pub fn has_first_frame(&self) -> bool { *self.first_frame.lock() }

    pub fn wait_first_frame(&self, timeout: Duration) -> WmResult<()> {
        let mut ready = self.first_frame.lock();
        if !*ready && self.first_frame_cv.wait_while_for(&mut ready, |r| !*r, timeout).timed_out() {
            return Err(WmError::Timeout(timeout));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).field("kind", &self.kind).finish()
    }
}

/// Point-in-time view of a session, safe to hand to any observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub kind: WindowKind,
    pub state: SessionState,
    pub display: DisplayId,
    pub requested: Rect,
    pub effective: Rect,
    pub reason: SizeChangeReason,
    pub aspect_ratio: f64,
    pub limits: WindowLimits,
    pub z_order: Option<u64>,
    pub focused: bool,
    pub parent: Option<SessionId>,
    pub children: Vec<SessionId>,
    pub props: SessionProps,
    pub drag_phase: DragPhase,
    pub clone_count: u32,
    pub cloned_on: Vec<DisplayId>,
    pub first_frame: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_windows_need_parents_and_support_anchoring() {
        let caps = WindowKind::Sub.caps();
        assert!(caps.requires_parent && caps.supports_anchor);
        assert!(!WindowKind::Main.caps().requires_parent);
        assert!(WindowKind::System.caps().privileged);
    }

    #[test]
    fn property_get_set_round_trip() {
        let mut props = SessionProps::default();
        assert!(props.focusable && props.movable);
        props.set(SessionProperty::Title("notes".into()));
        props.set(SessionProperty::Anchored(true));
        assert_eq!(props.get(PropertyKey::Title), SessionProperty::Title("notes".into()));
        assert_eq!(props.get(PropertyKey::Anchored), SessionProperty::Anchored(true));
        assert_eq!(SessionProperty::Movable(false).key(), PropertyKey::Movable);
    }

    #[test]
    fn undefined_reason_does_not_propagate() {
        assert!(!SizeChangeReason::Undefined.implies_layout());
        assert!(SizeChangeReason::DragEnd.implies_layout());
    }
}
