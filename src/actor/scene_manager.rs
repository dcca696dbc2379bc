//! Client and display boundary of the window manager.
//!
//! Every request is keyed by a [`SessionId`] and turned into a closure on
//! that session's queue. Calls that return a value block on the queue for at
//! most `settings.tasks.sync_timeout_ms`. Work a closure causes on other
//! sessions (children following a parent, focus moving to a successor) is
//! posted to their queues and never run on the current one.
//!
//! A closure never holds its session's write lock while it locks another
//! session, and events are emitted only after the lock is released.

mod replay;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
pub use replay::{Record, Reply, Request, replay};
use static_assertions::assert_impl_all;
use tracing::{debug, info, instrument, trace, warn};

use crate::actor::anchor::{AnchorFollower, FollowUpdate, ensure_anchorable};
use crate::actor::broadcast::{Broadcaster, SceneEvent};
use crate::actor::move_drag::{DragPhase, PointerId};
use crate::actor::task_queue::TaskExecutor;
use crate::common::config::Config;
use crate::common::error::{WmError, WmResult};
use crate::layout_engine::{
    LayoutConstraints, ResizeEdges, WindowLimits, compute_effective_rect, coordinates,
    validate_aspect_ratio,
};
use crate::model::ability_store::AbilityStore;
use crate::model::focus::FocusChange;
use crate::model::session::{
    PropertyKey, Session, SessionConfig, SessionData, SessionProperty, SessionProps,
};
use crate::model::{FocusRegistry, Hierarchy, SessionId, SessionSnapshot, SessionState, SizeChangeReason};
use crate::sys::geometry::{Point, Rect};
use crate::sys::render::{HeadlessRender, RenderService};
use crate::sys::screen::{DisplayEvent, DisplayId, DisplayRegistry};

/// A rect change as applied on the session's own queue.
#[derive(Debug, Clone, Copy)]
struct Placement {
    /// Display-relative.
    requested: Rect,
    /// `None` keeps the current display.
    display: Option<DisplayId>,
    reason: SizeChangeReason,
    edges: ResizeEdges,
    /// Replaces the session's constraints once the rect resolves.
    constraints: Option<LayoutConstraints>,
}

impl Placement {
    fn new(requested: Rect, reason: SizeChangeReason) -> Self {
        Placement {
            requested,
            display: None,
            reason,
            edges: ResizeEdges::empty(),
            constraints: None,
        }
    }
}

struct Core {
    config: Config,
    executor: TaskExecutor,
    hierarchy: Hierarchy,
    focus: FocusRegistry,
    displays: DisplayRegistry,
    render: Arc<dyn RenderService>,
    events: Broadcaster,
    abilities: AbilityStore,
    next_id: AtomicI32,
    record: Mutex<Record>,
}

pub struct SceneManager {
    core: Arc<Core>,
}

assert_impl_all!(SceneManager: Send, Sync);
assert_impl_all!(Session: Send, Sync);
assert_impl_all!(Hierarchy: Send, Sync);

impl SceneManager {
    pub fn new(config: Config, render: Arc<dyn RenderService>) -> Self {
        let executor = TaskExecutor::new(config.settings.tasks.worker_threads);
        let displays = DisplayRegistry::new(config.screens());
        info!(
            workers = config.settings.tasks.worker_threads,
            displays = displays.all().len(),
            "scene manager started"
        );
        SceneManager {
            core: Arc::new(Core {
                config,
                executor,
                hierarchy: Hierarchy::new(),
                focus: FocusRegistry::new(),
                displays,
                render,
                events: Broadcaster::new(),
                abilities: AbilityStore::new(),
                next_id: AtomicI32::new(0),
                record: Mutex::new(Record::default()),
            }),
        }
    }

    /// A manager backed by a render service that draws nothing.
    pub fn headless(config: Config) -> (Self, Arc<HeadlessRender>) {
        let render = Arc::new(HeadlessRender::new());
        (Self::new(config, render.clone()), render)
    }

    /// Starts writing every incoming request to `record`.
    pub fn set_record(&self, record: Record) { *self.core.record.lock() = record; }

    pub fn config(&self) -> &Config { &self.core.config }

    pub fn events(&self) -> &Broadcaster { &self.core.events }

    pub fn displays(&self) -> &DisplayRegistry { &self.core.displays }

    pub fn abilities(&self) -> &AbilityStore { &self.core.abilities }

    #[instrument(skip_all, fields(kind = %config.kind, display = %config.display))]
    pub fn create_session(&self, config: SessionConfig) -> WmResult<SessionId> {
        self.core.record(|| Request::CreateSession(config.clone()));
        self.core.create_session(config)
    }

    /// `Disconnected -> Connecting -> Connected`, creating the presentation
    /// node on the way.
    pub fn connect(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Connect(id));
        self.core.sync(id, |core, s| core.connect_on_queue(s))
    }

    #[instrument(skip(self))]
    pub fn show(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Show(id));
        self.core.sync(id, |core, s| core.show_on_queue(s))
    }

    /// Moves the session to `Background`. Hiding a background session is a
    /// successful no-op.
    #[instrument(skip(self))]
    pub fn hide(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Hide(id));
        self.core.sync(id, |core, s| core.hide_on_queue(s))
    }

    pub fn request_focus(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::RequestFocus(id));
        self.core.sync(id, |core, s| {
            core.require_visible(s)?;
            core.focus_session(s)
        })
    }

    pub fn raise(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Raise(id));
        self.core.sync(id, |core, s| {
            core.require_visible(s)?;
            let event = core.raise_with_children(s.id())?;
            core.emit(event);
            Ok(())
        })
    }

    /// Requests `rect` (relative to the session's display) and returns the
    /// effective global rect. On error nothing changes.
    pub fn update_rect(&self, id: SessionId, rect: Rect, reason: SizeChangeReason) -> WmResult<Rect> {
        self.core.record(|| Request::UpdateRect { id, rect, reason });
        self.core.sync(id, move |core, s| core.apply_rect(s, Placement::new(rect, reason)))
    }

    /// Like [`SceneManager::update_rect`] but places the session on `display`.
    pub fn update_rect_on(
        &self,
        id: SessionId,
        rect: Rect,
        reason: SizeChangeReason,
        display: DisplayId,
    ) -> WmResult<Rect> {
        self.core.record(|| Request::UpdateRectOn { id, rect, reason, display });
        self.core.sync(id, move |core, s| {
            core.apply_rect(s, Placement {
                display: Some(display),
                ..Placement::new(rect, reason)
            })
        })
    }

    /// Sets width / height. Values near zero remove the constraint.
    pub fn set_aspect_ratio(&self, id: SessionId, ratio: f64) -> WmResult<()> {
        self.core.record(|| Request::SetAspectRatio { id, ratio });
        self.core.sync(id, move |core, s| {
            let (limits, requested) = {
                let data = s.read();
                data.can_update_rect(s.id())?;
                (data.constraints.limits, data.requested)
            };
            let ratio = validate_aspect_ratio(ratio, &limits)?;
            core.apply_rect(s, Placement {
                constraints: Some(LayoutConstraints::new(limits, ratio)),
                ..Placement::new(requested, SizeChangeReason::Resize)
            })?;
            if let Some(key) = s.ability() {
                core.abilities.set_aspect_ratio(key, ratio);
            }
            Ok(())
        })
    }

    pub fn set_limits(&self, id: SessionId, limits: WindowLimits) -> WmResult<()> {
        self.core.record(|| Request::SetLimits { id, limits });
        self.core.sync(id, move |core, s| {
            limits.validate()?;
            let (ratio, requested) = {
                let data = s.read();
                data.can_update_rect(s.id())?;
                (data.constraints.aspect_ratio, data.requested)
            };
            let ratio = validate_aspect_ratio(ratio, &limits)?;
            core.apply_rect(s, Placement {
                constraints: Some(LayoutConstraints::new(limits, ratio)),
                ..Placement::new(requested, SizeChangeReason::Resize)
            })?;
            if let Some(key) = s.ability() {
                core.abilities.set_limits(key, limits);
            }
            Ok(())
        })
    }

    pub fn set_property(&self, id: SessionId, property: SessionProperty) -> WmResult<()> {
        self.core.record(|| Request::SetProperty { id, property: property.clone() });
        self.core.sync(id, move |core, s| core.set_property_on_queue(s, property))
    }

    pub fn property(&self, id: SessionId, key: PropertyKey) -> WmResult<SessionProperty> {
        Ok(self.core.hierarchy.get(id)?.read().props.get(key))
    }

    /// Attaches `child` under `parent`. The edit runs on the parent's queue.
    pub fn add_child(&self, parent: SessionId, child: SessionId) -> WmResult<()> {
        self.core.record(|| Request::AddChild { parent, child });
        self.core.sync(parent, move |core, s| core.add_child_on_queue(s, child))
    }

    /// Returns whether `child` was attached to `parent` before the call.
    pub fn remove_child(&self, parent: SessionId, child: SessionId) -> WmResult<bool> {
        self.core.record(|| Request::RemoveChild { parent, child });
        self.core.sync(parent, move |core, _| {
            let removed = core.hierarchy.remove_child(parent, child);
            if removed {
                core.emit(SceneEvent::HierarchyChanged { parent, child, attached: false });
                core.detach_follower(child);
            }
            Ok(removed)
        })
    }

    /// Moves `child` under `parent`, or makes it a root, in one closure on
    /// the child's queue. Returns the previous parent.
    pub fn reparent(&self, child: SessionId, parent: Option<SessionId>) -> WmResult<Option<SessionId>> {
        self.core.record(|| Request::Reparent { child, parent });
        self.core.sync(child, move |core, s| core.reparent_on_queue(s, parent))
    }

    /// Returns whether the session took the gesture. Sessions that are not
    /// movable ignore it.
    pub fn pointer_down(&self, id: SessionId, pointer: PointerId, point: Point) -> WmResult<bool> {
        self.core.record(|| Request::PointerDown { id, pointer, point });
        self.core.sync(id, move |core, s| {
            core.require_visible(s)?;
            let phase = {
                let mut data = s.write();
                if !data.props.movable {
                    trace!(id = %s.id(), "pointer-down on an unmovable session");
                    return Ok(false);
                }
                let rect = data.effective;
                data.drag.pointer_down(pointer, point, rect, core.config.settings.layout.hot_zone)?
            };
            core.emit(SceneEvent::DragPhaseChanged { id: s.id(), phase });
            Ok(true)
        })
    }

    /// Returns the effective rect when the move produced a rect change.
    pub fn pointer_move(&self, id: SessionId, pointer: PointerId, point: Point) -> WmResult<Option<Rect>> {
        self.core.record(|| Request::PointerMove { id, pointer, point });
        self.core.sync(id, move |core, s| {
            let threshold = core.config.settings.layout.move_threshold;
            let (step, display, changed) = {
                let mut data = s.write();
                let before = data.drag.phase();
                let step = data.drag.pointer_move(pointer, point, threshold)?;
                let after = data.drag.phase();
                (step, data.display, (before != after).then_some(after))
            };
            if let Some(phase) = changed {
                core.emit(SceneEvent::DragPhaseChanged { id: s.id(), phase });
            }
            let Some(step) = step else { return Ok(None) };
            let requested = core.displays.to_display_relative(step.rect, display)?;
            core.apply_rect(s, Placement {
                edges: step.edges,
                ..Placement::new(requested, step.reason)
            })
            .map(Some)
        })
    }

    /// Ends the gesture. When the session moved, its final rect is applied
    /// with reason `DragEnd` on the display under its center.
    pub fn pointer_up(&self, id: SessionId, pointer: PointerId) -> WmResult<Option<Rect>> {
        self.core.record(|| Request::PointerUp { id, pointer });
        self.core.sync(id, move |core, s| {
            let (step, display, was_idle) = {
                let mut data = s.write();
                let was_idle = data.drag.phase() == DragPhase::Idle;
                (data.drag.pointer_up(pointer)?, data.display, was_idle)
            };
            if !was_idle {
                core.emit(SceneEvent::DragPhaseChanged { id: s.id(), phase: DragPhase::Idle });
            }
            let Some(step) = step else { return Ok(None) };
            let target = core.displays.display_at(step.rect.center()).unwrap_or(display);
            let requested = core.displays.to_display_relative(step.rect, target)?;
            core.apply_rect(s, Placement {
                display: Some(target),
                edges: step.edges,
                ..Placement::new(requested, step.reason)
            })
            .map(Some)
        })
    }

    /// Abandons the gesture without a final rect change. Followers drop their
    /// clones.
    pub fn cancel_gesture(&self, id: SessionId) -> WmResult<bool> {
        self.core.record(|| Request::CancelGesture(id));
        self.core.sync(id, |core, s| {
            let had = s.write().drag.cancel();
            if had {
                core.emit(SceneEvent::DragPhaseChanged { id: s.id(), phase: DragPhase::Idle });
                core.release_children_clones(s.id());
            }
            Ok(had)
        })
    }

    /// Called by the render service once the session's first frame is up.
    pub fn on_first_frame(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::FirstFrame(id));
        let session = self.core.hierarchy.get(id)?;
        let core = self.core.clone();
        let s = session.clone();
        session.queue().post_task(move || {
            if s.mark_first_frame() {
                debug!(id = %s.id(), "first frame");
                core.emit(SceneEvent::FirstFrame { id: s.id() });
            }
        })
    }

    /// Blocks until the first frame of `id` was reported.
    pub fn wait_first_frame(&self, id: SessionId, timeout: Duration) -> WmResult<()> {
        self.core.hierarchy.get(id)?.wait_first_frame(timeout)
    }

    #[instrument(skip(self))]
    pub fn handle_display_event(&self, event: DisplayEvent) -> WmResult<()> {
        self.core.record(|| Request::Display(event.clone()));
        self.core.handle_display_event(event)
    }

    /// Ends the session and destroys it.
    pub fn disconnect(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Disconnect(id));
        self.core.sync(id, |core, s| {
            if s.state().is_visible() {
                core.hide_on_queue(s)?;
            }
            if matches!(s.state(), SessionState::Connected | SessionState::Background) {
                core.transition(s, SessionState::End)?;
            }
            Ok(())
        })?;
        self.core.destroy(id)
    }

    #[instrument(skip(self))]
    pub fn destroy(&self, id: SessionId) -> WmResult<()> {
        self.core.record(|| Request::Destroy(id));
        self.core.destroy(id)
    }

    pub fn snapshot(&self, id: SessionId) -> WmResult<SessionSnapshot> {
        let session = self.core.hierarchy.get(id)?;
        self.core.snapshot(&session)
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.core
            .hierarchy
            .sessions()
            .iter()
            .filter_map(|s| self.core.snapshot(s).ok())
            .collect()
    }

    pub fn sessions(&self) -> Vec<SessionId> { self.core.hierarchy.ids() }

    pub fn focused(&self, display: DisplayId) -> Option<SessionId> { self.core.focus.focused(display) }

    /// Front to back.
    pub fn stacking(&self, display: DisplayId) -> Vec<SessionId> { self.core.focus.stacking(display) }

    /// Waits until everything queued on `id` so far has run.
    pub fn flush(&self, id: SessionId) -> WmResult<()> { self.core.sync(id, |_, _| Ok(())) }

    /// Waits until no queue has work left, including work posted while
    /// waiting.
    pub fn wait_idle(&self, timeout: Duration) -> WmResult<()> { self.core.executor.wait_idle(timeout) }

    /// Destroys every session.
    pub fn shutdown(&self) {
        for id in self.core.hierarchy.ids() {
            if !self.core.hierarchy.contains(id) {
                continue;
            }
            if let Err(e) = self.core.destroy(id) {
                warn!(%id, ?e, "failed to destroy session during shutdown");
            }
        }
    }

    /// Runs one request and wraps its result.
    pub fn dispatch(&self, request: Request) -> WmResult<Reply> {
        Ok(match request {
            Request::CreateSession(config) => Reply::Session(self.create_session(config)?),
            Request::Connect(id) => self.connect(id).map(|()| Reply::Unit)?,
            Request::Show(id) => self.show(id).map(|()| Reply::Unit)?,
            Request::Hide(id) => self.hide(id).map(|()| Reply::Unit)?,
            Request::RequestFocus(id) => self.request_focus(id).map(|()| Reply::Unit)?,
            Request::Raise(id) => self.raise(id).map(|()| Reply::Unit)?,
            Request::UpdateRect { id, rect, reason } => Reply::Rect(self.update_rect(id, rect, reason)?),
            Request::UpdateRectOn { id, rect, reason, display } => {
                Reply::Rect(self.update_rect_on(id, rect, reason, display)?)
            }
            Request::SetAspectRatio { id, ratio } => self.set_aspect_ratio(id, ratio).map(|()| Reply::Unit)?,
            Request::SetLimits { id, limits } => self.set_limits(id, limits).map(|()| Reply::Unit)?,
            Request::SetProperty { id, property } => self.set_property(id, property).map(|()| Reply::Unit)?,
            Request::Property { id, key } => Reply::Property(self.property(id, key)?),
            Request::AddChild { parent, child } => self.add_child(parent, child).map(|()| Reply::Unit)?,
            Request::RemoveChild { parent, child } => Reply::Bool(self.remove_child(parent, child)?),
            Request::Reparent { child, parent } => Reply::Parent(self.reparent(child, parent)?),
            Request::PointerDown { id, pointer, point } => {
                Reply::Bool(self.pointer_down(id, pointer, point)?)
            }
            Request::PointerMove { id, pointer, point } => {
                Reply::MaybeRect(self.pointer_move(id, pointer, point)?)
            }
            Request::PointerUp { id, pointer } => Reply::MaybeRect(self.pointer_up(id, pointer)?),
            Request::CancelGesture(id) => Reply::Bool(self.cancel_gesture(id)?),
            Request::FirstFrame(id) => self.on_first_frame(id).map(|()| Reply::Unit)?,
            Request::Display(event) => self.handle_display_event(event).map(|()| Reply::Unit)?,
            Request::Disconnect(id) => self.disconnect(id).map(|()| Reply::Unit)?,
            Request::Destroy(id) => self.destroy(id).map(|()| Reply::Unit)?,
        })
    }
}

impl Drop for SceneManager {
    fn drop(&mut self) {
        // Queued closures hold the core; cancelling lets it go.
        for session in self.core.hierarchy.sessions() {
            session.queue().cancel();
        }
    }
}

impl Core {
    fn record(&self, request: impl FnOnce() -> Request) {
        let mut record = self.record.lock();
        if record.is_enabled() {
            record.on_request(&request());
        }
    }

    fn sync_timeout(&self) -> Duration { self.config.settings.tasks.sync_timeout() }

    /// Runs `f` on `id`'s queue and waits for its result.
    fn sync<R: Send + 'static>(
        self: &Arc<Self>,
        id: SessionId,
        f: impl FnOnce(&Arc<Core>, &Arc<Session>) -> WmResult<R> + Send + 'static,
    ) -> WmResult<R> {
        let session = self.hierarchy.get(id)?;
        let core = self.clone();
        let s = session.clone();
        session.queue().post_sync_task(move || f(&core, &s), self.sync_timeout())?
    }

    /// Runs `f` on `session`'s queue: inline when already there, posted
    /// otherwise.
    fn run_on(
        self: &Arc<Self>,
        session: &Arc<Session>,
        f: impl FnOnce(&Arc<Core>, &Arc<Session>) + Send + 'static,
    ) {
        if session.queue().is_current() {
            f(self, session);
            return;
        }
        let core = self.clone();
        let s = session.clone();
        if let Err(e) = session.queue().post_task(move || f(&core, &s)) {
            debug!(id = %session.id(), ?e, "session went away before work could be posted");
        }
    }

    fn emit(&self, event: SceneEvent) { self.events.emit(event) }

    fn emit_all(&self, events: impl IntoIterator<Item = SceneEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn follower(&self) -> AnchorFollower<'_> { AnchorFollower::new(&self.displays, self.render.as_ref()) }

    fn require_visible(&self, s: &Session) -> WmResult<()> {
        let state = s.state();
        if !state.is_visible() {
            return Err(WmError::invalid_session(s.id(), format!("session is {state}, not visible")));
        }
        Ok(())
    }

    fn transition(&self, s: &Session, to: SessionState) -> WmResult<()> {
        let from = {
            let mut data = s.write();
            let from = data.state;
            if !from.check_transition(s.id(), to)? {
                return Ok(());
            }
            data.state = to;
            from
        };
        debug!(id = %s.id(), %from, %to, "state changed");
        self.emit(SceneEvent::StateChanged { id: s.id(), from, to });
        Ok(())
    }

    fn create_session(&self, config: SessionConfig) -> WmResult<SessionId> {
        let caps = config.kind.caps();
        if caps.privileged && !config.privileged {
            return Err(WmError::PermissionDenied(format!(
                "{} sessions need a privileged client",
                config.kind
            )));
        }
        if caps.requires_parent && config.parent.is_none() {
            return Err(WmError::invalid_parameter(format!("{} sessions need a parent", config.kind)));
        }
        if config.anchored && !caps.supports_anchor {
            return Err(WmError::invalid_parameter(format!(
                "{} sessions cannot be anchored",
                config.kind
            )));
        }
        let parent = config.parent.map(|p| self.hierarchy.get(p)).transpose()?;
        self.displays.get(config.display)?;

        let stored = config.ability.as_ref().and_then(|key| self.abilities.get(key));
        let rule = config.ability.as_ref().and_then(|key| self.config.rule_for(key));
        let limits = config
            .limits
            .or_else(|| stored.and_then(|r| r.limits))
            .or_else(|| rule.and_then(|r| r.limits))
            .unwrap_or(self.config.settings.layout.default_limits);
        limits.validate()?;
        let ratio = config
            .aspect_ratio
            .or_else(|| stored.and_then(|r| r.aspect_ratio))
            .or_else(|| rule.and_then(|r| r.aspect_ratio))
            .unwrap_or(0.0);
        let constraints = LayoutConstraints::new(limits, validate_aspect_ratio(ratio, &limits)?);

        let resolved = compute_effective_rect(config.rect, config.rect, &constraints, ResizeEdges::empty())?;
        let effective = self.displays.to_global(resolved, config.display)?;

        let focusable = config.focusable.unwrap_or(caps.focusable);
        let props = SessionProps {
            anchored: config.anchored,
            follow_parent: config.follow_parent,
            focusable,
            title: config.title,
            ..SessionProps::default()
        };
        let mut data = SessionData::new(config.display, constraints, props);
        data.requested = config.rect;
        data.effective = effective;
        data.parent_relative = parent
            .as_ref()
            .map(|p| coordinates::to_relative(effective, p.read().effective))
            .transpose()?;

        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Arc::new(Session::new(
            id,
            config.kind,
            config.privileged,
            config.ability,
            self.executor.queue(id),
            data,
        ));
        self.hierarchy.insert(session);
        self.focus.insert(config.display, id, focusable);
        if let Some(parent) = parent {
            if let Err(e) = self.hierarchy.add_child(parent.id(), id) {
                self.hierarchy.remove(id);
                self.focus.remove(id);
                return Err(e);
            }
            self.emit(SceneEvent::HierarchyChanged { parent: parent.id(), child: id, attached: true });
        }
        info!(%id, kind = %config.kind, rect = %effective, "session created");
        Ok(id)
    }

    fn connect_on_queue(&self, s: &Session) -> WmResult<()> {
        self.transition(s, SessionState::Connecting)?;
        let (display, bounds) = {
            let data = s.read();
            (data.display, data.effective)
        };
        match self.render.create_node(s.id(), display, bounds) {
            Ok(node) => s.write().node = Some(node),
            Err(e) => {
                warn!(id = %s.id(), ?e, "presentation node could not be created");
                self.transition(s, SessionState::Disconnected)?;
                return Err(e);
            }
        }
        self.transition(s, SessionState::Connected)
    }

    fn show_on_queue(self: &Arc<Self>, s: &Arc<Session>) -> WmResult<()> {
        if s.state().is_visible() {
            return Ok(());
        }
        self.transition(s, SessionState::Foreground)?;
        if let Some(change) = self.focus.set_visible(s.id(), true)? {
            self.apply_focus_change(change);
        }
        let event = self.raise_with_children(s.id())?;
        self.emit(event);
        if s.read().props.focusable {
            self.focus_session(s)?;
        }
        Ok(())
    }

    fn hide_on_queue(self: &Arc<Self>, s: &Arc<Session>) -> WmResult<()> {
        let id = s.id();
        if s.state() == SessionState::Background {
            return Ok(());
        }
        self.transition(s, SessionState::Background)?;
        let events = {
            let mut data = s.write();
            let mut events = Vec::new();
            if data.drag.cancel() {
                events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
            }
            events.extend(self.follower().release_clones(id, &mut data));
            events
        };
        self.emit_all(events);
        self.release_children_clones(id);
        if let Some(change) = self.focus.set_visible(id, false)? {
            self.apply_focus_change(change);
        }
        Ok(())
    }

    /// Raises `id` and its visible children.
    fn raise_with_children(&self, id: SessionId) -> WmResult<SceneEvent> {
        let children: Vec<SessionId> = self
            .hierarchy
            .children_of(id)
            .into_iter()
            .filter(|c| self.hierarchy.get(*c).is_ok_and(|c| c.state().is_visible()))
            .collect();
        let (display, front_to_back) = self.focus.raise(id, &children)?;
        Ok(SceneEvent::ZOrderChanged { display, front_to_back })
    }

    fn focus_session(self: &Arc<Self>, s: &Arc<Session>) -> WmResult<()> {
        let change = self.focus.focus(s.id())?;
        self.apply_focus_change(change);
        Ok(())
    }

    /// Brings `Active`/`Foreground` in line with the focus registry on both
    /// sides of `change`.
    fn apply_focus_change(self: &Arc<Self>, change: FocusChange) {
        if !change.changed() {
            return;
        }
        debug!(display = %change.display, from = ?change.from, to = ?change.to, "focus moved");
        if let Some(prev) = change.from
            && let Ok(session) = self.hierarchy.get(prev)
        {
            self.run_on(&session, |core, s| {
                if s.state() == SessionState::Active
                    && !core.focus.is_focused(s.id())
                    && let Err(e) = core.transition(s, SessionState::Foreground)
                {
                    debug!(id = %s.id(), ?e, "could not demote");
                }
            });
        }
        if let Some(next) = change.to
            && let Ok(session) = self.hierarchy.get(next)
        {
            self.run_on(&session, |core, s| {
                if s.state() == SessionState::Foreground
                    && core.focus.is_focused(s.id())
                    && let Err(e) = core.transition(s, SessionState::Active)
                {
                    debug!(id = %s.id(), ?e, "could not promote");
                }
            });
        }
        self.emit(SceneEvent::FocusChanged {
            display: change.display,
            from: change.from,
            to: change.to,
        });
    }

    /// Resolves and stores a rect for `s`, then hands the new rect to its
    /// children.
    fn apply_rect(self: &Arc<Self>, s: &Arc<Session>, placement: Placement) -> WmResult<Rect> {
        let id = s.id();
        let parent_rect = self
            .hierarchy
            .parent_of(id)
            .and_then(|p| self.hierarchy.get(p).ok())
            .map(|p| p.read().effective);

        let (effective, moved_to, update) = {
            let mut data = s.write();
            data.can_update_rect(id)?;
            let constraints = placement.constraints.unwrap_or(data.constraints);
            let display = placement.display.unwrap_or(data.display);
            let resolved =
                compute_effective_rect(placement.requested, data.requested, &constraints, placement.edges)?;
            let effective = self.displays.to_global(resolved, display)?;
            let parent_relative =
                parent_rect.map(|p| coordinates::to_relative(effective, p)).transpose()?;

            let moved_to = (display != data.display).then_some(display);
            data.constraints = constraints;
            data.requested = placement.requested;
            data.effective = effective;
            data.display = display;
            data.reason = placement.reason;
            if parent_relative.is_some() {
                data.parent_relative = parent_relative;
            }
            if let Some(node) = data.node {
                self.render.set_bounds(node, effective);
            }
            let update = FollowUpdate {
                parent: id,
                parent_rect: effective,
                parent_display: display,
                reason: placement.reason,
                during_gesture: data.state.is_visible() && data.drag.in_gesture(),
            };
            (effective, moved_to, update)
        };
        trace!(%id, rect = %effective, reason = %placement.reason, "rect applied");

        if let Some(display) = moved_to
            && let Some(change) = self.focus.move_to_display(id, display)?
        {
            self.apply_focus_change(change);
        }
        self.emit(SceneEvent::RectChanged { id, rect: effective, reason: placement.reason });
        if placement.reason.implies_layout() {
            self.propagate(update);
        }
        Ok(effective)
    }

    /// Queues `update` on every child of `update.parent`. Each child decides
    /// on its own queue whether it follows.
    fn propagate(self: &Arc<Self>, update: FollowUpdate) {
        for child in self.hierarchy.children_of(update.parent) {
            let Ok(session) = self.hierarchy.get(child) else { continue };
            let core = self.clone();
            let s = session.clone();
            if let Err(e) = session.queue().post_task(move || core.follow_parent(&s, update)) {
                debug!(%child, ?e, "child went away before following");
            }
        }
    }

    fn follow_parent(self: &Arc<Self>, s: &Arc<Session>, update: FollowUpdate) {
        let id = s.id();
        let follower = self.follower();
        let mut events = Vec::new();
        let (moved_to, next) = {
            let mut data = s.write();
            if data.state.is_terminal() {
                return;
            }
            // While a visible parent is mid-gesture only anchored children
            // move; the rest catch up on drag end.
            let follows = if update.during_gesture {
                data.props.anchored
            } else {
                data.props.anchored || data.props.follow_parent
            };
            if !follows {
                trace!(%id, parent = %update.parent, reason = %update.reason, "follow deferred");
                return;
            }
            let projection = match follower.project(&data, &update) {
                Ok(p) => p,
                Err(e) => {
                    warn!(%id, parent = %update.parent, ?e, "child cannot follow its parent");
                    return;
                }
            };
            let moved_to = (projection.display != data.display).then_some(projection.display);
            data.requested = projection.requested;
            data.effective = projection.effective;
            data.display = projection.display;
            data.reason = update.reason;
            if let Some(node) = data.node {
                self.render.set_bounds(node, projection.effective);
            }
            events.push(SceneEvent::RectChanged { id, rect: projection.effective, reason: update.reason });
            if update.during_gesture {
                if data.drag.enter_zoom() {
                    events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::ZoomDuringDrag });
                }
                events.extend(follower.track_clones(id, &mut data));
            } else {
                events.extend(follower.release_clones(id, &mut data));
                if data.drag.leave_zoom() {
                    events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
                }
            }
            let next = FollowUpdate {
                parent: id,
                parent_rect: projection.effective,
                parent_display: projection.display,
                ..update
            };
            (moved_to, next)
        };
        if let Some(display) = moved_to {
            match self.focus.move_to_display(id, display) {
                Ok(Some(change)) => self.apply_focus_change(change),
                Ok(None) => {}
                Err(e) => debug!(%id, ?e, "focus registry lost the session"),
            }
        }
        self.emit_all(events);
        self.propagate(next);
    }

    /// Queues clone release and zoom exit on every child of `id`.
    fn release_children_clones(self: &Arc<Self>, id: SessionId) {
        for child in self.hierarchy.children_of(id) {
            self.detach_follower(child);
        }
    }

    /// Drops any gesture-time state `child` holds on behalf of a parent.
    fn detach_follower(self: &Arc<Self>, child: SessionId) {
        let Ok(session) = self.hierarchy.get(child) else { return };
        self.run_on(&session, |core, s| {
            let id = s.id();
            let events = {
                let mut data = s.write();
                let mut events = core.follower().release_clones(id, &mut data);
                if data.drag.leave_zoom() {
                    events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
                }
                events
            };
            core.emit_all(events);
        });
    }

    fn set_property_on_queue(self: &Arc<Self>, s: &Arc<Session>, property: SessionProperty) -> WmResult<()> {
        let id = s.id();
        let caps = s.kind().caps();
        match &property {
            SessionProperty::Topmost(true) if !(s.is_privileged() && caps.topmost_allowed) => {
                return Err(WmError::PermissionDenied(format!("{id} may not be topmost")));
            }
            SessionProperty::Anchored(true) => ensure_anchorable(id, caps.supports_anchor)?,
            SessionProperty::Focusable(true) if !caps.focusable => {
                return Err(WmError::invalid_parameter(format!(
                    "{} sessions cannot take focus",
                    s.kind()
                )));
            }
            _ => {}
        }
        let events = {
            let mut data = s.write();
            let mut events = Vec::new();
            if property == SessionProperty::Anchored(false) && data.props.anchored {
                events.extend(self.follower().release_clones(id, &mut data));
                if data.drag.leave_zoom() {
                    events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
                }
            }
            debug!(%id, ?property, "property set");
            data.props.set(property.clone());
            events
        };
        self.emit_all(events);
        if let SessionProperty::Focusable(focusable) = property
            && let Some(change) = self.focus.set_focusable(id, focusable)?
        {
            self.apply_focus_change(change);
        }
        Ok(())
    }

    fn add_child_on_queue(self: &Arc<Self>, parent: &Arc<Session>, child: SessionId) -> WmResult<()> {
        let child_session = self.hierarchy.get(child)?;
        if child_session.state().is_terminal() {
            return Err(WmError::invalid_session(child, "cannot attach a finished session"));
        }
        let already = self.hierarchy.parent_of(child) == Some(parent.id());
        self.hierarchy.add_child(parent.id(), child)?;
        if already {
            return Ok(());
        }
        self.emit(SceneEvent::HierarchyChanged { parent: parent.id(), child, attached: true });
        let parent_rect = parent.read().effective;
        self.run_on(&child_session, move |_, s| {
            let mut data = s.write();
            // Left unset, the offset is derived again when the child next follows.
            data.parent_relative = coordinates::to_relative(data.effective, parent_rect).ok();
        });
        Ok(())
    }

    fn reparent_on_queue(
        self: &Arc<Self>,
        s: &Arc<Session>,
        parent: Option<SessionId>,
    ) -> WmResult<Option<SessionId>> {
        let id = s.id();
        if parent.is_none() && s.kind().caps().requires_parent {
            return Err(WmError::invalid_parameter(format!("{} sessions need a parent", s.kind())));
        }
        let parent_rect = parent.map(|p| self.hierarchy.get(p)).transpose()?.map(|p| p.read().effective);
        let old = self.hierarchy.reparent(id, parent)?;
        if old == parent {
            return Ok(old);
        }
        let events = {
            let mut data = s.write();
            let mut events = self.follower().release_clones(id, &mut data);
            if data.drag.leave_zoom() {
                events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
            }
            data.parent_relative = parent_rect.and_then(|p| coordinates::to_relative(data.effective, p).ok());
            events
        };
        self.emit_all(events);
        if let Some(old) = old {
            self.emit(SceneEvent::HierarchyChanged { parent: old, child: id, attached: false });
        }
        if let Some(parent) = parent {
            self.emit(SceneEvent::HierarchyChanged { parent, child: id, attached: true });
        }
        Ok(old)
    }

    fn handle_display_event(self: &Arc<Self>, event: DisplayEvent) -> WmResult<()> {
        if let DisplayEvent::Removed(id) = event {
            if !self.displays.contains(id) {
                return Err(WmError::InvalidDisplay(id));
            }
            if self.displays.all().len() <= 1 {
                return Err(WmError::invalid_parameter(format!("{id} is the last display")));
            }
        }
        let display = self.displays.apply(&event)?;
        match event {
            DisplayEvent::Added(_) => {}
            DisplayEvent::Removed(gone) => {
                let primary = self.displays.primary().ok_or(WmError::InvalidDisplay(gone))?;
                for session in self.hierarchy.sessions() {
                    self.run_on(&session, move |core, s| core.leave_display(s, gone, primary));
                }
            }
            DisplayEvent::Resized { .. } | DisplayEvent::Rotated(_) => {
                for session in self.hierarchy.sessions() {
                    self.run_on(&session, move |core, s| {
                        let requested = {
                            let data = s.read();
                            if data.display != display || data.state.is_terminal() {
                                return;
                            }
                            data.requested
                        };
                        let placement = Placement::new(requested, SizeChangeReason::DisplayChange);
                        if let Err(e) = core.apply_rect(s, placement) {
                            warn!(id = %s.id(), ?e, "rect could not be recomputed after display change");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Drops clones on `gone` and moves the session to `primary` if it lived
    /// on `gone`.
    fn leave_display(self: &Arc<Self>, s: &Arc<Session>, gone: DisplayId, primary: DisplayId) {
        let id = s.id();
        let (event, requested) = {
            let mut data = s.write();
            let event = self.follower().release_clone_on(id, &mut data, gone);
            let requested = (data.display == gone && !data.state.is_terminal()).then_some(data.requested);
            (event, requested)
        };
        self.emit_all(event);
        let Some(requested) = requested else { return };
        info!(%id, from = %gone, to = %primary, "migrating session off removed display");
        let placement = Placement {
            display: Some(primary),
            ..Placement::new(requested, SizeChangeReason::DisplayChange)
        };
        if let Err(e) = self.apply_rect(s, placement) {
            warn!(%id, ?e, "session could not be migrated");
        }
    }

    /// Tears the session down on its queue, then unregisters it. Children
    /// that cannot live without a parent go with it; others are detached.
    fn destroy(self: &Arc<Self>, id: SessionId) -> WmResult<()> {
        let session = self.hierarchy.get(id)?;
        let node = self.sync(id, |core, s| {
            let id = s.id();
            let (from, events, node) = {
                let mut data = s.write();
                let from = data.state;
                data.state = SessionState::Destroyed;
                let mut events = Vec::new();
                if data.drag.cancel() {
                    events.push(SceneEvent::DragPhaseChanged { id, phase: DragPhase::Idle });
                }
                events.extend(core.follower().release_clones(id, &mut data));
                (from, events, data.node.take())
            };
            if from != SessionState::Destroyed {
                core.emit(SceneEvent::StateChanged { id, from, to: SessionState::Destroyed });
            }
            core.emit_all(events);
            Ok(node)
        })?;

        for child in self.hierarchy.children_of(id) {
            let Ok(c) = self.hierarchy.get(child) else { continue };
            if c.kind().caps().requires_parent {
                if let Err(e) = self.destroy(child) {
                    warn!(%id, %child, ?e, "failed to destroy dependent child");
                }
            } else if self.hierarchy.remove_child(id, child) {
                self.emit(SceneEvent::HierarchyChanged { parent: id, child, attached: false });
                self.detach_follower(child);
            }
        }

        if let Some(parent) = self.hierarchy.parent_of(id) {
            self.emit(SceneEvent::HierarchyChanged { parent, child: id, attached: false });
        }
        self.hierarchy.remove(id);
        if let Some(change) = self.focus.remove(id) {
            self.apply_focus_change(change);
        }
        session.queue().cancel();
        if let Some(node) = node {
            self.render.release_node(node);
        }
        info!(%id, "session destroyed");
        self.emit(SceneEvent::Destroyed { id });
        Ok(())
    }

    fn snapshot(&self, s: &Session) -> WmResult<SessionSnapshot> {
        let id = s.id();
        let data = s.read();
        Ok(SessionSnapshot {
            id,
            kind: s.kind(),
            state: data.state,
            display: data.display,
            requested: data.requested,
            effective: data.effective,
            reason: data.reason,
            aspect_ratio: data.constraints.aspect_ratio,
            limits: data.constraints.limits,
            z_order: self.focus.z_order(id),
            focused: self.focus.is_focused(id),
            parent: self.hierarchy.parent_of(id),
            children: self.hierarchy.children_of(id),
            props: data.props.clone(),
            drag_phase: data.drag.phase(),
            clone_count: data.clone_count,
            cloned_on: data.cloned_on.iter().copied().collect(),
            first_frame: s.has_first_frame(),
        })
    }
}
