//! Observer registry keyed by event kind.
//!
//! Observers are either callbacks, run synchronously on the thread that
//! emits, or channels drained by the subscriber.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use tracing::trace;

use crate::actor::move_drag::DragPhase;
use crate::actor::{self, Receiver};
use crate::model::session::{SessionId, SizeChangeReason};
use crate::model::state::SessionState;
use crate::sys::geometry::Rect;
use crate::sys::screen::DisplayId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum EventKind {
    StateChanged,
    RectChanged,
    FocusChanged,
    ZOrderChanged,
    HierarchyChanged,
    CloneChanged,
    DragPhaseChanged,
    FirstFrame,
    Destroyed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SceneEvent {
    StateChanged {
        id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    RectChanged {
        id: SessionId,
        rect: Rect,
        reason: SizeChangeReason,
    },
    FocusChanged {
        display: DisplayId,
        from: Option<SessionId>,
        to: Option<SessionId>,
    },
    ZOrderChanged {
        display: DisplayId,
        front_to_back: Vec<SessionId>,
    },
    HierarchyChanged {
        parent: SessionId,
        child: SessionId,
        attached: bool,
    },
    CloneChanged {
        id: SessionId,
        display: DisplayId,
        added: bool,
        count: u32,
    },
    DragPhaseChanged {
        id: SessionId,
        phase: DragPhase,
    },
    FirstFrame {
        id: SessionId,
    },
    Destroyed {
        id: SessionId,
    },
}

impl SceneEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SceneEvent::StateChanged { .. } => EventKind::StateChanged,
            SceneEvent::RectChanged { .. } => EventKind::RectChanged,
            SceneEvent::FocusChanged { .. } => EventKind::FocusChanged,
            SceneEvent::ZOrderChanged { .. } => EventKind::ZOrderChanged,
            SceneEvent::HierarchyChanged { .. } => EventKind::HierarchyChanged,
            SceneEvent::CloneChanged { .. } => EventKind::CloneChanged,
            SceneEvent::DragPhaseChanged { .. } => EventKind::DragPhaseChanged,
            SceneEvent::FirstFrame { .. } => EventKind::FirstFrame,
            SceneEvent::Destroyed { .. } => EventKind::Destroyed,
        }
    }
}

pub type Callback = Arc<dyn Fn(&SceneEvent) + Send + Sync>;

#[derive(Clone)]
pub enum Observer {
    Callback(Callback),
    Channel(actor::Sender<SceneEvent>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Broadcaster {
    subscriptions: DashMap<EventKind, Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self { Self::default() }

    pub fn subscribe(&self, kind: EventKind, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.entry(kind).or_default().push((id, observer));
        trace!(%kind, ?id, "subscribed");
        id
    }

    pub fn subscribe_fn(
        &self,
        kind: EventKind,
        f: impl Fn(&SceneEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(kind, Observer::Callback(Arc::new(f)))
    }

    pub fn subscribe_channel(&self, kind: EventKind) -> (SubscriptionId, Receiver<SceneEvent>) {
        let (tx, rx) = actor::channel();
        (self.subscribe(kind, Observer::Channel(tx)), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|(sid, _)| *sid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, |subs| subs.len())
    }

    pub fn emit(&self, event: SceneEvent) {
        let kind = event.kind();
        // Observers may subscribe from inside a callback, so the shard lock
        // must not be held while they run.
        let observers: Vec<Observer> = match self.subscriptions.get(&kind) {
            Some(subs) => subs.iter().map(|(_, o)| o.clone()).collect(),
            None => return,
        };
        trace!(?event, observers = observers.len(), "emit");
        let mut closed = false;
        for observer in observers {
            match observer {
                Observer::Callback(f) => f(&event),
                Observer::Channel(tx) => {
                    closed |= tx.try_send(event.clone()).is_err();
                }
            }
        }
        if closed && let Some(mut subs) = self.subscriptions.get_mut(&kind) {
            subs.retain(|(_, o)| !matches!(o, Observer::Channel(tx) if tx.is_closed()));
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster").field("kinds", &self.subscriptions.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn callbacks_only_see_their_kind() {
        let b = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        b.subscribe_fn(EventKind::FirstFrame, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        b.emit(SceneEvent::FirstFrame { id: SessionId::new(1) });
        b.emit(SceneEvent::Destroyed { id: SessionId::new(1) });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_observer_receives_events() {
        let b = Broadcaster::new();
        let (_, mut rx) = b.subscribe_channel(EventKind::Destroyed);
        b.emit(SceneEvent::Destroyed { id: SessionId::new(4) });
        let (_, event) = rx.try_recv().unwrap();
        assert_eq!(event, SceneEvent::Destroyed { id: SessionId::new(4) });
    }

    #[test]
    fn subscriptions_are_enumerable_and_removable() {
        let b = Broadcaster::new();
        let a = b.subscribe_fn(EventKind::RectChanged, |_| {});
        b.subscribe_fn(EventKind::RectChanged, |_| {});
        assert_eq!(b.subscriber_count(EventKind::RectChanged), 2);
        assert!(b.unsubscribe(a));
        assert!(!b.unsubscribe(a));
        assert_eq!(b.subscriber_count(EventKind::RectChanged), 1);
        assert_eq!(b.subscriber_count(EventKind::FocusChanged), 0);
    }

    #[test]
    fn dropped_channels_are_pruned() {
        let b = Broadcaster::new();
        let (_, rx) = b.subscribe_channel(EventKind::FirstFrame);
        drop(rx);
        b.emit(SceneEvent::FirstFrame { id: SessionId::new(1) });
        assert_eq!(b.subscriber_count(EventKind::FirstFrame), 0);
    }

    #[test]
    fn callback_may_subscribe_while_emitting() {
        let b = Arc::new(Broadcaster::new());
        let inner = b.clone();
        b.subscribe_fn(EventKind::FirstFrame, move |_| {
            inner.subscribe_fn(EventKind::Destroyed, |_| {});
        });
        b.emit(SceneEvent::FirstFrame { id: SessionId::new(1) });
        assert_eq!(b.subscriber_count(EventKind::Destroyed), 1);
    }
}
