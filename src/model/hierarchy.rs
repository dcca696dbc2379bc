//! Registry of live sessions and their parent/child relation.
//!
//! The relation is stored as ids on both sides and resolved through the
//! registry; neither side owns the other. Every edit of the relation happens
//! under one lock, so a child's parent link and the parent's child list
//! always change together.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::common::collections::HashMap;
use crate::common::error::{WmError, WmResult};
use crate::model::session::{Session, SessionId};

#[derive(Debug, Default)]
struct Links {
    parent: HashMap<SessionId, SessionId>,
    children: HashMap<SessionId, Vec<SessionId>>,
}

impl Links {
    fn is_ancestor(&self, candidate: SessionId, of: SessionId) -> bool {
        let mut cur = Some(of);
        while let Some(id) = cur {
            if id == candidate {
                return true;
            }
            cur = self.parent.get(&id).copied();
        }
        false
    }

    fn detach(&mut self, child: SessionId) -> Option<SessionId> {
        let parent = self.parent.remove(&child)?;
        if let Some(list) = self.children.get_mut(&parent) {
            list.retain(|c| *c != child);
            if list.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }

    fn attach(&mut self, parent: SessionId, child: SessionId) {
        self.parent.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
    }

    fn check_attach(&self, parent: SessionId, child: SessionId) -> WmResult<()> {
        if parent == child {
            return Err(WmError::invalid_parameter(format!("{child} cannot be its own parent")));
        }
        if self.is_ancestor(child, parent) {
            return Err(WmError::invalid_parameter(format!(
                "attaching {child} under {parent} would create a cycle"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Hierarchy {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    links: Mutex<Links>,
}

impl Hierarchy {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, session: Arc<Session>) { self.sessions.write().insert(session.id(), session); }

    pub fn get(&self, id: SessionId) -> WmResult<Arc<Session>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| WmError::invalid_session(id, "no such session"))
    }

    pub fn contains(&self, id: SessionId) -> bool { self.sessions.read().contains_key(&id) }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut all: Vec<_> = self.sessions.read().values().cloned().collect();
        all.sort_by_key(|s| s.id());
        all
    }

    pub fn len(&self) -> usize { self.sessions.read().len() }

    pub fn is_empty(&self) -> bool { self.sessions.read().is_empty() }

    /// Drops `id` from the registry and from both sides of the relation.
    /// Its children are left parentless.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        {
            let mut links = self.links.lock();
            links.detach(id);
            if let Some(children) = links.children.remove(&id) {
                for child in children {
                    links.parent.remove(&child);
                }
            }
        }
        self.sessions.write().remove(&id)
    }

    pub fn add_child(&self, parent: SessionId, child: SessionId) -> WmResult<()> {
        if !self.contains(parent) {
            return Err(WmError::invalid_session(parent, "no such parent"));
        }
        if !self.contains(child) {
            return Err(WmError::invalid_session(child, "no such child"));
        }
        let mut links = self.links.lock();
        match links.parent.get(&child) {
            Some(p) if *p == parent => return Ok(()),
            Some(p) => {
                return Err(WmError::invalid_parameter(format!(
                    "{child} already has parent {p}"
                )));
            }
            None => {}
        }
        links.check_attach(parent, child)?;
        links.attach(parent, child);
        debug!(%parent, %child, "child attached");
        Ok(())
    }

    /// Returns whether `child` was actually detached from `parent`.
    pub fn remove_child(&self, parent: SessionId, child: SessionId) -> bool {
        let mut links = self.links.lock();
        if links.parent.get(&child) != Some(&parent) {
            return false;
        }
        links.detach(child);
        debug!(%parent, %child, "child detached");
        true
    }

    /// Moves `child` under `new_parent` (or makes it a root) in one step.
    /// Returns the previous parent.
    pub fn reparent(
        &self,
        child: SessionId,
        new_parent: Option<SessionId>,
    ) -> WmResult<Option<SessionId>> {
        if !self.contains(child) {
            return Err(WmError::invalid_session(child, "no such child"));
        }
        if let Some(p) = new_parent
            && !self.contains(p)
        {
            return Err(WmError::invalid_session(p, "no such parent"));
        }
        let mut links = self.links.lock();
        let old = links.parent.get(&child).copied();
        if old == new_parent {
            return Ok(old);
        }
        if let Some(p) = new_parent {
            links.check_attach(p, child)?;
        }
        links.detach(child);
        if let Some(p) = new_parent {
            links.attach(p, child);
        }
        debug!(%child, ?old, ?new_parent, "reparented");
        Ok(old)
    }

    pub fn parent_of(&self, id: SessionId) -> Option<SessionId> {
        self.links.lock().parent.get(&id).copied()
    }

    /// Children in attach order.
    pub fn children_of(&self, id: SessionId) -> Vec<SessionId> {
        self.links.lock().children.get(&id).cloned().unwrap_or_default()
    }

    pub fn is_ancestor(&self, candidate: SessionId, of: SessionId) -> bool {
        self.links.lock().is_ancestor(candidate, of)
    }

    /// Checks that both sides of the relation agree. Used by tests and
    /// debug assertions.
    pub fn is_consistent(&self) -> bool {
        let links = self.links.lock();
        let up = links
            .parent
            .iter()
            .all(|(c, p)| links.children.get(p).is_some_and(|l| l.iter().filter(|x| *x == c).count() == 1));
        let down = links
            .children
            .iter()
            .all(|(p, list)| list.iter().all(|c| links.parent.get(c) == Some(p)));
        up && down
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actor::task_queue::TaskExecutor;
    use crate::layout_engine::LayoutConstraints;
    use crate::model::session::{SessionData, SessionProps, WindowKind};
    use crate::sys::screen::DisplayId;

    fn registry(n: i32) -> (TaskExecutor, Hierarchy) {
        let exec = TaskExecutor::new(1);
        let h = Hierarchy::new();
        for i in 1..=n {
            let id = SessionId::new(i);
            let data = SessionData::new(DisplayId(0), LayoutConstraints::default(), SessionProps::default());
            h.insert(Arc::new(Session::new(id, WindowKind::Main, false, None, exec.queue(id), data)));
        }
        (exec, h)
    }

    fn s(i: i32) -> SessionId { SessionId::new(i) }

    #[test]
    fn remove_child_is_idempotent() {
        let (_e, h) = registry(2);
        h.add_child(s(1), s(2)).unwrap();
        assert!(h.remove_child(s(1), s(2)));
        assert!(!h.remove_child(s(1), s(2)));
        assert!(h.is_consistent());
    }

    #[test]
    fn cycles_are_rejected_before_mutation() {
        let (_e, h) = registry(3);
        h.add_child(s(1), s(2)).unwrap();
        h.add_child(s(2), s(3)).unwrap();
        assert!(matches!(h.add_child(s(3), s(1)), Err(WmError::InvalidParameter(_))));
        assert!(h.add_child(s(1), s(1)).is_err());
        assert_eq!(h.parent_of(s(1)), None);
        assert!(h.is_consistent());
    }

    #[test]
    fn second_parent_is_rejected() {
        let (_e, h) = registry(3);
        h.add_child(s(1), s(3)).unwrap();
        assert!(h.add_child(s(2), s(3)).is_err());
        assert_eq!(h.children_of(s(1)), vec![s(3)]);
        assert!(h.children_of(s(2)).is_empty());
        // Adding to the same parent again is a no-op.
        h.add_child(s(1), s(3)).unwrap();
        assert_eq!(h.children_of(s(1)), vec![s(3)]);
    }

    #[test]
    fn reparent_moves_atomically() {
        let (_e, h) = registry(3);
        h.add_child(s(1), s(3)).unwrap();
        assert_eq!(h.reparent(s(3), Some(s(2))).unwrap(), Some(s(1)));
        assert!(h.children_of(s(1)).is_empty());
        assert_eq!(h.children_of(s(2)), vec![s(3)]);
        assert!(h.reparent(s(2), Some(s(3))).is_err());
        assert_eq!(h.parent_of(s(2)), None);
        assert_eq!(h.reparent(s(3), None).unwrap(), Some(s(2)));
        assert!(h.is_consistent());
    }

    #[test]
    fn removing_a_parent_orphans_children() {
        let (_e, h) = registry(3);
        h.add_child(s(1), s(2)).unwrap();
        h.add_child(s(1), s(3)).unwrap();
        assert!(h.remove(s(1)).is_some());
        assert_eq!(h.parent_of(s(2)), None);
        assert_eq!(h.parent_of(s(3)), None);
        assert!(h.get(s(1)).is_err());
        assert!(h.is_consistent());
    }

    #[test]
    fn unknown_ids_are_invalid_sessions() {
        let (_e, h) = registry(1);
        assert!(matches!(h.add_child(s(1), s(9)), Err(WmError::InvalidSession { .. })));
        assert!(matches!(h.reparent(s(9), None), Err(WmError::InvalidSession { .. })));
    }
}
