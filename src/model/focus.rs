//! Focus and stacking order per display.
//!
//! Every display keeps a stacking list ordered back to front by z value and
//! at most one focused session. Focus changes happen under a single lock so
//! no observer can see two focused sessions on one display.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::common::collections::{BTreeMap, HashMap, HashSet};
use crate::common::error::{WmError, WmResult};
use crate::model::session::SessionId;
use crate::sys::screen::DisplayId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    id: SessionId,
    z: u64,
    visible: bool,
    focusable: bool,
}

#[derive(Debug, Default)]
struct DisplayStack {
    /// Back to front.
    entries: Vec<Entry>,
    focused: Option<SessionId>,
    next_z: u64,
}

impl DisplayStack {
    fn bump(&mut self) -> u64 {
        self.next_z += 1;
        self.next_z
    }

    fn position(&self, id: SessionId) -> Option<usize> { self.entries.iter().position(|e| e.id == id) }

    fn sort(&mut self) { self.entries.sort_by_key(|e| e.z) }

    /// Front-most visible, focusable session.
    fn elect(&self) -> Option<SessionId> {
        self.entries.iter().rev().find(|e| e.visible && e.focusable).map(|e| e.id)
    }
}

/// Result of an operation that may have moved focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusChange {
    pub display: DisplayId,
    pub from: Option<SessionId>,
    pub to: Option<SessionId>,
}

impl FocusChange {
    pub fn changed(&self) -> bool { self.from != self.to }
}

#[derive(Debug, Default)]
struct Inner {
    stacks: BTreeMap<DisplayId, DisplayStack>,
    index: HashMap<SessionId, DisplayId>,
}

impl Inner {
    fn stack_of(&mut self, id: SessionId) -> WmResult<(DisplayId, &mut DisplayStack)> {
        let display = *self
            .index
            .get(&id)
            .ok_or_else(|| WmError::invalid_session(id, "not in the focus registry"))?;
        let stack = self
            .stacks
            .get_mut(&display)
            .ok_or_else(|| WmError::invalid_session(id, "not in the focus registry"))?;
        Ok((display, stack))
    }

    /// Focus must point at a live, visible, focusable entry and z values
    /// must be unique. A violation means some path mutated the registry
    /// without going through it; there is no safe way to continue.
    fn verify(&self) {
        for (display_id, stack) in &self.stacks {
            let mut seen = HashSet::default();
            for e in &stack.entries {
                if !seen.insert(e.z) {
                    error!(display = %display_id, z = e.z, "duplicate z-order value");
                    panic!("z-order corrupted on {display_id}");
                }
            }
            if let Some(f) = stack.focused
                && !stack.entries.iter().any(|e| e.id == f && e.visible && e.focusable)
            {
                error!(display = %display_id, focused = %f, "focus points at an ineligible session");
                panic!("focus corrupted on {display_id}");
            }
        }
    }

    fn refocus_if_lost(&mut self, display: DisplayId) -> Option<FocusChange> {
        let stack = self.stacks.get_mut(&display)?;
        let focused = stack.focused?;
        let still_ok = stack.entries.iter().any(|e| e.id == focused && e.visible && e.focusable);
        if still_ok {
            return None;
        }
        let to = stack.elect();
        stack.focused = to;
        Some(FocusChange { display, from: Some(focused), to })
    }
}

#[derive(Debug, Default)]
pub struct FocusRegistry {
    inner: Mutex<Inner>,
}

impl FocusRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registers a hidden session on top of `display`'s stack.
    pub fn insert(&self, display: DisplayId, id: SessionId, focusable: bool) {
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&id) {
            return;
        }
        let stack = inner.stacks.entry(display).or_default();
        let z = stack.bump();
        stack.entries.push(Entry { id, z, visible: false, focusable });
        inner.index.insert(id, display);
        inner.verify();
    }

    /// Removes `id`, electing the next visible focusable session front to
    /// back when `id` held focus.
    pub fn remove(&self, id: SessionId) -> Option<FocusChange> {
        let mut inner = self.inner.lock();
        let display = inner.index.remove(&id)?;
        let stack = inner.stacks.get_mut(&display)?;
        if let Some(pos) = stack.position(id) {
            stack.entries.remove(pos);
        }
        let change = if stack.focused == Some(id) {
            let to = stack.elect();
            stack.focused = to;
            Some(FocusChange { display, from: Some(id), to })
        } else {
            None
        };
        inner.verify();
        debug!(%id, ?change, "removed from focus registry");
        change
    }

    pub fn set_visible(&self, id: SessionId, visible: bool) -> WmResult<Option<FocusChange>> {
        let mut inner = self.inner.lock();
        let (display, stack) = inner.stack_of(id)?;
        if let Some(pos) = stack.position(id) {
            stack.entries[pos].visible = visible;
        }
        let change = inner.refocus_if_lost(display);
        inner.verify();
        Ok(change)
    }

    pub fn set_focusable(&self, id: SessionId, focusable: bool) -> WmResult<Option<FocusChange>> {
        let mut inner = self.inner.lock();
        let (display, stack) = inner.stack_of(id)?;
        if let Some(pos) = stack.position(id) {
            stack.entries[pos].focusable = focusable;
        }
        let change = inner.refocus_if_lost(display);
        inner.verify();
        Ok(change)
    }

    /// Clears focus on the previous holder and gives it to `id` in one step.
    pub fn focus(&self, id: SessionId) -> WmResult<FocusChange> {
        let mut inner = self.inner.lock();
        let (display, stack) = inner.stack_of(id)?;
        let entry = stack.position(id).map(|p| stack.entries[p]);
        match entry {
            Some(e) if e.visible && e.focusable => {}
            _ => return Err(WmError::invalid_session(id, "not visible or not focusable")),
        }
        let from = stack.focused.replace(id);
        inner.verify();
        Ok(FocusChange { display, from, to: Some(id) })
    }

    /// Puts `id` on top of its display, followed by `children` (those on the
    /// same display) in their current relative order. Returns the new
    /// front-to-back order.
    pub fn raise(&self, id: SessionId, children: &[SessionId]) -> WmResult<(DisplayId, Vec<SessionId>)> {
        let mut inner = self.inner.lock();
        let (display, stack) = inner.stack_of(id)?;
        let mut movers: Vec<Entry> =
            stack.entries.iter().filter(|e| children.contains(&e.id)).copied().collect();
        movers.sort_by_key(|e| e.z);
        let z = stack.bump();
        if let Some(pos) = stack.position(id) {
            stack.entries[pos].z = z;
        }
        for m in movers {
            let z = stack.bump();
            if let Some(pos) = stack.position(m.id) {
                stack.entries[pos].z = z;
            }
        }
        stack.sort();
        let order = stack.entries.iter().rev().map(|e| e.id).collect();
        inner.verify();
        Ok((display, order))
    }

    /// Moves `id` to the top of `to`, keeping its visibility. Focus held on
    /// the old display is re-elected there.
    pub fn move_to_display(&self, id: SessionId, to: DisplayId) -> WmResult<Option<FocusChange>> {
        let mut inner = self.inner.lock();
        let (from, stack) = inner.stack_of(id)?;
        if from == to {
            return Ok(None);
        }
        let Some(pos) = stack.position(id) else {
            return Ok(None);
        };
        let mut entry = stack.entries.remove(pos);
        let change = if stack.focused == Some(id) {
            let next = stack.elect();
            stack.focused = next;
            Some(FocusChange { display: from, from: Some(id), to: next })
        } else {
            None
        };
        let target = inner.stacks.entry(to).or_default();
        entry.z = target.bump();
        target.entries.push(entry);
        inner.index.insert(id, to);
        inner.verify();
        Ok(change)
    }

    pub fn focused(&self, display: DisplayId) -> Option<SessionId> {
        self.inner.lock().stacks.get(&display).and_then(|s| s.focused)
    }

    pub fn is_focused(&self, id: SessionId) -> bool {
        let inner = self.inner.lock();
        inner
            .index
            .get(&id)
            .and_then(|d| inner.stacks.get(d))
            .is_some_and(|s| s.focused == Some(id))
    }

    pub fn z_order(&self, id: SessionId) -> Option<u64> {
        let inner = self.inner.lock();
        let stack = inner.stacks.get(inner.index.get(&id)?)?;
        stack.entries.iter().find(|e| e.id == id).map(|e| e.z)
    }

    /// Front to back.
    pub fn stacking(&self, display: DisplayId) -> Vec<SessionId> {
        let inner = self.inner.lock();
        inner
            .stacks
            .get(&display)
            .map(|s| s.entries.iter().rev().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    pub fn display_of(&self, id: SessionId) -> Option<DisplayId> { self.inner.lock().index.get(&id).copied() }

    pub fn focused_count(&self, display: DisplayId) -> usize {
        self.inner.lock().stacks.get(&display).map_or(0, |s| usize::from(s.focused.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const D: DisplayId = DisplayId(0);

    fn s(i: i32) -> SessionId { SessionId::new(i) }

    fn registry(n: i32) -> FocusRegistry {
        let reg = FocusRegistry::new();
        for i in 1..=n {
            reg.insert(D, s(i), true);
            reg.set_visible(s(i), true).unwrap();
        }
        reg
    }

    #[test]
    fn focusing_moves_the_single_focus() {
        let reg = registry(3);
        assert_eq!(reg.focus(s(1)).unwrap().from, None);
        let change = reg.focus(s(2)).unwrap();
        assert_eq!(change.from, Some(s(1)));
        assert!(!reg.is_focused(s(1)));
        assert!(reg.is_focused(s(2)));
        assert_eq!(reg.focused_count(D), 1);
    }

    #[test]
    fn removing_focused_elects_front_most_candidate() {
        let reg = registry(3);
        reg.set_focusable(s(3), false).unwrap();
        reg.focus(s(1)).unwrap();
        reg.raise(s(1), &[]).unwrap();
        let change = reg.remove(s(1)).unwrap();
        // Stack front to back is now 3, 2; 3 is not focusable.
        assert_eq!(change.to, Some(s(2)));
        assert_eq!(reg.focused(D), Some(s(2)));
    }

    #[test]
    fn removing_last_candidate_leaves_no_focus() {
        let reg = registry(1);
        reg.focus(s(1)).unwrap();
        let change = reg.remove(s(1)).unwrap();
        assert_eq!(change.to, None);
        assert_eq!(reg.focused(D), None);
    }

    #[test]
    fn hiding_focused_session_reelects() {
        let reg = registry(2);
        reg.focus(s(2)).unwrap();
        let change = reg.set_visible(s(2), false).unwrap().unwrap();
        assert_eq!(change, FocusChange { display: D, from: Some(s(2)), to: Some(s(1)) });
    }

    #[test]
    fn hidden_sessions_cannot_take_focus() {
        let reg = registry(1);
        reg.insert(D, s(2), true);
        assert!(reg.focus(s(2)).is_err());
        assert!(reg.focus(s(9)).is_err());
    }

    #[test]
    fn raise_brings_children_along_in_order() {
        let reg = registry(4);
        // 1 is the parent of 3 and 2 (2 currently below 3).
        let (_, order) = reg.raise(s(1), &[s(3), s(2)]).unwrap();
        assert_eq!(order, vec![s(3), s(2), s(1), s(4)]);
        let zs: Vec<_> = [1, 2, 3, 4].map(|i| reg.z_order(s(i)).unwrap()).to_vec();
        let unique: HashSet<_> = zs.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn moving_display_keeps_focus_unique() {
        let reg = registry(2);
        reg.focus(s(2)).unwrap();
        let change = reg.move_to_display(s(2), DisplayId(1)).unwrap().unwrap();
        assert_eq!(change.to, Some(s(1)));
        assert_eq!(reg.stacking(DisplayId(1)), vec![s(2)]);
        assert_eq!(reg.focused(DisplayId(1)), None);
    }
}
