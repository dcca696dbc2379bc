//! Boundary to the render/surface service.
//!
//! The window manager only asks for presentation nodes to be created,
//! cloned onto other displays, repositioned and released. Frames are drawn
//! elsewhere; the service reports the first one back through
//! `SceneManager::on_first_frame`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::error::WmResult;
use crate::model::session::SessionId;
use crate::sys::geometry::Rect;
use crate::sys::screen::DisplayId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

pub trait RenderService: Send + Sync {
    fn create_node(&self, session: SessionId, display: DisplayId, bounds: Rect) -> WmResult<NodeId>;

    fn release_node(&self, node: NodeId);

    fn set_bounds(&self, node: NodeId, bounds: Rect);

    /// Presents `node` on an additional display without transferring
    /// ownership. The source node is untouched.
    fn clone_node(&self, node: NodeId, display: DisplayId) -> WmResult<()>;

    fn remove_clone(&self, node: NodeId, display: DisplayId);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderOp {
    Create { node: NodeId, session: SessionId, display: DisplayId, bounds: Rect },
    Release(NodeId),
    SetBounds(NodeId, Rect),
    Clone(NodeId, DisplayId),
    RemoveClone(NodeId, DisplayId),
}

/// Render service that draws nothing and remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct HeadlessRender {
    next: AtomicU64,
    ops: Mutex<Vec<RenderOp>>,
}

impl HeadlessRender {
    pub fn new() -> Self { Self::default() }

    pub fn ops(&self) -> Vec<RenderOp> { self.ops.lock().clone() }

    pub fn clones_of(&self, node: NodeId) -> Vec<DisplayId> {
        let mut live = Vec::new();
        for op in self.ops.lock().iter() {
            match *op {
                RenderOp::Clone(n, d) if n == node => live.push(d),
                RenderOp::RemoveClone(n, d) if n == node => live.retain(|x| *x != d),
                _ => {}
            }
        }
        live
    }

    fn record(&self, op: RenderOp) {
        trace!(?op, "render");
        self.ops.lock().push(op);
    }
}

impl RenderService for HeadlessRender {
    fn create_node(&self, session: SessionId, display: DisplayId, bounds: Rect) -> WmResult<NodeId> {
        let node = NodeId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.record(RenderOp::Create { node, session, display, bounds });
        Ok(node)
    }

    fn release_node(&self, node: NodeId) { self.record(RenderOp::Release(node)) }

    fn set_bounds(&self, node: NodeId, bounds: Rect) { self.record(RenderOp::SetBounds(node, bounds)) }

    fn clone_node(&self, node: NodeId, display: DisplayId) -> WmResult<()> {
        self.record(RenderOp::Clone(node, display));
        Ok(())
    }

    fn remove_clone(&self, node: NodeId, display: DisplayId) {
        self.record(RenderOp::RemoveClone(node, display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_tracks_live_clones() {
        let render = HeadlessRender::new();
        let node = render.create_node(SessionId::new(1), DisplayId(0), Rect::ZERO).unwrap();
        render.clone_node(node, DisplayId(1)).unwrap();
        render.clone_node(node, DisplayId(2)).unwrap();
        render.remove_clone(node, DisplayId(1));
        assert_eq!(render.clones_of(node), vec![DisplayId(2)]);
        assert_eq!(render.ops().len(), 4);
    }

    #[test]
    fn node_ids_are_unique() {
        let render = HeadlessRender::new();
        let a = render.create_node(SessionId::new(1), DisplayId(0), Rect::ZERO).unwrap();
        let b = render.create_node(SessionId::new(2), DisplayId(0), Rect::ZERO).unwrap();
        assert_ne!(a, b);
    }
}
