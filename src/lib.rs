//! Window-management core: session lifecycle, per-session serialized task
//! queues, parent/child hierarchy with rect propagation, interactive
//! move/resize, cross-display anchoring and focus/z-order arbitration.

pub mod actor;
pub mod common;
pub mod layout_engine;
pub mod model;
pub mod sys;
