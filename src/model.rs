pub mod ability_store;
pub mod focus;
pub mod hierarchy;
pub mod session;
pub mod state;

pub use focus::FocusRegistry;
pub use hierarchy::Hierarchy;
pub use session::{Session, SessionId, SessionSnapshot, SizeChangeReason, WindowKind};
pub use state::SessionState;
