pub mod coordinates;
pub mod limits;
pub mod rect_controller;

pub use limits::{ASPECT_RATIO_EPSILON, WindowLimits, validate_aspect_ratio};
pub use rect_controller::{LayoutConstraints, ResizeEdges, compute_effective_rect};
