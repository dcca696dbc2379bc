//! Displays known to the window manager and the notifications that change
//! them.
//!
//! Every display has an origin in the global coordinate space. Sessions
//! store rects relative to their display and the effective rect is obtained
//! by adding that origin.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::collections::BTreeMap;
use crate::common::error::{WmError, WmResult};
use crate::layout_engine::coordinates;
use crate::sys::geometry::{Point, Rect};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub u64);

impl DisplayId {
    pub const fn new(id: u64) -> Self { DisplayId(id) }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "display#{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenDescriptor {
    pub id: DisplayId,
    /// Global frame of the display.
    pub frame: Rect,
    /// Virtual displays (casting, recording) never receive cloned nodes.
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

impl ScreenDescriptor {
    pub fn new(id: u64, frame: Rect) -> Self {
        ScreenDescriptor {
            id: DisplayId(id),
            frame,
            is_virtual: false,
        }
    }

    pub fn origin(&self) -> Point { self.frame.origin() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisplayEvent {
    Added(ScreenDescriptor),
    Removed(DisplayId),
    Resized { id: DisplayId, width: i32, height: i32 },
    Rotated(DisplayId),
}

impl DisplayEvent {
    pub fn display(&self) -> DisplayId {
        match self {
            DisplayEvent::Added(d) => d.id,
            DisplayEvent::Removed(id)
            | DisplayEvent::Resized { id, .. }
            | DisplayEvent::Rotated(id) => *id,
        }
    }
}

/// Owned registry of displays. One instance per scene manager; nothing in
/// the crate reaches it through a global.
#[derive(Debug, Default)]
pub struct DisplayRegistry {
    screens: RwLock<BTreeMap<DisplayId, ScreenDescriptor>>,
}

impl DisplayRegistry {
    pub fn new(screens: impl IntoIterator<Item = ScreenDescriptor>) -> Self {
        let map = screens.into_iter().map(|s| (s.id, s)).collect();
        DisplayRegistry { screens: RwLock::new(map) }
    }

    pub fn get(&self, id: DisplayId) -> WmResult<ScreenDescriptor> {
        self.screens.read().get(&id).cloned().ok_or(WmError::InvalidDisplay(id))
    }

    pub fn contains(&self, id: DisplayId) -> bool { self.screens.read().contains_key(&id) }

    pub fn all(&self) -> Vec<ScreenDescriptor> { self.screens.read().values().cloned().collect() }

    /// The display sessions fall back to when theirs disappears.
    pub fn primary(&self) -> Option<DisplayId> { self.screens.read().keys().next().copied() }

    pub fn origin(&self, id: DisplayId) -> WmResult<Point> { self.get(id).map(|s| s.origin()) }

    pub fn to_global(&self, relative: Rect, id: DisplayId) -> WmResult<Rect> {
        coordinates::to_global(relative, self.origin(id)?)
    }

    pub fn to_display_relative(&self, global: Rect, id: DisplayId) -> WmResult<Rect> {
        coordinates::to_relative(global, self.get(id)?.frame)
    }

    /// Non-virtual displays whose frame overlaps `global`.
    pub fn physical_displays_overlapping(&self, global: &Rect) -> Vec<DisplayId> {
        self.screens
            .read()
            .values()
            .filter(|s| !s.is_virtual && s.frame.overlaps(global))
            .map(|s| s.id)
            .collect()
    }

    /// Physical display containing `p`, lowest id first.
    pub fn display_at(&self, p: Point) -> Option<DisplayId> {
        self.screens
            .read()
            .values()
            .find(|s| !s.is_virtual && s.frame.contains(p))
            .map(|s| s.id)
    }

    /// Applies a display notification and returns the affected id.
    pub fn apply(&self, event: &DisplayEvent) -> WmResult<DisplayId> {
        let mut screens = self.screens.write();
        match event {
            DisplayEvent::Added(desc) => {
                info!(id = %desc.id, frame = %desc.frame, "display added");
                screens.insert(desc.id, desc.clone());
            }
            DisplayEvent::Removed(id) => {
                if screens.remove(id).is_none() {
                    return Err(WmError::InvalidDisplay(*id));
                }
                info!(%id, "display removed");
            }
            &DisplayEvent::Resized { id, width, height } => {
                if width <= 0 || height <= 0 {
                    return Err(WmError::invalid_parameter(format!(
                        "display size must be positive, got {width}x{height}"
                    )));
                }
                let screen = screens.get_mut(&id).ok_or(WmError::InvalidDisplay(id))?;
                screen.frame = screen.frame.with_size(width, height);
                debug!(%id, frame = %screen.frame, "display resized");
            }
            DisplayEvent::Rotated(id) => {
                let screen = screens.get_mut(id).ok_or(WmError::InvalidDisplay(*id))?;
                screen.frame = screen.frame.with_size(screen.frame.height, screen.frame.width);
                debug!(%id, frame = %screen.frame, "display rotated");
            }
        }
        Ok(event.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_displays() -> DisplayRegistry {
        DisplayRegistry::new([
            ScreenDescriptor::new(1, Rect::new(0, 0, 1920, 1080)),
            ScreenDescriptor::new(2, Rect::new(1920, 0, 1280, 1024)),
        ])
    }

    #[test]
    fn primary_is_lowest_id() {
        let reg = two_displays();
        assert_eq!(reg.primary(), Some(DisplayId(1)));
        reg.apply(&DisplayEvent::Removed(DisplayId(1))).unwrap();
        assert_eq!(reg.primary(), Some(DisplayId(2)));
    }

    #[test]
    fn to_global_adds_display_origin() {
        let reg = two_displays();
        let global = reg.to_global(Rect::new(10, 20, 100, 100), DisplayId(2)).unwrap();
        assert_eq!(global, Rect::new(1930, 20, 100, 100));
        assert_eq!(
            reg.to_display_relative(global, DisplayId(2)).unwrap(),
            Rect::new(10, 20, 100, 100)
        );
    }

    #[test]
    fn unknown_display_is_reported() {
        let reg = two_displays();
        assert_eq!(
            reg.to_global(Rect::ZERO, DisplayId(9)),
            Err(WmError::InvalidDisplay(DisplayId(9)))
        );
        assert!(reg.apply(&DisplayEvent::Rotated(DisplayId(9))).is_err());
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let reg = two_displays();
        reg.apply(&DisplayEvent::Rotated(DisplayId(1))).unwrap();
        assert_eq!(reg.get(DisplayId(1)).unwrap().frame, Rect::new(0, 0, 1080, 1920));
    }

    #[test]
    fn virtual_displays_are_not_overlap_candidates() {
        let reg = two_displays();
        let mut cast = ScreenDescriptor::new(3, Rect::new(1920, 0, 500, 500));
        cast.is_virtual = true;
        reg.apply(&DisplayEvent::Added(cast)).unwrap();
        let hits = reg.physical_displays_overlapping(&Rect::new(1800, 10, 300, 300));
        assert_eq!(hits, vec![DisplayId(1), DisplayId(2)]);
    }

    #[test]
    fn display_at_ignores_gaps() {
        let reg = two_displays();
        assert_eq!(reg.display_at(Point::new(1919, 5)), Some(DisplayId(1)));
        assert_eq!(reg.display_at(Point::new(1920, 5)), Some(DisplayId(2)));
        assert_eq!(reg.display_at(Point::new(2000, 1050)), None);
    }

    #[test]
    fn resize_rejects_degenerate_sizes() {
        let reg = two_displays();
        let res = reg.apply(&DisplayEvent::Resized {
            id: DisplayId(1),
            width: 0,
            height: 100,
        });
        assert!(matches!(res, Err(WmError::InvalidParameter(_))));
    }
}
