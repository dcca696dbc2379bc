//! Conversions between display-relative, parent-relative and global space.
//!
//! Both directions are plain integer translations, so any number of
//! round-trips is exact. A conversion that would leave the `i32` range is
//! refused rather than wrapped.

use crate::common::error::{WmError, WmResult};
use crate::sys::geometry::{Offset, Point, Rect};

fn out_of_range(rect: Rect, origin: Point) -> WmError {
    WmError::invalid_parameter(format!(
        "{rect} relative to ({}, {}) is outside the coordinate range",
        origin.x, origin.y
    ))
}

/// Moves a rect expressed relative to `origin` into global space.
pub fn to_global(relative: Rect, origin: Point) -> WmResult<Rect> {
    relative
        .checked_translate(Offset::new(origin.x, origin.y))
        .ok_or_else(|| out_of_range(relative, origin))
}

/// Expresses a global rect relative to the origin of `parent`.
pub fn to_relative(global: Rect, parent: Rect) -> WmResult<Rect> {
    let origin = parent.origin();
    Offset::new(origin.x, origin.y)
        .checked_neg()
        .and_then(|back| global.checked_translate(back))
        .ok_or_else(|| out_of_range(global, origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact() {
        let origins = [
            Point::new(0, 0),
            Point::new(1920, 0),
            Point::new(-1280, 200),
            Point::new(3840, -1080),
        ];
        let rects = [
            Rect::new(0, 0, 1, 1),
            Rect::new(-50, 13, 333, 777),
            Rect::new(i32::MAX / 4, -7, 10, 10),
        ];
        for origin in origins {
            let display = Rect::new(origin.x, origin.y, 1920, 1080);
            for r in rects {
                let mut cur = r;
                for _ in 0..16 {
                    cur = to_relative(to_global(cur, origin).unwrap(), display).unwrap();
                }
                assert_eq!(cur, r, "origin {origin:?}");
            }
        }
    }

    #[test]
    fn overflowing_conversions_are_rejected() {
        let far = Rect::new(i32::MAX - 10, 0, 400, 300);
        assert!(matches!(
            to_global(far, Point::new(1920, 0)),
            Err(WmError::InvalidParameter(_))
        ));
        assert!(matches!(
            to_relative(Rect::new(i32::MIN + 5, 0, 10, 10), Rect::new(1920, 0, 1920, 1080)),
            Err(WmError::InvalidParameter(_))
        ));
        // The negated origin itself does not fit.
        assert!(to_relative(Rect::ZERO, Rect::new(i32::MIN, 0, 10, 10)).is_err());
        assert_eq!(to_global(far, Point::new(10, 0)).unwrap().x, i32::MAX);
    }
}
