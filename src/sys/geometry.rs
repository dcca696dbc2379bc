//! Integer geometry shared by every layer of the window manager.
//!
//! Rectangles are expressed in physical pixels. A rect with a non-positive
//! width or height is considered empty. Client-supplied values may sit
//! anywhere in the `i32` range, so translations are checked and the derived
//! edges (`right`, `bottom`, `center`) saturate instead of wrapping.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self { Point { x, y } }

    /// Chebyshev distance, which is what the drag threshold is measured in.
    pub fn max_axis_distance(self, other: Point) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// The offset that moves `other` onto `self`, if it fits in `i32`.
    pub fn checked_offset_from(self, other: Point) -> Option<Offset> {
        Some(Offset {
            dx: self.x.checked_sub(other.x)?,
            dy: self.y.checked_sub(other.y)?,
        })
    }
}

/// A translation between two coordinate spaces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

impl Offset {
    pub const fn new(dx: i32, dy: i32) -> Self { Offset { dx, dy } }

    pub fn checked_neg(self) -> Option<Offset> {
        Some(Offset { dx: self.dx.checked_neg()?, dy: self.dy.checked_neg()? })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const ZERO: Rect = Rect { x: 0, y: 0, width: 0, height: 0 };

    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Rect { x, y, width, height }
    }

    pub fn origin(&self) -> Point { Point::new(self.x, self.y) }

    pub fn right(&self) -> i32 { self.x.saturating_add(self.width) }

    pub fn bottom(&self) -> i32 { self.y.saturating_add(self.height) }

    pub fn is_empty(&self) -> bool { self.width <= 0 || self.height <= 0 }

    pub fn center(&self) -> Point {
        Point::new(self.x.saturating_add(self.width / 2), self.y.saturating_add(self.height / 2))
    }

    pub fn with_size(&self, width: i32, height: i32) -> Rect {
        Rect { width, height, ..*self }
    }

    /// `None` when the moved origin leaves the `i32` range.
    pub fn checked_translate(&self, offset: Offset) -> Option<Rect> {
        Some(Rect {
            x: self.x.checked_add(offset.dx)?,
            y: self.y.checked_add(offset.dy)?,
            ..*self
        })
    }

    /// Half-open containment: the right and bottom edges are outside.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, right.saturating_sub(x).max(0), bottom.saturating_sub(y).max(0))
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.is_empty() && !other.is_empty() && !self.intersection(other).is_empty()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rects_never_overlap() {
        let a = Rect::new(0, 0, 100, 100);
        assert!(!a.overlaps(&Rect::new(10, 10, 0, 50)));
        assert!(!Rect::ZERO.overlaps(&a));
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(100, 0, 100, 100);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&Rect::new(99, 99, 10, 10)));
    }

    #[test]
    fn intersection_clamps_to_zero() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 10, 10);
        assert_eq!(a.intersection(&b), Rect::new(20, 20, 0, 0));
        assert_eq!(a.intersection(&Rect::new(5, 5, 10, 10)), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn contains_is_half_open() {
        let r = Rect::new(10, 10, 5, 5);
        assert!(r.contains(Point::new(10, 10)));
        assert!(r.contains(Point::new(14, 14)));
        assert!(!r.contains(Point::new(15, 10)));
    }

    #[test]
    fn point_difference_is_an_offset() {
        let a = Point::new(30, 40);
        let b = Point::new(10, 50);
        let off = a.checked_offset_from(b).unwrap();
        assert_eq!(off, Offset::new(20, -10));
        let r = Rect::new(b.x, b.y, 1, 1);
        assert_eq!(r.checked_translate(off).unwrap().origin(), a);
        assert_eq!(off.checked_neg(), Some(Offset::new(-20, 10)));
    }

    #[test]
    fn extreme_coordinates_never_wrap() {
        let far = Rect::new(i32::MAX - 10, i32::MIN + 5, 400, 300);
        assert_eq!(far.right(), i32::MAX);
        assert_eq!(far.bottom(), i32::MIN + 305);
        assert_eq!(far.checked_translate(Offset::new(11, 0)), None);
        assert_eq!(far.checked_translate(Offset::new(0, -6)), None);
        let edge = far.checked_translate(Offset::new(10, -5)).unwrap();
        assert_eq!(edge.origin(), Point::new(i32::MAX, i32::MIN));
        assert!(far.contains(Point::new(i32::MAX - 1, i32::MIN + 5)));
        assert!(!far.overlaps(&Rect::new(i32::MIN, 0, 1920, 1080)));
        assert_eq!(Point::new(i32::MIN, 0).checked_offset_from(Point::new(1, 0)), None);
        assert_eq!(Point::new(i32::MIN, 0).max_axis_distance(Point::new(i32::MAX, 0)), u32::MAX);
        assert_eq!(Offset::new(i32::MIN, 0).checked_neg(), None);
    }
}
