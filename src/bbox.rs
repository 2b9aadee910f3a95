use std::fmt;

use anyhow::{ensure, Result};

use crate::vector::{vec3, Vec3};

/// Axis aligned bounding box.
///
/// Conceptually a pair (origin, size) with `size >= 0` on every axis;
/// stored as the two corners so that unions and intersections reuse the
/// operands' coordinates bit for bit. The unique empty box has a NaV
/// origin and zero size.
#[derive(Copy, Clone, Debug)]
pub struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::NAV,
        max: Vec3::NAV,
    };

    pub const FULL: Aabb = Aabb {
        min: vec3(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        max: vec3(f64::INFINITY, f64::INFINITY, f64::INFINITY),
    };

    /// Create a box from an origin and a size, swapping corners on axes
    /// where the size is negative so that `size >= 0` always holds.
    pub fn new(origin: Vec3, size: Vec3) -> Aabb {
        if origin.is_nav() || size.is_nav() {
            return Aabb::EMPTY;
        }
        let corner = origin + size;
        Aabb {
            min: origin.min_by_component(corner),
            max: origin.max_by_component(corner),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_nav()
    }

    pub fn is_full(&self) -> bool {
        !self.is_empty()
            && self.min == Aabb::FULL.min
            && self.max == Aabb::FULL.max
    }

    pub fn origin(&self) -> Vec3 {
        self.min
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn max_corner(&self) -> Vec3 {
        self.max
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Smallest extent over the three axes; zero for the empty box. A
    /// degenerate intersection (boxes touching along a face) reports 0
    /// here while still being non-empty as a point set.
    pub fn min_extent(&self) -> f64 {
        self.size().min_component()
    }

    pub fn contains(&self, p: Vec3) -> bool {
        if self.is_empty() || p.is_nav() {
            return false;
        }
        self.min.0 <= p.0
            && p.0 <= self.max.0
            && self.min.1 <= p.1
            && p.1 <= self.max.1
            && self.min.2 <= p.2
            && p.2 <= self.max.2
    }

    /// Relative position of a point inside the box: the minimum corner
    /// maps to (0, 0, 0) and the maximum corner to (1, 1, 1). Axes of
    /// zero extent are left undivided.
    pub fn offset(&self, point: Vec3) -> Vec3 {
        let mut o = point - self.min;
        if self.max.0 > self.min.0 {
            o.0 /= self.max.0 - self.min.0;
        }
        if self.max.1 > self.min.1 {
            o.1 /= self.max.1 - self.min.1;
        }
        if self.max.2 > self.min.2 {
            o.2 /= self.max.2 - self.min.2;
        }
        o
    }

    /// Smallest box enclosing both operands; empty boxes are ignored.
    pub fn union(&self, other: &Aabb) -> Aabb {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Aabb {
            min: self.min.min_by_component(other.min),
            max: self.max.max_by_component(other.max),
        }
    }

    /// Largest box contained in both operands. A strict gap on any axis
    /// yields the empty box; mere touching yields a zero-extent box.
    pub fn intersect(&self, other: &Aabb) -> Aabb {
        if self.is_empty() || other.is_empty() {
            return Aabb::EMPTY;
        }
        let min = self.min.max_by_component(other.min);
        let max = self.max.min_by_component(other.max);
        if max.0 < min.0 || max.1 < min.1 || max.2 < min.2 {
            return Aabb::EMPTY;
        }
        Aabb { min, max }
    }

    /// Smallest box containing every given point, the empty box for an
    /// empty iterator. NaN coordinates are tolerated as long as the
    /// remaining points still pin down every axis.
    pub fn bound_of_points(points: impl IntoIterator<Item = Vec3>) -> Result<Aabb> {
        let mut any = false;
        let mut min = vec3(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = vec3(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            any = true;
            // f64::min/max skip NaN operands
            min = min.min_by_component(p);
            max = max.max_by_component(p);
        }
        if !any {
            return Ok(Aabb::EMPTY);
        }
        ensure!(
            min.0 <= max.0 && min.1 <= max.1 && min.2 <= max.2,
            "underspecified point"
        );
        Ok(Aabb { min, max })
    }

    /// Smallest box containing every given box, ignoring empties.
    pub fn bound_of_boxes(boxes: impl IntoIterator<Item = Aabb>) -> Aabb {
        boxes
            .into_iter()
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b))
    }

    /// Largest box contained in every given box; [`Aabb::FULL`] for an
    /// empty iterator.
    pub fn intersect_of_boxes(boxes: impl IntoIterator<Item = Aabb>) -> Aabb {
        boxes
            .into_iter()
            .fold(Aabb::FULL, |acc, b| acc.intersect(&b))
    }
}

impl PartialEq for Aabb {
    fn eq(&self, other: &Self) -> bool {
        // every empty box is the same empty box
        if self.is_empty() || other.is_empty() {
            return self.is_empty() && other.is_empty();
        }
        self.min == other.min && self.max == other.max
    }
}

impl Eq for Aabb {}

impl fmt::Display for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{origin: {}, size: {}}}", self.origin(), self.size())
    }
}
