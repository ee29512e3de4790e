//! Point and bounding-box primitives consumed by the k-d tree engine.
//!
//! The engine itself only needs a 3D point *value type*; [`Point3`] is the
//! trait that type must implement. [`Point3D`] is a concrete, minimal
//! implementation provided for tests, benches and demos — a real caller
//! (mapping stack, point cloud loader, ...) is expected to implement
//! [`Point3`] for its own richer point type instead.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A value with three accessible floating-point coordinates.
pub trait Point3: Clone + std::fmt::Debug {
    /// The x coordinate.
    fn x(&self) -> f64;
    /// The y coordinate.
    fn y(&self) -> f64;
    /// The z coordinate.
    fn z(&self) -> f64;

    /// Returns the coordinate along `axis` (0 = x, 1 = y, 2 = z).
    ///
    /// # Panics
    ///
    /// Panics if `axis` is not in `0..3`; the tree never calls this with an
    /// out-of-range axis.
    fn coord(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x(),
            1 => self.y(),
            2 => self.z(),
            _ => panic!("invalid axis {axis}, expected 0, 1 or 2"),
        }
    }

    /// Squared Euclidean distance to `other`.
    fn distance_sq(&self, other: &Self) -> f64 {
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        let dz = self.z() - other.z();
        dx * dx + dy * dy + dz * dz
    }
}

/// A plain 3D point. The default [`Point3`] implementation for tests, benches and demos.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point3D { x, y, z }
    }
}

impl Point3 for Point3D {
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
    fn z(&self) -> f64 {
        self.z
    }
}

/// An axis-aligned box, used both as a node's geometric envelope and as a
/// box-deletion query volume.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// The degenerate box enclosing exactly one point.
    pub fn from_point<P: Point3>(p: &P) -> Self {
        BoundingBox {
            min: [p.x(), p.y(), p.z()],
            max: [p.x(), p.y(), p.z()],
        }
    }

    /// Builds a box from explicit per-axis `[min, max]` ranges.
    pub fn from_ranges(x_range: [f64; 2], y_range: [f64; 2], z_range: [f64; 2]) -> Self {
        BoundingBox {
            min: [x_range[0], y_range[0], z_range[0]],
            max: [x_range[1], y_range[1], z_range[1]],
        }
    }

    /// The smallest box enclosing `self`, `other` and `self` itself.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].min(other.min[axis]);
            max[axis] = max[axis].max(other.max[axis]);
        }
        BoundingBox { min, max }
    }

    /// Squared distance from `query` to the nearest point of this box (0 if `query` is inside).
    pub fn dist_sq<P: Point3>(&self, query: &P) -> f64 {
        let mut total = 0.0;
        for axis in 0..3 {
            let q = query.coord(axis);
            if q < self.min[axis] {
                let d = q - self.min[axis];
                total += d * d;
            } else if q > self.max[axis] {
                let d = q - self.max[axis];
                total += d * d;
            }
        }
        total
    }

    /// True iff `self` lies strictly inside `other` on every axis (used by box deletion,
    /// which intentionally treats a point exactly on a query box's face as not enclosed).
    pub fn strictly_inside(&self, other: &BoundingBox) -> bool {
        (0..3).all(|axis| self.min[axis] > other.min[axis] && self.max[axis] < other.max[axis])
    }
}
