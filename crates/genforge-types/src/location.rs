//! World coordinates.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A block position in a named world. Generators are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BlockLocation {
    /// World name.
    pub world: String,
    /// Block x coordinate.
    pub x: i32,
    /// Block y coordinate.
    pub y: i32,
    /// Block z coordinate.
    pub z: i32,
}

impl BlockLocation {
    /// Create a location.
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Euclidean distance to `other`, or `None` if the worlds differ.
    pub fn distance(&self, other: &Self) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        let dz = f64::from(self.z) - f64::from(other.z);
        Some(dx.mul_add(dx, dy.mul_add(dy, dz * dz)).sqrt())
    }

    /// Whether `other` is in the same world and no further than `range`.
    pub fn within(&self, other: &Self, range: f64) -> bool {
        self.distance(other).is_some_and(|d| d <= range)
    }
}

impl core::fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{},{},{}", self.world, self.x, self.y, self.z)
    }
}
