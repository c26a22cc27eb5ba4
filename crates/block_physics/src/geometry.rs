use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vector3I {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vector3I {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(self, other: Vector3I) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        let dz = i64::from(self.z - other.z);
        dx * dx + dy * dy + dz * dz
    }
}

impl Add for Vector3I {
    type Output = Vector3I;

    fn add(self, rhs: Vector3I) -> Self::Output {
        Vector3I::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3I {
    type Output = Vector3I;

    fn sub(self, rhs: Vector3I) -> Self::Output {
        Vector3I::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Vector3I {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3F {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3F {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalized(self) -> Self {
        let length = self.length();
        if length <= f32::EPSILON {
            return Self::default();
        }
        Self::new(self.x / length, self.y / length, self.z / length)
    }

    /// Direction a player looks in, from the rotation/pitch bytes of a position
    /// packet (256 steps per full turn, rotation zero facing -y).
    pub fn from_rotation(rotation: u8, pitch: u8) -> Self {
        let ksi = 2.0 * std::f64::consts::PI * (-f64::from(pitch)) / 256.0;
        let phi = 2.0 * std::f64::consts::PI * (f64::from(rotation) - 64.0) / 256.0;
        let r = ksi.cos();
        Self::new(
            (r * phi.cos()) as f32,
            (r * phi.sin()) as f32,
            ksi.sin() as f32,
        )
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Rounds each component to the nearest block coordinate.
    pub fn round_to_block(self) -> Vector3I {
        Vector3I::new(
            self.x.round() as i32,
            self.y.round() as i32,
            self.z.round() as i32,
        )
    }
}

impl Add for Vector3F {
    type Output = Vector3F;

    fn add(self, rhs: Vector3F) -> Self::Output {
        Vector3F::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl From<Vector3I> for Vector3F {
    fn from(value: Vector3I) -> Self {
        Vector3F::new(value.x as f32, value.y as f32, value.z as f32)
    }
}
