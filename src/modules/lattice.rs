use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Integer lattice coordinate; the medium's index key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn origin() -> Self {
        Self { x: 0, y: 0, z: 0 }
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    pub fn squared_distance(self, other: Position) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }

    pub fn manhattan_distance(self, other: Position) -> i64 {
        (self.x - other.x).abs() as i64
            + (self.y - other.y).abs() as i64
            + (self.z - other.z).abs() as i64
    }

    pub fn to_continuous(self) -> Vector3 {
        Vector3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Self) -> Self::Output {
        self.offset(rhs.x, rhs.y, rhs.z)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Self) -> Self::Output {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Real-valued 3-D vector used for direction and stepping math only.
///
/// Never stored as a particle's position; convert back with [`Vector3::truncate`]
/// or [`Vector3::round`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction; zero-length input is a geometry error.
    pub fn normalize(self) -> Result<Vector3> {
        let len = self.length();
        if !(len > f64::EPSILON) || !len.is_finite() {
            return Err(SimError::DegenerateGeometry {
                what: format!("cannot normalise zero-length vector {:?}", self),
            });
        }
        Ok(Vector3::new(self.x / len, self.y / len, self.z / len))
    }

    /// Unit direction from `from` to `to`.
    pub fn direction(from: Position, to: Position) -> Result<Vector3> {
        (to - from).to_continuous().normalize()
    }

    pub fn truncate(self) -> Position {
        Position::new(self.x as i32, self.y as i32, self.z as i32)
    }

    pub fn round(self) -> Position {
        Position::new(
            self.x.round() as i32,
            self.y.round() as i32,
            self.z.round() as i32,
        )
    }

    /// Lattice cells touched by this point: its truncation and its rounding.
    pub fn touched_cells(self) -> [Position; 2] {
        [self.truncate(), self.round()]
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Self) -> Self::Output {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}
