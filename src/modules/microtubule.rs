use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::modules::lattice::{Position, Vector3};

pub type TubeId = usize;

/// Straight guided-transport track between two lattice cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Microtubule {
    pub id: TubeId,
    pub start: Position,
    pub end: Position,
    direction: Vector3,
    cells: Vec<Position>,
}

impl Microtubule {
    /// Builds the track by marching from `start` toward `end` one unit at a
    /// time and recording every cell the march touches.
    pub fn new(id: TubeId, start: Position, end: Position) -> Result<Self> {
        let direction = Vector3::direction(start, end).map_err(|_| SimError::DegenerateGeometry {
            what: format!("microtubule {id} has identical endpoints {start}"),
        })?;

        let bound = (end - start).to_continuous().length().ceil() as usize * 2 + 2;
        let mut cells = vec![start];
        let mut cursor = start.to_continuous();
        let mut steps = 0;
        while cells.last() != Some(&end) {
            if steps >= bound {
                return Err(SimError::UnreachableTarget {
                    from: start,
                    to: end,
                    steps,
                });
            }
            cursor = cursor + direction;
            steps += 1;
            for cell in cursor.touched_cells() {
                if !cells.contains(&cell) {
                    cells.push(cell);
                }
            }
            if cursor.round() == end && cells.last() != Some(&end) {
                cells.retain(|c| *c != end);
                cells.push(end);
            }
        }

        Ok(Self {
            id,
            start,
            end,
            direction,
            cells,
        })
    }

    pub fn direction(&self) -> Vector3 {
        self.direction
    }

    /// Every lattice cell the track occupies, start first and end last.
    pub fn cells(&self) -> &[Position] {
        &self.cells
    }

    pub fn contains(&self, position: Position) -> bool {
        self.cells.contains(&position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_aligned_track_covers_segment() {
        let tube = Microtubule::new(0, Position::new(0, 0, 0), Position::new(4, 0, 0)).unwrap();
        assert_eq!(
            tube.cells(),
            &[
                Position::new(0, 0, 0),
                Position::new(1, 0, 0),
                Position::new(2, 0, 0),
                Position::new(3, 0, 0),
                Position::new(4, 0, 0),
            ]
        );
        assert_eq!(tube.direction(), Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn diagonal_track_ends_at_end() {
        let end = Position::new(5, 3, -2);
        let tube = Microtubule::new(1, Position::origin(), end).unwrap();
        assert_eq!(tube.cells().first(), Some(&Position::origin()));
        assert_eq!(tube.cells().last(), Some(&end));
        assert!(tube.contains(end));
        assert!((tube.direction().length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identical_endpoints_are_degenerate() {
        let p = Position::new(2, 2, 2);
        let err = Microtubule::new(3, p, p).unwrap_err();
        assert!(matches!(err, SimError::DegenerateGeometry { .. }));
    }
}
