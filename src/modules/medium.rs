//! Spatial occupancy index for the lattice.
//!
//! Positions outside the configured extents are legal: particles may wander
//! off the edge of the medium and keep diffusing there. Extents only bound
//! where noise is placed at setup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::modules::lattice::Position;
use crate::modules::microtubule::TubeId;
use crate::modules::molecule::MoleculeId;

pub type MachineId = usize;

/// Sink cell for particles awaiting removal. Never part of the geometry.
pub const GARBAGE: Position = Position::new(i32::MIN, i32::MIN, i32::MIN);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Transmitter,
    Receiver,
    Intermediate,
}

impl NodeRole {
    pub const fn label(self) -> &'static str {
        match self {
            NodeRole::Transmitter => "transmitter",
            NodeRole::Receiver => "receiver",
            NodeRole::Intermediate => "intermediate",
        }
    }

    /// Absorbs acknowledgements.
    pub const fn transmits(self) -> bool {
        matches!(self, NodeRole::Transmitter | NodeRole::Intermediate)
    }

    /// Absorbs information packets.
    pub const fn receives(self) -> bool {
        matches!(self, NodeRole::Receiver | NodeRole::Intermediate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occupant {
    Molecule(MoleculeId),
    Machine(MachineId),
    Track(TubeId),
}

#[derive(Clone, Debug)]
pub struct Medium {
    pub extents: Position,
    cells: HashMap<Position, Vec<Occupant>>,
    roles: HashMap<MachineId, NodeRole>,
}

impl Medium {
    pub fn new(extents: Position) -> Self {
        Self {
            extents,
            cells: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    pub fn add_occupant(&mut self, occupant: Occupant, position: Position) {
        let slot = self.cells.entry(position).or_default();
        if !slot.contains(&occupant) {
            slot.push(occupant);
        }
    }

    /// Registers a nanomachine over all the cells of its volume.
    pub fn add_machine(&mut self, id: MachineId, role: NodeRole, cells: &[Position]) {
        self.roles.insert(id, role);
        for cell in cells {
            self.add_occupant(Occupant::Machine(id), *cell);
        }
    }

    pub fn remove_occupant(&mut self, occupant: Occupant, position: Position) -> bool {
        let Some(slot) = self.cells.get_mut(&position) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|o| *o != occupant);
        let removed = slot.len() != before;
        if slot.is_empty() {
            self.cells.remove(&position);
        }
        removed
    }

    /// Moving to [`GARBAGE`] is terminal; the next sweep drops the occupant.
    pub fn move_occupant(&mut self, occupant: Occupant, from: Position, to: Position) {
        if from == to {
            return;
        }
        self.remove_occupant(occupant, from);
        self.add_occupant(occupant, to);
    }

    pub fn occupants_at(&self, position: Position) -> &[Occupant] {
        self.cells
            .get(&position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn molecules_at(&self, position: Position) -> impl Iterator<Item = MoleculeId> + '_ {
        self.occupants_at(position).iter().filter_map(|o| match o {
            Occupant::Molecule(id) => Some(*id),
            _ => None,
        })
    }

    pub fn has_molecule(&self, position: Position) -> bool {
        self.molecules_at(position).next().is_some()
    }

    pub fn contains_molecule(&self, id: MoleculeId, position: Position) -> bool {
        self.occupants_at(position)
            .contains(&Occupant::Molecule(id))
    }

    fn machine_at(
        &self,
        position: Position,
        exclude: Option<MachineId>,
        accepts: impl Fn(NodeRole) -> bool,
    ) -> Option<MachineId> {
        if position == GARBAGE {
            return None;
        }
        self.occupants_at(position).iter().find_map(|o| match o {
            Occupant::Machine(id)
                if Some(*id) != exclude && self.roles.get(id).is_some_and(|r| accepts(*r)) =>
            {
                Some(*id)
            }
            _ => None,
        })
    }

    /// Transmitting machine at `position` other than `exclude`.
    pub fn transmitter_at(&self, position: Position, exclude: Option<MachineId>) -> Option<MachineId> {
        self.machine_at(position, exclude, NodeRole::transmits)
    }

    /// Receiving machine at `position` other than `exclude`.
    pub fn receiver_at(&self, position: Position, exclude: Option<MachineId>) -> Option<MachineId> {
        self.machine_at(position, exclude, NodeRole::receives)
    }

    pub fn track_at(&self, position: Position) -> Option<TubeId> {
        if position == GARBAGE {
            return None;
        }
        self.occupants_at(position).iter().find_map(|o| match o {
            Occupant::Track(id) => Some(*id),
            _ => None,
        })
    }

    /// Empties the sink and returns whatever was in it.
    pub fn sweep_garbage(&mut self) -> Vec<Occupant> {
        self.cells.remove(&GARBAGE).unwrap_or_default()
    }

    pub fn garbage_len(&self) -> usize {
        self.occupants_at(GARBAGE).len()
    }

    pub fn inside_extents(&self, position: Position) -> bool {
        (0..self.extents.x).contains(&position.x)
            && (0..self.extents.y).contains(&position.y)
            && (0..self.extents.z).contains(&position.z)
    }

    /// Every cell currently holding a molecule.
    pub fn molecule_cells(&self) -> impl Iterator<Item = (Position, MoleculeId)> + '_ {
        self.cells.iter().flat_map(|(pos, slot)| {
            slot.iter().filter_map(move |o| match o {
                Occupant::Molecule(id) => Some((*pos, *id)),
                _ => None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_keeps_index_consistent() {
        let mut medium = Medium::new(Position::new(10, 10, 10));
        let a = Position::new(1, 1, 1);
        let b = Position::new(2, 1, 1);
        medium.add_occupant(Occupant::Molecule(7), a);
        medium.move_occupant(Occupant::Molecule(7), a, b);
        assert!(!medium.has_molecule(a));
        assert!(medium.contains_molecule(7, b));
        assert!(medium.occupants_at(a).is_empty());
    }

    #[test]
    fn sweep_clears_sink() {
        let mut medium = Medium::new(Position::new(10, 10, 10));
        let a = Position::new(0, 0, 0);
        medium.add_occupant(Occupant::Molecule(1), a);
        medium.add_occupant(Occupant::Molecule(2), a);
        medium.move_occupant(Occupant::Molecule(1), a, GARBAGE);
        assert_eq!(medium.garbage_len(), 1);
        let swept = medium.sweep_garbage();
        assert_eq!(swept, vec![Occupant::Molecule(1)]);
        assert_eq!(medium.garbage_len(), 0);
        assert!(medium.contains_molecule(2, a));
    }

    #[test]
    fn role_lookup_respects_exclusion() {
        let mut medium = Medium::new(Position::new(10, 10, 10));
        let cell = Position::new(5, 5, 5);
        medium.add_machine(0, NodeRole::Transmitter, &[cell]);
        medium.add_machine(1, NodeRole::Intermediate, &[cell]);
        assert_eq!(medium.transmitter_at(cell, None), Some(0));
        assert_eq!(medium.transmitter_at(cell, Some(0)), Some(1));
        assert_eq!(medium.receiver_at(cell, None), Some(1));
        assert_eq!(medium.receiver_at(cell, Some(1)), None);
    }

    #[test]
    fn positions_outside_extents_are_tracked() {
        let mut medium = Medium::new(Position::new(4, 4, 4));
        let far = Position::new(-3, 9, 2);
        assert!(!medium.inside_extents(far));
        medium.add_occupant(Occupant::Molecule(3), far);
        assert!(medium.has_molecule(far));
    }
}
