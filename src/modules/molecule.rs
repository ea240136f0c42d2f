use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::modules::collision::CollisionHandler;
use crate::modules::lattice::Position;
use crate::modules::medium::MachineId;
use crate::modules::movement::MovementController;

pub type MoleculeId = u64;
pub type MessageId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MoleculeKind {
    Information,
    Acknowledgement,
    Noise,
}

impl MoleculeKind {
    pub const fn label(self) -> &'static str {
        match self {
            MoleculeKind::Information => "information",
            MoleculeKind::Acknowledgement => "acknowledgement",
            MoleculeKind::Noise => "noise",
        }
    }

    /// The payload kind this one decomposes against, if any.
    pub const fn opposing(self) -> Option<MoleculeKind> {
        match self {
            MoleculeKind::Information => Some(MoleculeKind::Acknowledgement),
            MoleculeKind::Acknowledgement => Some(MoleculeKind::Information),
            MoleculeKind::Noise => None,
        }
    }
}

impl fmt::Display for MoleculeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for MoleculeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "information" | "info" | "packet" => Ok(MoleculeKind::Information),
            "acknowledgement" | "acknowledgment" | "ack" => Ok(MoleculeKind::Acknowledgement),
            "noise" => Ok(MoleculeKind::Noise),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    /// Diffuses, and attaches to microtubules it touches.
    Active,
    Passive,
    Stationary,
}

impl MovementType {
    pub const fn label(self) -> &'static str {
        match self {
            MovementType::Active => "active",
            MovementType::Passive => "passive",
            MovementType::Stationary => "stationary",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Unordered pair of colliding kinds. Noise never collides with noise since
/// it never moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollisionPair {
    AckAck,
    AckInfo,
    AckNoise,
    InfoInfo,
    InfoNoise,
}

impl CollisionPair {
    pub const ALL: [CollisionPair; 5] = [
        CollisionPair::AckAck,
        CollisionPair::AckInfo,
        CollisionPair::AckNoise,
        CollisionPair::InfoInfo,
        CollisionPair::InfoNoise,
    ];

    pub fn from_kinds(a: MoleculeKind, b: MoleculeKind) -> Option<Self> {
        use MoleculeKind::*;
        match (a, b) {
            (Acknowledgement, Acknowledgement) => Some(CollisionPair::AckAck),
            (Acknowledgement, Information) | (Information, Acknowledgement) => {
                Some(CollisionPair::AckInfo)
            }
            (Acknowledgement, Noise) | (Noise, Acknowledgement) => Some(CollisionPair::AckNoise),
            (Information, Information) => Some(CollisionPair::InfoInfo),
            (Information, Noise) | (Noise, Information) => Some(CollisionPair::InfoNoise),
            (Noise, Noise) => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CollisionPair::AckAck => "A/A",
            CollisionPair::AckInfo => "A/I",
            CollisionPair::AckNoise => "A/N",
            CollisionPair::InfoInfo => "I/I",
            CollisionPair::InfoNoise => "I/N",
        }
    }
}

impl fmt::Display for CollisionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-kind emission parameters. `count` is the live batch size and is
/// mutated by the adaptive rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoleculeParams {
    pub kind: MoleculeKind,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_movement")]
    pub movement: MovementType,
    #[serde(default)]
    pub adaptive_change: u32,
    #[serde(default = "default_size")]
    pub size: f64,
}

fn default_count() -> u32 {
    1
}

fn default_movement() -> MovementType {
    MovementType::Active
}

fn default_size() -> f64 {
    1.0
}

impl MoleculeParams {
    pub fn new(kind: MoleculeKind, count: u32, movement: MovementType) -> Self {
        Self {
            kind,
            count,
            movement,
            adaptive_change: 0,
            size: default_size(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_adaptive_change(mut self, step: u32) -> Self {
        self.adaptive_change = step;
        self
    }

    pub fn volume(&self) -> f64 {
        self.size.powi(3)
    }

    /// Shrinks the batch on success (never below one), grows it on failure.
    pub fn apply_adaptive_change(&mut self, success: bool) {
        if self.adaptive_change == 0 {
            return;
        }
        self.count = if success {
            self.count.saturating_sub(self.adaptive_change).max(1)
        } else {
            self.count.saturating_add(self.adaptive_change)
        };
    }
}

/// A carrier particle. Its position is authoritative only together with the
/// medium index; the driver keeps the two in step.
#[derive(Clone, Debug)]
pub struct Molecule {
    pub id: MoleculeId,
    pub kind: MoleculeKind,
    pub msg_id: Option<MessageId>,
    pub seq: u32,
    pub position: Position,
    pub movement: MovementType,
    pub controller: MovementController,
    pub handler: CollisionHandler,
    pub volume: f64,
    pub created_tick: u64,
    pub completed_tick: Option<u64>,
    /// Nanomachine that released it; `None` for noise.
    pub source: Option<MachineId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collision_pair_is_unordered() {
        use MoleculeKind::*;
        assert_eq!(
            CollisionPair::from_kinds(Information, Acknowledgement),
            CollisionPair::from_kinds(Acknowledgement, Information)
        );
        assert_eq!(
            CollisionPair::from_kinds(Noise, Information),
            Some(CollisionPair::InfoNoise)
        );
        assert_eq!(CollisionPair::from_kinds(Noise, Noise), None);
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("Packet".parse::<MoleculeKind>(), Ok(MoleculeKind::Information));
        assert_eq!(" ack ".parse::<MoleculeKind>(), Ok(MoleculeKind::Acknowledgement));
        assert!("photon".parse::<MoleculeKind>().is_err());
    }

    #[test]
    fn volume_is_size_cubed() {
        let params = MoleculeParams::new(MoleculeKind::Noise, 1, MovementType::Stationary)
            .with_size(0.5);
        assert!((params.volume() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn zero_adaptive_step_is_inert() {
        let mut params = MoleculeParams::new(MoleculeKind::Information, 4, MovementType::Active);
        params.apply_adaptive_change(true);
        params.apply_adaptive_change(false);
        assert_eq!(params.count, 4);
    }

    proptest! {
        #[test]
        fn adaptive_success_floors_at_one(count in 1u32..1000, step in 1u32..50) {
            let mut params = MoleculeParams::new(MoleculeKind::Information, count, MovementType::Active)
                .with_adaptive_change(step);
            params.apply_adaptive_change(true);
            prop_assert_eq!(params.count, count.saturating_sub(step).max(1));
        }

        #[test]
        fn adaptive_failure_grows_by_step(count in 1u32..1000, step in 1u32..50) {
            let mut params = MoleculeParams::new(MoleculeKind::Information, count, MovementType::Active)
                .with_adaptive_change(step);
            params.apply_adaptive_change(false);
            prop_assert_eq!(params.count, count + step);
        }
    }
}
