use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::modules::collision::{CollisionSettings, DecomposingMode};
use crate::modules::fec::FecScheme;
use crate::modules::lattice::Position;
use crate::modules::molecule::{MoleculeKind, MoleculeParams, MovementType};
use crate::modules::movement::StepLengths;
use crate::modules::nanomachine::Protocol;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub center: Position,
    #[serde(default = "default_radius")]
    pub radius: i32,
    #[serde(default = "Position::origin")]
    pub release_offset: Position,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntermediateConfig {
    pub center: Position,
    #[serde(default = "default_radius")]
    pub radius: i32,
    #[serde(default = "Position::origin")]
    pub info_release_offset: Position,
    #[serde(default = "Position::origin")]
    pub ack_release_offset: Position,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub start: Position,
    pub end: Position,
}

fn default_radius() -> i32 {
    1
}

/// Everything a run needs. Missing fields fall back to [`Default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub medium: Position,
    pub transmitters: Vec<NodeConfig>,
    pub receivers: Vec<NodeConfig>,
    pub intermediates: Vec<IntermediateConfig>,
    pub microtubules: Vec<TrackConfig>,
    pub molecules: Vec<MoleculeParams>,
    pub step_length: StepLengths,
    pub fec: FecScheme,
    pub num_messages: u32,
    pub max_steps: u64,
    pub num_retransmissions: u32,
    pub retransmit_wait_time: u64,
    pub use_collisions: bool,
    pub decomposing: u8,
    pub use_acknowledgements: bool,
    pub derail_probability: f64,
    pub line_of_sight: bool,
    pub drain: bool,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            medium: Position::new(100, 100, 100),
            transmitters: Vec::new(),
            receivers: Vec::new(),
            intermediates: Vec::new(),
            microtubules: Vec::new(),
            molecules: Vec::new(),
            step_length: StepLengths::default(),
            fec: FecScheme::None,
            num_messages: 1,
            max_steps: 100_000,
            num_retransmissions: 0,
            retransmit_wait_time: 100,
            use_collisions: true,
            decomposing: 0,
            use_acknowledgements: true,
            derail_probability: 0.0,
            line_of_sight: true,
            drain: false,
            seed: 0,
        }
    }
}

impl SimulationConfig {
    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let mut config: SimulationConfig = serde_json::from_slice(&bytes)?;
        config.apply_molecule_defaults();
        config.validate()?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// One active information molecule per batch when none is configured,
    /// and likewise one acknowledgement when acknowledgements are on.
    pub fn apply_molecule_defaults(&mut self) {
        if self.params(MoleculeKind::Information).is_none() {
            self.molecules.push(MoleculeParams::new(
                MoleculeKind::Information,
                1,
                MovementType::Active,
            ));
        }
        if self.use_acknowledgements && self.params(MoleculeKind::Acknowledgement).is_none() {
            self.molecules.push(MoleculeParams::new(
                MoleculeKind::Acknowledgement,
                1,
                MovementType::Active,
            ));
        }
    }

    pub fn params(&self, kind: MoleculeKind) -> Option<&MoleculeParams> {
        self.molecules.iter().find(|p| p.kind == kind)
    }

    /// Parameters for `kind`, or the single-molecule default.
    pub fn params_or_default(&self, kind: MoleculeKind) -> MoleculeParams {
        self.params(kind)
            .cloned()
            .unwrap_or_else(|| MoleculeParams::new(kind, 1, MovementType::Active))
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (axis, value) in [('x', self.medium.x), ('y', self.medium.y), ('z', self.medium.z)] {
            if value <= 0 {
                return Err(ConfigError::EmptyMedium { axis, value });
            }
        }
        if self.transmitters.is_empty() {
            return Err(ConfigError::NoTransmitters);
        }
        let radii = self
            .transmitters
            .iter()
            .map(|n| ("transmitter", n.radius))
            .enumerate()
            .chain(self.receivers.iter().map(|n| ("receiver", n.radius)).enumerate())
            .chain(
                self.intermediates
                    .iter()
                    .map(|n| ("intermediate", n.radius))
                    .enumerate(),
            );
        for (index, (role, radius)) in radii {
            if radius < 1 {
                return Err(ConfigError::InvalidRadius {
                    role,
                    index,
                    radius,
                });
            }
        }
        for (axis, value) in [
            ('x', self.step_length.x),
            ('y', self.step_length.y),
            ('z', self.step_length.z),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidStepLength { axis, value });
            }
        }
        if !(0.0..=1.0).contains(&self.derail_probability) {
            return Err(ConfigError::InvalidProbability {
                field: "derail_probability",
                value: self.derail_probability,
            });
        }
        if self.decomposing > 3 {
            return Err(ConfigError::InvalidDecomposingMode(self.decomposing));
        }
        if let FecScheme::ParityCheck { required, rate } = self.fec {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::InvalidFecRate(rate));
            }
            if required == 0 {
                return Err(ConfigError::InvalidRequiredPackets(required));
            }
        }
        for params in &self.molecules {
            if !params.size.is_finite() || params.size <= 0.0 {
                return Err(ConfigError::InvalidMoleculeSize {
                    kind: params.kind.label(),
                    size: params.size,
                });
            }
            let stationary = params.movement == MovementType::Stationary;
            if stationary != (params.kind == MoleculeKind::Noise) {
                return Err(ConfigError::InvalidMovement {
                    kind: params.kind.label(),
                    movement: params.movement.label(),
                });
            }
        }
        if self.num_messages == 0 {
            return Err(ConfigError::Zero {
                field: "num_messages",
            });
        }
        if self.max_steps == 0 {
            return Err(ConfigError::Zero { field: "max_steps" });
        }
        if self.retransmit_wait_time == 0 {
            return Err(ConfigError::Zero {
                field: "retransmit_wait_time",
            });
        }
        Ok(())
    }

    /// Decomposition needs acknowledgements to have anything to decompose.
    pub fn decomposing_mode(&self) -> Option<DecomposingMode> {
        if !self.use_acknowledgements {
            return None;
        }
        DecomposingMode::from_level(self.decomposing)
    }

    pub fn collision_settings(&self) -> CollisionSettings {
        CollisionSettings {
            use_collisions: self.use_collisions,
            decomposing: self.decomposing_mode(),
            line_of_sight: self.line_of_sight,
        }
    }

    pub fn protocol(&self) -> Protocol {
        Protocol {
            use_acknowledgements: self.use_acknowledgements,
            num_retransmissions: self.num_retransmissions,
            retransmit_wait_time: self.retransmit_wait_time,
            fec: self.fec,
        }
    }

    /// Messages the run must complete before it may stop early.
    pub fn configured_messages(&self) -> u32 {
        self.num_messages
            .saturating_mul(self.transmitters.len() as u32)
    }
}
