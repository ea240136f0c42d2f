//! Error types for the simulator.
//!
//! Setup problems surface as [`ConfigError`] before the first tick. The tick
//! loop itself only fails on internal invariant violations (degenerate
//! geometry, a ray march that never reaches its target); every stochastic
//! outcome is ordinary control flow.

use thiserror::Error;

use crate::modules::lattice::Position;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A direction vector had zero length and could not be normalised.
    #[error("degenerate geometry: {what}")]
    DegenerateGeometry { what: String },

    /// A lattice march ran past its step bound without reaching its target.
    #[error("unreachable target: march from {from} to {to} gave up after {steps} steps")]
    UnreachableTarget {
        from: Position,
        to: Position,
        steps: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejected configuration fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("medium extent {axis} must be positive (got {value})")]
    EmptyMedium { axis: char, value: i32 },

    #[error("at least one transmitter is required; intermediate nodes only relay")]
    NoTransmitters,

    #[error("{role} #{index} has radius {radius}; radius must be at least 1")]
    InvalidRadius {
        role: &'static str,
        index: usize,
        radius: i32,
    },

    #[error("step length on axis {axis} must be finite and non-negative (got {value})")]
    InvalidStepLength { axis: char, value: f64 },

    #[error("{field} must be a probability in [0, 1] (got {value})")]
    InvalidProbability { field: &'static str, value: f64 },

    #[error("decomposing mode must be 0..=3 (got {0})")]
    InvalidDecomposingMode(u8),

    #[error("FEC rate must be finite and non-negative (got {0})")]
    InvalidFecRate(f64),

    #[error("FEC requires at least one packet (got {0})")]
    InvalidRequiredPackets(u32),

    #[error("molecule size for {kind} must be finite and positive (got {size})")]
    InvalidMoleculeSize { kind: &'static str, size: f64 },

    #[error("{kind} molecules cannot use movement type {movement}")]
    InvalidMovement {
        kind: &'static str,
        movement: &'static str,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

pub type Result<T> = std::result::Result<T, SimError>;
