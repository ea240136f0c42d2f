pub mod error;
pub mod modules;

pub use error::{ConfigError, Result, SimError};
pub use modules::collision::{
    CollisionHandler, CollisionSettings, DecomposingMode, Resolution, Stage, collides,
    collision_probability,
};
pub use modules::config::{IntermediateConfig, NodeConfig, SimulationConfig, TrackConfig};
pub use modules::fec::{FecScheme, is_reconstructable, packets_to_send};
pub use modules::lattice::{Position, Vector3};
pub use modules::medium::{GARBAGE, MachineId, Medium, NodeRole, Occupant};
pub use modules::microtubule::{Microtubule, TubeId};
pub use modules::molecule::{
    CollisionPair, MessageId, Molecule, MoleculeId, MoleculeKind, MoleculeParams, MovementType,
};
pub use modules::movement::{MovementController, StepLengths};
pub use modules::nanomachine::{Emission, NanoMachine, Protocol, TxPhase};
pub use modules::simulation::{SimRng, Simulation, TickResult};
pub use modules::stats::{
    CollisionTally, Completion, Event, NullSink, RunSummary, StatsCollector, StatsSink, dispatch,
};
pub use modules::view::{MediumSnapshot, load_snapshot, save_snapshot};
