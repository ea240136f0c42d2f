use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::modules::lattice::Position;
use crate::modules::medium::{MachineId, NodeRole};
use crate::modules::microtubule::TubeId;
use crate::modules::molecule::{MessageId, MoleculeId, MoleculeKind};
use crate::modules::simulation::Simulation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineView {
    pub id: MachineId,
    pub role: NodeRole,
    pub center: Position,
    pub radius: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub id: TubeId,
    pub start: Position,
    pub end: Position,
    pub cells: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeView {
    pub id: MoleculeId,
    pub kind: MoleculeKind,
    pub msg_id: Option<MessageId>,
    pub position: Position,
    pub mode: String,
}

/// Offline view of a run at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumSnapshot {
    pub tick: u64,
    pub extents: Position,
    pub machines: Vec<MachineView>,
    pub tracks: Vec<TrackView>,
    pub molecules: Vec<MoleculeView>,
}

impl MediumSnapshot {
    pub fn capture(sim: &Simulation) -> Self {
        Self {
            tick: sim.tick(),
            extents: sim.medium().extents,
            machines: sim
                .machines()
                .iter()
                .map(|m| MachineView {
                    id: m.id,
                    role: m.role,
                    center: m.center,
                    radius: m.radius,
                })
                .collect(),
            tracks: sim
                .tubes()
                .iter()
                .map(|t| TrackView {
                    id: t.id,
                    start: t.start,
                    end: t.end,
                    cells: t.cells().len(),
                })
                .collect(),
            molecules: sim
                .molecules()
                .into_iter()
                .map(|m| MoleculeView {
                    id: m.id,
                    kind: m.kind,
                    msg_id: m.msg_id,
                    position: m.position,
                    mode: m.controller.label().to_string(),
                })
                .collect(),
        }
    }

    pub fn count(&self, kind: MoleculeKind) -> usize {
        self.molecules.iter().filter(|m| m.kind == kind).count()
    }
}

pub fn save_snapshot(snapshot: &MediumSnapshot, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    fs::write(path, json)?;
    Ok(path.to_path_buf())
}

pub fn load_snapshot(path: &Path) -> Result<MediumSnapshot> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::config::{NodeConfig, SimulationConfig};
    use crate::modules::molecule::{MoleculeParams, MovementType};

    fn config() -> SimulationConfig {
        SimulationConfig {
            medium: Position::new(10, 10, 10),
            transmitters: vec![NodeConfig {
                center: Position::new(2, 2, 2),
                radius: 1,
                release_offset: Position::new(1, 0, 0),
            }],
            molecules: vec![MoleculeParams::new(MoleculeKind::Noise, 5, MovementType::Stationary)],
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn capture_lists_every_live_molecule() {
        let mut sim = Simulation::new(config()).unwrap();
        sim.step().unwrap();
        let snapshot = MediumSnapshot::capture(&sim);
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.machines.len(), 1);
        assert_eq!(snapshot.count(MoleculeKind::Noise), 5);
        assert_eq!(snapshot.count(MoleculeKind::Information), 1);
        assert!(snapshot.molecules.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn snapshot_survives_disk() {
        let sim = Simulation::new(config()).unwrap();
        let snapshot = MediumSnapshot::capture(&sim);
        let path = std::env::temp_dir().join(format!("molcom-snapshot-{}.json", std::process::id()));
        save_snapshot(&snapshot, &path).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, snapshot);
    }
}
