use std::path::{Path, PathBuf};

use log::info;
use molcom::{
    MediumSnapshot, Position, SimulationConfig, Simulation, StatsCollector, save_snapshot,
};

pub struct RunOptions {
    pub config: PathBuf,
    pub seed: Option<u64>,
    pub max_steps: Option<u64>,
    pub drain: bool,
    pub medium: Option<Position>,
    pub collisions: bool,
    pub stats_out: Option<PathBuf>,
    pub snapshot_out: Option<PathBuf>,
}

fn load(path: &Path) -> Result<SimulationConfig, String> {
    SimulationConfig::load(path).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn run_simulation(opts: RunOptions) -> Result<(), String> {
    let mut config = load(&opts.config)?;
    if let Some(seed) = opts.seed {
        config.seed = seed;
    }
    if let Some(max_steps) = opts.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(extents) = opts.medium {
        config.medium = extents;
    }
    config.drain |= opts.drain;
    config.use_collisions &= opts.collisions;

    let mut sim = Simulation::new(config).map_err(|e| e.to_string())?;
    let mut sink = StatsCollector::new();
    let summary = sim.run(&mut sink).map_err(|e| e.to_string())?;

    for line in summary.report_lines() {
        println!("{line}");
    }

    if let Some(path) = opts.stats_out {
        summary.save(&path).map_err(|e| e.to_string())?;
    }
    if let Some(path) = opts.snapshot_out {
        let snapshot = MediumSnapshot::capture(&sim);
        let written = save_snapshot(&snapshot, &path).map_err(|e| e.to_string())?;
        info!("snapshot written to {}", written.display());
    }
    Ok(())
}

pub fn run_check(path: &Path) -> Result<(), String> {
    let config = load(path)?;
    Simulation::new(config.clone()).map_err(|e| e.to_string())?;
    println!(
        "{}: ok ({} transmitters, {} receivers, {} intermediates, {} microtubules, {} messages)",
        path.display(),
        config.transmitters.len(),
        config.receivers.len(),
        config.intermediates.len(),
        config.microtubules.len(),
        config.num_messages
    );
    Ok(())
}
