//! Tick driver.
//!
//! Each tick: every nanomachine steps once in configuration order, then every
//! moving molecule is stepped once in release order, then the garbage sink is
//! swept. Molecules released by nanomachines in the first phase move in the
//! same tick; acknowledgements released on absorption move from the next one.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info, trace, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::modules::collision::{self, CollisionHandler, CollisionSettings, ResolveContext, Resolution};
use crate::modules::config::SimulationConfig;
use crate::modules::lattice::Position;
use crate::modules::medium::{GARBAGE, Medium, NodeRole, Occupant};
use crate::modules::microtubule::Microtubule;
use crate::modules::molecule::{MessageId, Molecule, MoleculeId, MoleculeKind, MovementType};
use crate::modules::movement::{self, MoveContext, MovementController};
use crate::modules::nanomachine::{Emission, NanoMachine};
use crate::modules::stats::{Event, RunSummary, StatsCollector, StatsSink, dispatch};

/// The single seedable random source behind every stochastic draw.
pub type SimRng = ChaCha8Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub tick: u64,
    pub events: Vec<Event>,
}

pub struct Simulation {
    config: SimulationConfig,
    settings: CollisionSettings,
    medium: Medium,
    machines: Vec<NanoMachine>,
    tubes: Vec<Microtubule>,
    molecules: HashMap<MoleculeId, Molecule>,
    /// Molecules stepped each tick, in release order.
    moving: Vec<MoleculeId>,
    rng: SimRng,
    tick: u64,
    next_molecule: MoleculeId,
    next_msg_id: MessageId,
    completed: BTreeSet<MessageId>,
    configured: u32,
    finish_tick: Option<u64>,
}

impl Simulation {
    pub fn new(mut config: SimulationConfig) -> Result<Self> {
        config.apply_molecule_defaults();
        config.validate()?;

        let protocol = config.protocol();
        let info_params = config.params_or_default(MoleculeKind::Information);
        let ack_params = config.params_or_default(MoleculeKind::Acknowledgement);

        let mut machines = Vec::new();
        for node in &config.transmitters {
            machines.push(NanoMachine::transmitter(
                machines.len(),
                node.center,
                node.radius,
                node.release_offset,
                config.num_messages,
                info_params.clone(),
                protocol,
            ));
        }
        for node in &config.receivers {
            machines.push(NanoMachine::receiver(
                machines.len(),
                node.center,
                node.radius,
                node.release_offset,
                ack_params.clone(),
                protocol,
            ));
        }
        for node in &config.intermediates {
            machines.push(NanoMachine::intermediate(
                machines.len(),
                node.center,
                node.radius,
                node.info_release_offset,
                node.ack_release_offset,
                info_params.clone(),
                ack_params.clone(),
                protocol,
            ));
        }

        let tubes = config
            .microtubules
            .iter()
            .enumerate()
            .map(|(id, t)| Microtubule::new(id, t.start, t.end))
            .collect::<Result<Vec<_>>>()?;

        let mut medium = Medium::new(config.medium);
        for machine in &machines {
            medium.add_machine(machine.id, machine.role, &machine.cells());
        }
        for tube in &tubes {
            for cell in tube.cells() {
                medium.add_occupant(Occupant::Track(tube.id), *cell);
            }
        }

        let mut sim = Self {
            settings: config.collision_settings(),
            configured: config.configured_messages(),
            rng: SimRng::seed_from_u64(config.seed),
            config,
            medium,
            machines,
            tubes,
            molecules: HashMap::new(),
            moving: Vec::new(),
            tick: 0,
            next_molecule: 1,
            next_msg_id: 1,
            completed: BTreeSet::new(),
            finish_tick: None,
        };
        sim.place_noise();
        Ok(sim)
    }

    /// Scatters the configured noise uniformly inside the medium extents.
    fn place_noise(&mut self) {
        let Some(noise) = self.config.params(MoleculeKind::Noise).cloned() else {
            return;
        };
        let extents = self.medium.extents;
        for _ in 0..noise.count {
            let at = Position::new(
                self.rng.gen_range(0..extents.x),
                self.rng.gen_range(0..extents.y),
                self.rng.gen_range(0..extents.z),
            );
            let id = self.allocate_id();
            self.medium.add_occupant(Occupant::Molecule(id), at);
            self.molecules.insert(
                id,
                Molecule {
                    id,
                    kind: MoleculeKind::Noise,
                    msg_id: None,
                    seq: 0,
                    position: at,
                    movement: MovementType::Stationary,
                    controller: MovementController::Stationary,
                    handler: CollisionHandler::empty(),
                    volume: noise.volume(),
                    created_tick: 0,
                    completed_tick: None,
                    source: None,
                },
            );
        }
        debug!("placed {} noise molecules", noise.count);
    }

    fn allocate_id(&mut self) -> MoleculeId {
        let id = self.next_molecule;
        self.next_molecule += 1;
        id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn machines(&self) -> &[NanoMachine] {
        &self.machines
    }

    pub fn tubes(&self) -> &[Microtubule] {
        &self.tubes
    }

    pub fn molecule(&self, id: MoleculeId) -> Option<&Molecule> {
        self.molecules.get(&id)
    }

    /// Live molecules in id order.
    pub fn molecules(&self) -> Vec<&Molecule> {
        let mut all: Vec<&Molecule> = self.molecules.values().collect();
        all.sort_by_key(|m| m.id);
        all
    }

    pub fn moving_count(&self) -> usize {
        self.moving.len()
    }

    pub fn completed_count(&self) -> u32 {
        self.completed.len() as u32
    }

    pub fn finish_tick(&self) -> Option<u64> {
        self.finish_tick
    }

    /// Places a payload molecule directly, outside the protocol. The
    /// molecule joins the moving set unless its controller is stationary.
    pub fn inject(
        &mut self,
        kind: MoleculeKind,
        msg_id: MessageId,
        at: Position,
        controller: MovementController,
        volume: f64,
    ) -> MoleculeId {
        let id = self.allocate_id();
        let movement = match controller {
            MovementController::Stationary => MovementType::Stationary,
            _ => MovementType::Active,
        };
        self.medium.add_occupant(Occupant::Molecule(id), at);
        self.molecules.insert(
            id,
            Molecule {
                id,
                kind,
                msg_id: Some(msg_id),
                seq: 0,
                position: at,
                movement,
                controller,
                handler: CollisionHandler::for_controller(&controller, &self.settings),
                volume,
                created_tick: self.tick,
                completed_tick: None,
                source: None,
            },
        );
        if controller != MovementController::Stationary {
            self.moving.push(id);
        }
        id
    }

    fn release(&mut self, emission: Emission, events: &mut Vec<Event>) {
        let id = self.allocate_id();
        let controller = MovementController::initial(emission.movement);
        self.medium.add_occupant(Occupant::Molecule(id), emission.at);
        self.molecules.insert(
            id,
            Molecule {
                id,
                kind: emission.kind,
                msg_id: Some(emission.msg_id),
                seq: emission.seq,
                position: emission.at,
                movement: emission.movement,
                controller,
                handler: CollisionHandler::for_controller(&controller, &self.settings),
                volume: emission.volume,
                created_tick: self.tick,
                completed_tick: None,
                source: Some(emission.source),
            },
        );
        if controller != MovementController::Stationary {
            self.moving.push(id);
        }
        events.push(Event::MoleculeReleased {
            molecule: id,
            kind: emission.kind,
            tick: self.tick,
        });
    }

    /// Runs one tick. Once the stop condition has held, nanomachines stop
    /// stepping and only in-flight molecules keep moving.
    pub fn step(&mut self) -> Result<TickResult> {
        let tick = self.tick;
        let mut events = Vec::new();

        if self.finish_tick.is_none() {
            let mut emissions = Vec::new();
            for machine in &mut self.machines {
                emissions.extend(machine.next_step(tick, &mut self.next_msg_id, &mut events));
            }
            for emission in emissions {
                self.release(emission, &mut events);
            }
        }

        let mut responses = Vec::new();
        let order = self.moving.clone();
        for id in order {
            let Some(mut mover) = self.molecules.remove(&id) else {
                continue;
            };
            if mover.position == GARBAGE {
                self.molecules.insert(id, mover);
                continue;
            }

            let proposal = movement::next_candidate(
                &mover,
                &MoveContext {
                    tick,
                    step: self.config.step_length,
                    derail_probability: self.config.derail_probability,
                    medium: &self.medium,
                    tubes: &self.tubes,
                },
                &mut self.rng,
            );
            let resolution = {
                let mut ctx = ResolveContext {
                    medium: &mut self.medium,
                    molecules: &mut self.molecules,
                    rng: &mut self.rng,
                    events: &mut events,
                    tick,
                };
                collision::resolve(&mut mover, proposal.candidate, &mut ctx)?
            };

            if let Resolution::Absorbed { machine, .. } = resolution {
                events.push(Event::Absorbed {
                    molecule: id,
                    kind: mover.kind,
                    machine,
                    travel_time: tick.saturating_sub(mover.created_tick),
                    tick,
                });
                if let Some(target) = self.machines.get_mut(machine) {
                    responses.extend(target.absorb(&mover, tick, &mut events));
                }
            }

            if let Some(controller) = proposal.reassign {
                if mover.position != GARBAGE && mover.controller != controller {
                    debug!(
                        "molecule {} switched {} -> {} at {}",
                        mover.id,
                        mover.controller.label(),
                        controller.label(),
                        mover.position
                    );
                    mover.controller = controller;
                    mover.handler = CollisionHandler::for_controller(&controller, &self.settings);
                }
            }
            self.molecules.insert(id, mover);
        }

        for emission in responses {
            self.release(emission, &mut events);
        }

        let swept = self.medium.sweep_garbage();
        for occupant in &swept {
            if let Occupant::Molecule(id) = occupant {
                self.molecules.remove(id);
            }
        }
        if !swept.is_empty() {
            let molecules = &self.molecules;
            self.moving.retain(|id| molecules.contains_key(id));
            trace!("swept {} occupants at step {tick}", swept.len());
        }

        for event in &events {
            if let Event::MessageCompleted { msg_id, .. } = event {
                self.completed.insert(*msg_id);
            }
        }

        self.tick += 1;
        Ok(TickResult { tick, events })
    }

    /// Every configured message completed, the step budget spent, or (with
    /// acknowledgements) every originating transmitter out of work.
    fn stop_condition(&self) -> bool {
        if self.completed_count() >= self.configured || self.tick >= self.config.max_steps {
            return true;
        }
        self.config.use_acknowledgements
            && self
                .machines
                .iter()
                .filter(|m| m.role == NodeRole::Transmitter)
                .all(NanoMachine::is_exhausted)
    }

    /// Runs to completion, feeding every event to `sink`.
    pub fn run(&mut self, sink: &mut dyn StatsSink) -> Result<RunSummary> {
        info!(
            "simulation starting: {} nanomachines, {} microtubules, {} messages, seed {}",
            self.machines.len(),
            self.tubes.len(),
            self.configured,
            self.config.seed
        );
        let mut collector = StatsCollector::new();
        let mut drain_ticks = 0;
        loop {
            if self.finish_tick.is_none() && self.stop_condition() {
                self.finish_tick = Some(self.tick);
                info!("stop condition reached at step {}", self.tick);
                if !self.config.drain {
                    break;
                }
            }
            if self.finish_tick.is_some() {
                if self.moving.is_empty() {
                    break;
                }
                if drain_ticks >= self.config.max_steps {
                    warn!(
                        "drain cut off after {drain_ticks} steps with {} molecules in flight",
                        self.moving.len()
                    );
                    break;
                }
                drain_ticks += 1;
            }

            let result = self.step()?;
            for event in &result.events {
                dispatch(sink, event);
                dispatch(&mut collector, event);
            }
        }

        let finished = Event::SimulationFinished {
            final_tick: self.tick,
            completed: self.completed_count(),
            configured: self.configured,
        };
        dispatch(sink, &finished);
        dispatch(&mut collector, &finished);
        info!(
            "simulation finished at step {}: {}/{} messages completed",
            self.tick,
            self.completed_count(),
            self.configured
        );
        Ok(RunSummary::new(
            self.tick,
            self.finish_tick,
            self.completed_count(),
            self.configured,
            collector,
        ))
    }

    /// Every live molecule sits in the medium cell it believes it occupies,
    /// and the medium holds no molecule the driver does not know about.
    pub fn index_consistent(&self) -> bool {
        let positions_agree = self
            .molecules
            .values()
            .all(|m| self.medium.contains_molecule(m.id, m.position));
        let no_strays = self
            .medium
            .molecule_cells()
            .all(|(pos, id)| self.molecules.get(&id).is_some_and(|m| m.position == pos));
        positions_agree && no_strays && self.medium.garbage_len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::config::{NodeConfig, TrackConfig};
    use crate::modules::fec::FecScheme;
    use crate::modules::molecule::MoleculeParams;
    use crate::modules::movement::StepLengths;
    use crate::modules::stats::NullSink;
    use proptest::prelude::*;

    fn node(center: Position, radius: i32, release_offset: Position) -> NodeConfig {
        NodeConfig {
            center,
            radius,
            release_offset,
        }
    }

    /// Transmitter and receiver joined by a track each way, no diffusion.
    fn guided_link() -> SimulationConfig {
        SimulationConfig {
            medium: Position::new(30, 30, 30),
            transmitters: vec![node(Position::new(10, 10, 10), 2, Position::new(2, 0, 0))],
            receivers: vec![node(Position::new(16, 10, 10), 1, Position::new(0, 1, 0))],
            microtubules: vec![
                TrackConfig {
                    start: Position::new(12, 10, 10),
                    end: Position::new(16, 10, 10),
                },
                TrackConfig {
                    start: Position::new(16, 11, 10),
                    end: Position::new(10, 11, 10),
                },
            ],
            step_length: StepLengths::uniform(0.0),
            use_collisions: false,
            max_steps: 200,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn single_message_completes_over_guided_link() {
        let mut sim = Simulation::new(guided_link()).unwrap();
        let summary = sim.run(&mut NullSink).unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.stats.completed.len(), 1);
        // four cells out, six back, plus one attach step each way
        assert!(summary.stats.completed[0].tick <= 12);
        assert_eq!(summary.stats.ack_absorbed, 1);
        assert_eq!(summary.stats.info_absorbed, 1);
        assert!(summary.stats.failed_messages.is_empty());
    }

    /// Diffusive link with no tracks. Each node releases at the centre of
    /// the other, whose volume covers every cell one unit step away.
    fn diffusive_link(seed: u64) -> SimulationConfig {
        SimulationConfig {
            medium: Position::new(30, 30, 30),
            transmitters: vec![node(Position::new(10, 10, 10), 3, Position::new(4, 0, 0))],
            receivers: vec![node(Position::new(14, 10, 10), 3, Position::new(-4, 0, 0))],
            use_collisions: false,
            max_steps: 50,
            seed,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn single_message_completes_by_diffusion() {
        let mut sim = Simulation::new(diffusive_link(11)).unwrap();
        assert!(sim.tubes().is_empty());
        let summary = sim.run(&mut NullSink).unwrap();
        assert_eq!(summary.completed, 1);
        // packet absorbed on its first move, acknowledgement on the next tick
        assert_eq!(summary.stats.completed[0].tick, 1);
        assert_eq!(summary.stats.info_absorbed, 1);
        assert_eq!(summary.stats.ack_absorbed, 1);
        assert_eq!(summary.finish_tick, Some(2));
    }

    #[test]
    fn diffusive_completion_holds_for_other_seeds() {
        for seed in [0, 3, 99, 12_345] {
            let mut sim = Simulation::new(diffusive_link(seed)).unwrap();
            let summary = sim.run(&mut NullSink).unwrap();
            assert_eq!(summary.completed, 1, "seed {seed}");
            assert_eq!(summary.stats.ack_absorbed, 1, "seed {seed}");
        }
    }

    #[test]
    fn unanswered_message_retransmits_then_fails() {
        let config = SimulationConfig {
            medium: Position::new(40, 40, 40),
            transmitters: vec![node(Position::new(20, 20, 20), 1, Position::new(1, 0, 0))],
            num_retransmissions: 2,
            retransmit_wait_time: 5,
            use_collisions: false,
            seed: 5,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let mut stats = StatsCollector::new();
        let summary = sim.run(&mut stats).unwrap();
        assert_eq!(stats.transmitter_retransmissions, 2);
        assert_eq!(stats.failed_messages, vec![1]);
        assert!(stats.completed.is_empty());
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.finish_tick, Some(16));
    }

    #[test]
    fn colliding_packet_decomposes_on_matching_ack() {
        let config = SimulationConfig {
            transmitters: vec![node(Position::new(80, 80, 80), 1, Position::new(1, 0, 0))],
            microtubules: vec![TrackConfig {
                start: Position::new(10, 10, 10),
                end: Position::new(20, 10, 10),
            }],
            decomposing: 1,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config).unwrap();
        let packet = sim.inject(
            MoleculeKind::Information,
            7,
            Position::new(10, 10, 10),
            MovementController::OnTrack { tube: 0 },
            1.0,
        );
        let ack = sim.inject(
            MoleculeKind::Acknowledgement,
            7,
            Position::new(11, 10, 10),
            MovementController::Stationary,
            1.0,
        );
        let result = sim.step().unwrap();
        let decomposed: Vec<MoleculeId> = result
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Decomposition { molecule, .. } => Some(*molecule),
                _ => None,
            })
            .collect();
        assert_eq!(decomposed, vec![packet]);
        assert!(sim.molecule(packet).is_none());
        assert_eq!(
            sim.molecule(ack).map(|m| m.position),
            Some(Position::new(11, 10, 10))
        );
        assert!(sim.index_consistent());
    }

    fn busy_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            medium: Position::new(20, 20, 20),
            transmitters: vec![node(Position::new(4, 10, 10), 2, Position::new(2, 0, 0))],
            receivers: vec![node(Position::new(14, 10, 10), 3, Position::new(-3, 0, 0))],
            microtubules: vec![TrackConfig {
                start: Position::new(6, 9, 10),
                end: Position::new(12, 9, 10),
            }],
            molecules: vec![
                MoleculeParams::new(MoleculeKind::Information, 6, MovementType::Active)
                    .with_size(0.6)
                    .with_adaptive_change(1),
                MoleculeParams::new(MoleculeKind::Acknowledgement, 3, MovementType::Passive)
                    .with_size(0.6),
                MoleculeParams::new(MoleculeKind::Noise, 200, MovementType::Stationary)
                    .with_size(0.5),
            ],
            step_length: StepLengths::uniform(2.0),
            fec: FecScheme::ParityCheck {
                required: 2,
                rate: 0.5,
            },
            num_messages: 3,
            num_retransmissions: 3,
            retransmit_wait_time: 40,
            decomposing: 3,
            derail_probability: 0.1,
            max_steps: 300,
            seed,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn same_seed_same_events() {
        let mut a = Simulation::new(busy_config(42)).unwrap();
        let mut b = Simulation::new(busy_config(42)).unwrap();
        for _ in 0..150 {
            assert_eq!(a.step().unwrap(), b.step().unwrap());
        }
    }

    #[test]
    fn noise_is_placed_inside_and_never_moves() {
        let sim = Simulation::new(busy_config(1)).unwrap();
        let noise: Vec<&Molecule> = sim
            .molecules()
            .into_iter()
            .filter(|m| m.kind == MoleculeKind::Noise)
            .collect();
        assert_eq!(noise.len(), 200);
        assert!(noise.iter().all(|m| sim.medium().inside_extents(m.position)));
        assert_eq!(sim.moving_count(), 0);
    }

    #[test]
    fn drain_waits_for_molecules_to_settle() {
        let config = SimulationConfig {
            drain: true,
            ..guided_link()
        };
        let mut sim = Simulation::new(config).unwrap();
        let summary = sim.run(&mut NullSink).unwrap();
        assert_eq!(sim.moving_count(), 0);
        assert!(summary.final_tick >= summary.finish_tick.unwrap_or(0));
    }

    #[test]
    fn invalid_config_fails_before_first_tick() {
        let err = Simulation::new(SimulationConfig::default()).err().unwrap();
        assert!(matches!(err, crate::error::SimError::Config(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn index_stays_consistent(seed in any::<u64>(), ticks in 1usize..80) {
            let mut sim = Simulation::new(busy_config(seed)).unwrap();
            for _ in 0..ticks {
                sim.step().unwrap();
                prop_assert!(sim.index_consistent());
            }
        }
    }
}
