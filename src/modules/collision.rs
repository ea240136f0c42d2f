//! Collision resolution pipeline.
//!
//! A particle's [`CollisionHandler`] is an ordered list of [`Stage`]s chosen
//! when its movement controller is assigned. Stages run in order until one
//! of them settles the outcome; if none does, the candidate is accepted.
//! The occupancy draw is made lazily and at most once per resolution.

use std::collections::HashMap;

use log::{debug, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::modules::lattice::{Position, Vector3};
use crate::modules::medium::{GARBAGE, MachineId, Medium, Occupant};
use crate::modules::molecule::{CollisionPair, Molecule, MoleculeId, MoleculeKind};
use crate::modules::movement::MovementController;
use crate::modules::stats::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecomposingMode {
    /// Packet dies only on an exact id match.
    ExactMatch,
    /// Packet dies when the acknowledgement id is at or after its own.
    AckAtOrAfter,
    /// The older of the pair dies, whichever kind is moving.
    OlderLoses,
}

impl DecomposingMode {
    /// Maps the configured level; 0 means decomposition is off.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(DecomposingMode::ExactMatch),
            2 => Some(DecomposingMode::AckAtOrAfter),
            3 => Some(DecomposingMode::OlderLoses),
            _ => None,
        }
    }

    pub const fn level(self) -> u8 {
        match self {
            DecomposingMode::ExactMatch => 1,
            DecomposingMode::AckAtOrAfter => 2,
            DecomposingMode::OlderLoses => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Nanomachine hit test along the path (or only at the candidate when
    /// `ray_march` is off).
    Absorption { ray_march: bool },
    /// Reject the move on collision.
    Standard,
    /// Same as `Standard`, for particles riding a track.
    OnTrack,
    Decomposing(DecomposingMode),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollisionSettings {
    pub use_collisions: bool,
    pub decomposing: Option<DecomposingMode>,
    pub line_of_sight: bool,
}

impl Default for CollisionSettings {
    fn default() -> Self {
        Self {
            use_collisions: true,
            decomposing: None,
            line_of_sight: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollisionHandler {
    stages: Vec<Stage>,
}

impl CollisionHandler {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Pipeline for a particle driven by `controller`.
    pub fn for_controller(controller: &MovementController, settings: &CollisionSettings) -> Self {
        let absorption = Stage::Absorption {
            ray_march: settings.line_of_sight,
        };
        let mut stages = match controller {
            MovementController::Stationary => return Self::empty(),
            _ => vec![absorption],
        };
        if settings.use_collisions {
            if let Some(mode) = settings.decomposing {
                stages.push(Stage::Decomposing(mode));
            }
            match controller {
                MovementController::OnTrack { .. } => stages.push(Stage::OnTrack),
                _ if settings.decomposing.is_none() => stages.push(Stage::Standard),
                _ => {}
            }
        }
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Null mode: nothing ever blocks the move.
    pub fn is_null(&self) -> bool {
        !self
            .stages
            .iter()
            .any(|s| !matches!(s, Stage::Absorption { .. }))
    }
}

/// How a particle's move was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Moved(Position),
    /// Collision rejected the move; the particle keeps its cell.
    Blocked,
    Absorbed { machine: MachineId, at: Position },
    /// The moving particle itself was annihilated.
    Decomposed,
}

pub struct ResolveContext<'a, R: Rng + ?Sized> {
    pub medium: &'a mut Medium,
    /// Every other live particle. The mover is not in here.
    pub molecules: &'a mut HashMap<MoleculeId, Molecule>,
    pub rng: &'a mut R,
    pub events: &'a mut Vec<Event>,
    pub tick: u64,
}

/// `vsum + vin / (1 - vsum)`, evaluated with ordinary precedence.
pub fn collision_probability(vsum: f64, vin: f64) -> f64 {
    vsum + vin / (1.0 - vsum)
}

/// Collision verdict for given volumes and a uniform draw in `[0, 1)`.
pub fn collides(vsum: f64, vin: f64, draw: f64) -> bool {
    if vsum + vin >= 1.0 {
        return true;
    }
    draw < collision_probability(vsum, vin)
}

/// Runs the pipeline and applies the outcome to the medium and to `mover`.
pub fn resolve<R: Rng + ?Sized>(
    mover: &mut Molecule,
    candidate: Position,
    ctx: &mut ResolveContext<'_, R>,
) -> Result<Resolution> {
    let current = mover.position;
    let mut verdict: Option<bool> = None;
    let mut outcome = None;

    let particle: &Molecule = mover;
    for stage in particle.handler.stages() {
        let settled = match *stage {
            Stage::Absorption { ray_march } => {
                line_check(particle, candidate, ctx.medium, ray_march)?
                    .map(|(machine, at)| Resolution::Absorbed { machine, at })
            }
            Stage::Standard | Stage::OnTrack => {
                let collided =
                    *verdict.get_or_insert_with(|| is_collision(particle, candidate, ctx));
                collided.then_some(Resolution::Blocked)
            }
            Stage::Decomposing(mode) => {
                let collided =
                    *verdict.get_or_insert_with(|| is_collision(particle, candidate, ctx));
                collided.then(|| decompose(mode, particle, candidate, ctx))
            }
        };
        if settled.is_some() {
            outcome = settled;
            break;
        }
    }

    let outcome = outcome.unwrap_or(Resolution::Moved(candidate));
    let occupant = Occupant::Molecule(mover.id);
    match outcome {
        Resolution::Moved(to) => {
            ctx.medium.move_occupant(occupant, current, to);
            mover.position = to;
            trace!("molecule {} moved {} -> {}", mover.id, current, to);
        }
        Resolution::Blocked => {
            trace!("molecule {} blocked at {}", mover.id, current);
        }
        Resolution::Absorbed { machine, at } => {
            ctx.medium.move_occupant(occupant, current, GARBAGE);
            mover.position = GARBAGE;
            mover.completed_tick = Some(ctx.tick);
            debug!(
                "{} molecule {} absorbed by nanomachine {} at {}",
                mover.kind, mover.id, machine, at
            );
        }
        Resolution::Decomposed => {
            ctx.medium.move_occupant(occupant, current, GARBAGE);
            mover.position = GARBAGE;
        }
    }
    Ok(outcome)
}

/// Occupancy test at `candidate`. Emits one collision event per co-located
/// particle when the verdict is positive.
fn is_collision<R: Rng + ?Sized>(
    mover: &Molecule,
    candidate: Position,
    ctx: &mut ResolveContext<'_, R>,
) -> bool {
    let others: Vec<MoleculeKind> = ctx
        .medium
        .molecules_at(candidate)
        .filter(|id| *id != mover.id)
        .filter_map(|id| ctx.molecules.get(&id))
        .map(|m| m.kind)
        .collect();
    if others.is_empty() {
        return false;
    }
    let vsum: f64 = ctx
        .medium
        .molecules_at(candidate)
        .filter(|id| *id != mover.id)
        .filter_map(|id| ctx.molecules.get(&id))
        .map(|m| m.volume)
        .sum();

    let collided = if vsum + mover.volume >= 1.0 {
        true
    } else {
        let draw: f64 = ctx.rng.gen_range(0.0..1.0);
        collides(vsum, mover.volume, draw)
    };

    if collided {
        for kind in others {
            if let Some(pair) = CollisionPair::from_kinds(mover.kind, kind) {
                ctx.events.push(Event::Collision {
                    pair,
                    tick: ctx.tick,
                });
            }
        }
    }
    collided
}

/// Applies the id rule for `mode` after a collision. Falls back to staying
/// put when no pair qualifies.
fn decompose<R: Rng + ?Sized>(
    mode: DecomposingMode,
    mover: &Molecule,
    candidate: Position,
    ctx: &mut ResolveContext<'_, R>,
) -> Resolution {
    let (Some(opposing), Some(mover_id)) = (mover.kind.opposing(), mover.msg_id) else {
        return Resolution::Blocked;
    };
    let partners: Vec<(MoleculeId, u32)> = ctx
        .medium
        .molecules_at(candidate)
        .filter(|id| *id != mover.id)
        .filter_map(|id| ctx.molecules.get(&id))
        .filter(|m| m.kind == opposing)
        .filter_map(|m| m.msg_id.map(|msg| (m.id, msg)))
        .collect();

    let mover_is_info = mover.kind == MoleculeKind::Information;
    for (partner, partner_msg) in partners {
        let (info_msg, ack_msg) = if mover_is_info {
            (mover_id, partner_msg)
        } else {
            (partner_msg, mover_id)
        };
        let loser = match mode {
            DecomposingMode::ExactMatch => (ack_msg == info_msg).then_some(Loser::Info),
            DecomposingMode::AckAtOrAfter => (ack_msg >= info_msg).then_some(Loser::Info),
            DecomposingMode::OlderLoses => Some(if ack_msg >= info_msg {
                Loser::Info
            } else {
                Loser::Ack
            }),
        };
        let Some(loser) = loser else {
            continue;
        };
        let mover_loses = (loser == Loser::Info) == mover_is_info;
        if mover_loses {
            ctx.events.push(Event::Decomposition {
                molecule: mover.id,
                kind: mover.kind,
                tick: ctx.tick,
            });
            debug!("{} molecule {} decomposed", mover.kind, mover.id);
            return Resolution::Decomposed;
        }
        annihilate(partner, candidate, ctx);
        return Resolution::Blocked;
    }
    Resolution::Blocked
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Loser {
    Info,
    Ack,
}

fn annihilate<R: Rng + ?Sized>(id: MoleculeId, at: Position, ctx: &mut ResolveContext<'_, R>) {
    ctx.medium.move_occupant(Occupant::Molecule(id), at, GARBAGE);
    if let Some(victim) = ctx.molecules.get_mut(&id) {
        victim.position = GARBAGE;
        ctx.events.push(Event::Decomposition {
            molecule: id,
            kind: victim.kind,
            tick: ctx.tick,
        });
        debug!("{} molecule {} decomposed", victim.kind, id);
    }
}

/// Finds the first nanomachine cell on the way to `candidate` that would
/// absorb `mover`, marching in unit steps so long jumps cannot tunnel past
/// a receptor.
pub fn line_check(
    mover: &Molecule,
    candidate: Position,
    medium: &Medium,
    ray_march: bool,
) -> Result<Option<(MachineId, Position)>> {
    let absorber = |cell: Position| match mover.kind {
        MoleculeKind::Information => medium.receiver_at(cell, mover.source),
        MoleculeKind::Acknowledgement => medium.transmitter_at(cell, mover.source),
        MoleculeKind::Noise => None,
    };
    let current = mover.position;
    if !ray_march || candidate == current {
        return Ok(absorber(candidate).map(|m| (m, candidate)));
    }

    let direction = Vector3::direction(current, candidate)?;
    let bound = (candidate - current).to_continuous().length().ceil() as usize + 1;
    let mut cursor = current.to_continuous();
    let mut steps = 0;
    loop {
        cursor = cursor + direction;
        steps += 1;
        let cell = cursor.round();
        if let Some(machine) = absorber(cell) {
            return Ok(Some((machine, cell)));
        }
        if cell == candidate {
            return Ok(None);
        }
        if steps >= bound {
            return Err(SimError::UnreachableTarget {
                from: current,
                to: candidate,
                steps,
            });
        }
    }
}
