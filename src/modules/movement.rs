use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::modules::lattice::Position;
use crate::modules::medium::Medium;
use crate::modules::microtubule::{Microtubule, TubeId};
use crate::modules::molecule::{Molecule, MovementType};

/// Per-axis maximum displacement of a diffusive step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepLengths {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for StepLengths {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl StepLengths {
    pub const fn uniform(len: f64) -> Self {
        Self {
            x: len,
            y: len,
            z: len,
        }
    }
}

/// How a particle picks its next candidate cell. Swapping strategy means
/// replacing the variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MovementController {
    Diffusive,
    OnTrack { tube: TubeId },
    Stationary,
}

impl MovementController {
    pub fn initial(movement: MovementType) -> Self {
        match movement {
            MovementType::Stationary => MovementController::Stationary,
            MovementType::Active | MovementType::Passive => MovementController::Diffusive,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            MovementController::Diffusive => "diffusive",
            MovementController::OnTrack { .. } => "on_track",
            MovementController::Stationary => "stationary",
        }
    }
}

pub struct MoveContext<'a> {
    pub tick: u64,
    pub step: StepLengths,
    pub derail_probability: f64,
    pub medium: &'a Medium,
    pub tubes: &'a [Microtubule],
}

/// Candidate cell plus the controller the particle should switch to once
/// this tick's resolution is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub candidate: Position,
    pub reassign: Option<MovementController>,
}

impl Proposal {
    fn stay(at: Position) -> Self {
        Self {
            candidate: at,
            reassign: None,
        }
    }
}

pub fn next_candidate<R: Rng + ?Sized>(
    molecule: &Molecule,
    ctx: &MoveContext<'_>,
    rng: &mut R,
) -> Proposal {
    let current = molecule.position;
    match molecule.controller {
        MovementController::Stationary => Proposal::stay(current),
        MovementController::Diffusive => {
            let candidate = current.offset(
                diffusive_delta(ctx.step.x, rng),
                diffusive_delta(ctx.step.y, rng),
                diffusive_delta(ctx.step.z, rng),
            );
            let reassign = if molecule.movement == MovementType::Active {
                ctx.medium
                    .track_at(current)
                    .or_else(|| ctx.medium.track_at(candidate))
                    .map(|tube| MovementController::OnTrack { tube })
            } else {
                None
            };
            Proposal {
                candidate,
                reassign,
            }
        }
        MovementController::OnTrack { tube } => {
            let Some(track) = ctx.tubes.get(tube) else {
                return Proposal {
                    candidate: current,
                    reassign: Some(MovementController::Diffusive),
                };
            };
            let dir = track.direction();
            let candidate = current.offset(
                track_delta(dir.x, ctx.tick),
                track_delta(dir.y, ctx.tick),
                track_delta(dir.z, ctx.tick),
            );
            let derailed = rng.gen_range(0.0..1.0) < ctx.derail_probability;
            Proposal {
                candidate,
                reassign: derailed.then_some(MovementController::Diffusive),
            }
        }
    }
}

/// Uniform draw in `[-max, max]`, rounded to the nearest cell.
fn diffusive_delta<R: Rng + ?Sized>(max: f64, rng: &mut R) -> i32 {
    let u: f64 = rng.gen_range(0.0..1.0);
    (u * 2.0 * max - max).round() as i32
}

/// Integer step along one axis of a track direction. Fractional components
/// fire once every `round(1 / |c|)` ticks so the mean velocity matches.
pub fn track_delta(component: f64, tick: u64) -> i32 {
    let magnitude = component.abs();
    if magnitude < 1e-9 {
        return 0;
    }
    let sign = if component < 0.0 { -1 } else { 1 };
    if magnitude >= 1.0 - 1e-9 {
        return sign;
    }
    let period = ((1.0 / magnitude).round() as u64).max(1);
    if tick % period == 0 { sign } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collision::CollisionHandler;
    use crate::modules::medium::Occupant;
    use crate::modules::molecule::MoleculeKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn molecule(controller: MovementController, movement: MovementType) -> Molecule {
        Molecule {
            id: 1,
            kind: MoleculeKind::Information,
            msg_id: Some(1),
            seq: 0,
            position: Position::new(5, 5, 5),
            movement,
            controller,
            handler: CollisionHandler::empty(),
            volume: 1.0,
            created_tick: 0,
            completed_tick: None,
            source: None,
        }
    }

    fn ctx<'a>(medium: &'a Medium, tubes: &'a [Microtubule], step: f64) -> MoveContext<'a> {
        MoveContext {
            tick: 0,
            step: StepLengths::uniform(step),
            derail_probability: 0.0,
            medium,
            tubes,
        }
    }

    #[test]
    fn stationary_never_moves() {
        let medium = Medium::new(Position::new(10, 10, 10));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let m = molecule(MovementController::Stationary, MovementType::Stationary);
        let p = next_candidate(&m, &ctx(&medium, &[], 3.0), &mut rng);
        assert_eq!(p, Proposal::stay(m.position));
    }

    #[test]
    fn diffusive_stays_within_step_bounds() {
        let medium = Medium::new(Position::new(10, 10, 10));
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let m = molecule(MovementController::Diffusive, MovementType::Passive);
        for _ in 0..500 {
            let p = next_candidate(&m, &ctx(&medium, &[], 2.0), &mut rng);
            let d = p.candidate - m.position;
            assert!(d.x.abs() <= 2 && d.y.abs() <= 2 && d.z.abs() <= 2);
            assert_eq!(p.reassign, None);
        }
    }

    #[test]
    fn active_particle_attaches_to_track_under_it() {
        let mut medium = Medium::new(Position::new(10, 10, 10));
        let tube = Microtubule::new(0, Position::new(5, 5, 5), Position::new(9, 5, 5)).unwrap();
        for cell in tube.cells() {
            medium.add_occupant(Occupant::Track(0), *cell);
        }
        let tubes = [tube];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let m = molecule(MovementController::Diffusive, MovementType::Active);
        let p = next_candidate(&m, &ctx(&medium, &tubes, 1.0), &mut rng);
        assert_eq!(p.reassign, Some(MovementController::OnTrack { tube: 0 }));

        let passive = molecule(MovementController::Diffusive, MovementType::Passive);
        let p = next_candidate(&passive, &ctx(&medium, &tubes, 1.0), &mut rng);
        assert_eq!(p.reassign, None);
    }

    #[test]
    fn on_track_follows_direction_and_derails() {
        let medium = Medium::new(Position::new(10, 10, 10));
        let tubes = [Microtubule::new(0, Position::new(5, 5, 5), Position::new(9, 5, 5)).unwrap()];
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let m = molecule(MovementController::OnTrack { tube: 0 }, MovementType::Active);

        let p = next_candidate(&m, &ctx(&medium, &tubes, 1.0), &mut rng);
        assert_eq!(p.candidate, Position::new(6, 5, 5));
        assert_eq!(p.reassign, None);

        let mut certain = ctx(&medium, &tubes, 1.0);
        certain.derail_probability = 1.0;
        let p = next_candidate(&m, &certain, &mut rng);
        assert_eq!(p.candidate, Position::new(6, 5, 5));
        assert_eq!(p.reassign, Some(MovementController::Diffusive));
    }

    #[test]
    fn fractional_component_fires_on_phase() {
        // 0.25 per tick fires every fourth tick
        let fired: Vec<i32> = (0..8).map(|t| track_delta(0.25, t)).collect();
        assert_eq!(fired, vec![1, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(track_delta(-0.5, 2), -1);
        assert_eq!(track_delta(-0.5, 3), 0);
        assert_eq!(track_delta(0.0, 0), 0);
        assert_eq!(track_delta(-1.0, 7), -1);
    }
}
