//! Nanomachines and the reliability protocol they run.
//!
//! A transmitter half sends one message at a time and, with acknowledgements
//! on, waits for a matching acknowledgement before moving on; a receiver half
//! counts distinct sequence numbers per message until the FEC threshold is
//! met. An intermediate node runs both halves and relays what it receives.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::{debug, info, warn};

use crate::modules::fec::FecScheme;
use crate::modules::lattice::Position;
use crate::modules::medium::{MachineId, NodeRole};
use crate::modules::molecule::{MessageId, Molecule, MoleculeKind, MoleculeParams, MovementType};
use crate::modules::stats::Event;

/// Protocol knobs shared by every machine in a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Protocol {
    pub use_acknowledgements: bool,
    pub num_retransmissions: u32,
    pub retransmit_wait_time: u64,
    pub fec: FecScheme,
}

/// A particle a machine wants placed in the medium.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Emission {
    pub kind: MoleculeKind,
    pub msg_id: MessageId,
    pub seq: u32,
    pub at: Position,
    pub movement: MovementType,
    pub volume: f64,
    pub source: MachineId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxPhase {
    Idle {
        ready_at: u64,
    },
    AwaitingAck {
        msg_id: MessageId,
        deadline: u64,
        retransmissions: u32,
    },
}

#[derive(Clone, Debug)]
struct Transmitter {
    to_originate: u32,
    relays: VecDeque<MessageId>,
    phase: TxPhase,
    info: MoleculeParams,
}

#[derive(Clone, Debug)]
struct Receiver {
    received: HashMap<MessageId, BTreeSet<u32>>,
    /// Reconstructed messages and the tick they were last acknowledged.
    completed: HashMap<MessageId, u64>,
    ack: MoleculeParams,
}

#[derive(Clone, Debug)]
pub struct NanoMachine {
    pub id: MachineId,
    pub role: NodeRole,
    pub center: Position,
    pub radius: i32,
    pub info_release: Position,
    pub ack_release: Position,
    protocol: Protocol,
    transmitter: Option<Transmitter>,
    receiver: Option<Receiver>,
}

impl NanoMachine {
    pub fn transmitter(
        id: MachineId,
        center: Position,
        radius: i32,
        release_offset: Position,
        messages: u32,
        info: MoleculeParams,
        protocol: Protocol,
    ) -> Self {
        Self {
            id,
            role: NodeRole::Transmitter,
            center,
            radius,
            info_release: center + release_offset,
            ack_release: center + release_offset,
            protocol,
            transmitter: Some(Transmitter {
                to_originate: messages,
                relays: VecDeque::new(),
                phase: TxPhase::Idle { ready_at: 0 },
                info,
            }),
            receiver: None,
        }
    }

    pub fn receiver(
        id: MachineId,
        center: Position,
        radius: i32,
        release_offset: Position,
        ack: MoleculeParams,
        protocol: Protocol,
    ) -> Self {
        Self {
            id,
            role: NodeRole::Receiver,
            center,
            radius,
            info_release: center + release_offset,
            ack_release: center + release_offset,
            protocol,
            transmitter: None,
            receiver: Some(Receiver::new(ack)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn intermediate(
        id: MachineId,
        center: Position,
        radius: i32,
        info_offset: Position,
        ack_offset: Position,
        info: MoleculeParams,
        ack: MoleculeParams,
        protocol: Protocol,
    ) -> Self {
        Self {
            id,
            role: NodeRole::Intermediate,
            center,
            radius,
            info_release: center + info_offset,
            ack_release: center + ack_offset,
            protocol,
            transmitter: Some(Transmitter {
                to_originate: 0,
                relays: VecDeque::new(),
                phase: TxPhase::Idle { ready_at: 0 },
                info,
            }),
            receiver: Some(Receiver::new(ack)),
        }
    }

    /// Filled sphere of radius `radius - 1` around the center.
    pub fn cells(&self) -> Vec<Position> {
        let r = self.radius - 1;
        let limit = (r as i64) * (r as i64);
        let mut cells = Vec::new();
        for dx in -r..=r {
            for dy in -r..=r {
                for dz in -r..=r {
                    let cell = self.center.offset(dx, dy, dz);
                    if cell.squared_distance(self.center) <= limit {
                        cells.push(cell);
                    }
                }
            }
        }
        cells
    }

    pub fn phase(&self) -> Option<TxPhase> {
        self.transmitter.as_ref().map(|tx| tx.phase)
    }

    /// Live batch size for information molecules, after adaptive changes.
    pub fn info_batch(&self) -> Option<u32> {
        self.transmitter.as_ref().map(|tx| tx.info.count)
    }

    /// Nothing queued and nothing awaiting an acknowledgement.
    pub fn is_exhausted(&self) -> bool {
        match &self.transmitter {
            None => true,
            Some(tx) => {
                tx.to_originate == 0
                    && tx.relays.is_empty()
                    && matches!(tx.phase, TxPhase::Idle { .. })
            }
        }
    }

    /// Advances the transmitter half by one tick.
    pub fn next_step(
        &mut self,
        tick: u64,
        next_msg_id: &mut MessageId,
        events: &mut Vec<Event>,
    ) -> Vec<Emission> {
        let id = self.id;
        let release = self.info_release;
        let protocol = self.protocol;
        let origin = self.role == NodeRole::Transmitter;
        let Some(tx) = self.transmitter.as_mut() else {
            return Vec::new();
        };

        match tx.phase {
            TxPhase::Idle { ready_at } if tick >= ready_at => {
                let msg_id = if let Some(relay) = tx.relays.pop_front() {
                    relay
                } else if tx.to_originate > 0 {
                    tx.to_originate -= 1;
                    let msg_id = *next_msg_id;
                    *next_msg_id += 1;
                    msg_id
                } else {
                    return Vec::new();
                };
                let batch = tx.batch(id, msg_id, release, &protocol);
                events.push(Event::MessageSent {
                    machine: id,
                    msg_id,
                    molecules: batch.len() as u32,
                    tick,
                });
                debug!(
                    "nanomachine {id} sent message {msg_id} ({} molecules) at step {tick}",
                    batch.len()
                );
                tx.phase = if protocol.use_acknowledgements {
                    TxPhase::AwaitingAck {
                        msg_id,
                        deadline: tick.saturating_add(protocol.retransmit_wait_time),
                        retransmissions: 0,
                    }
                } else {
                    TxPhase::Idle {
                        ready_at: tick.saturating_add(protocol.retransmit_wait_time),
                    }
                };
                batch
            }
            TxPhase::AwaitingAck {
                msg_id,
                deadline,
                retransmissions,
            } if tick >= deadline => {
                if retransmissions < protocol.num_retransmissions {
                    tx.phase = TxPhase::AwaitingAck {
                        msg_id,
                        deadline: tick.saturating_add(protocol.retransmit_wait_time),
                        retransmissions: retransmissions + 1,
                    };
                    events.push(Event::Retransmission {
                        transmitter_side: true,
                        msg_id,
                        tick,
                    });
                    debug!(
                        "nanomachine {id} retransmitting message {msg_id} ({}/{}) at step {tick}",
                        retransmissions + 1,
                        protocol.num_retransmissions
                    );
                    tx.batch(id, msg_id, release, &protocol)
                } else {
                    if origin {
                        events.push(Event::MessageFailed { msg_id, tick });
                    }
                    warn!("nanomachine {id} gave up on message {msg_id} at step {tick}");
                    tx.info.apply_adaptive_change(false);
                    tx.phase = TxPhase::Idle { ready_at: tick + 1 };
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Hands an absorbed particle to the machine. Returns any particles the
    /// machine emits in response.
    pub fn absorb(&mut self, molecule: &Molecule, tick: u64, events: &mut Vec<Event>) -> Vec<Emission> {
        let Some(msg_id) = molecule.msg_id else {
            return Vec::new();
        };
        match molecule.kind {
            MoleculeKind::Acknowledgement => {
                self.receive_ack(msg_id, tick, events);
                Vec::new()
            }
            MoleculeKind::Information => self.receive_info(msg_id, molecule.seq, tick, events),
            MoleculeKind::Noise => Vec::new(),
        }
    }

    fn receive_ack(&mut self, msg_id: MessageId, tick: u64, events: &mut Vec<Event>) {
        let id = self.id;
        let origin = self.role == NodeRole::Transmitter;
        let Some(tx) = self.transmitter.as_mut() else {
            return;
        };
        match tx.phase {
            TxPhase::AwaitingAck { msg_id: pending, .. } if pending == msg_id => {
                if origin {
                    events.push(Event::MessageCompleted { msg_id, tick });
                    info!("Completed message: {msg_id}, at step: {tick}");
                } else {
                    debug!("nanomachine {id} relay of message {msg_id} acknowledged at step {tick}");
                }
                tx.info.apply_adaptive_change(true);
                tx.phase = TxPhase::Idle { ready_at: tick + 1 };
            }
            _ => debug!("nanomachine {id} ignored stale acknowledgement for message {msg_id}"),
        }
    }

    fn receive_info(
        &mut self,
        msg_id: MessageId,
        seq: u32,
        tick: u64,
        events: &mut Vec<Event>,
    ) -> Vec<Emission> {
        let id = self.id;
        let protocol = self.protocol;
        let release = self.ack_release;
        let role = self.role;
        let Some(rx) = self.receiver.as_mut() else {
            return Vec::new();
        };

        if let Some(last_ack) = rx.completed.get_mut(&msg_id) {
            let window_closed = tick >= last_ack.saturating_add(protocol.retransmit_wait_time);
            if protocol.use_acknowledgements && window_closed {
                *last_ack = tick;
                events.push(Event::Retransmission {
                    transmitter_side: false,
                    msg_id,
                    tick,
                });
                debug!("nanomachine {id} re-acknowledging message {msg_id} at step {tick}");
                return rx.acks(id, msg_id, release);
            }
            return Vec::new();
        }

        let seqs = rx.received.entry(msg_id).or_default();
        seqs.insert(seq);
        let received = seqs.len() as u32;
        if !protocol.fec.is_reconstructable(received) {
            return Vec::new();
        }

        rx.received.remove(&msg_id);
        rx.completed.insert(msg_id, tick);
        events.push(Event::MessageReceived {
            machine: id,
            msg_id,
            received,
            tick,
        });
        debug!("nanomachine {id} reconstructed message {msg_id} at step {tick}");
        if role == NodeRole::Receiver && !protocol.use_acknowledgements {
            events.push(Event::MessageCompleted { msg_id, tick });
            info!("Completed message: {msg_id}, at step: {tick}");
        }
        let emissions = if protocol.use_acknowledgements {
            rx.acks(id, msg_id, release)
        } else {
            Vec::new()
        };
        if let Some(tx) = self.transmitter.as_mut() {
            tx.relays.push_back(msg_id);
        }
        emissions
    }
}

impl Transmitter {
    /// `packets_to_send` distinct sequence numbers, each carried by the
    /// current adaptive count of molecules.
    fn batch(&self, source: MachineId, msg_id: MessageId, at: Position, protocol: &Protocol) -> Vec<Emission> {
        let packets = protocol.fec.packets_to_send();
        let copies = self.info.count;
        let volume = self.info.volume();
        (0..packets)
            .flat_map(|seq| {
                (0..copies).map(move |_| Emission {
                    kind: MoleculeKind::Information,
                    msg_id,
                    seq,
                    at,
                    movement: self.info.movement,
                    volume,
                    source,
                })
            })
            .collect()
    }
}

impl Receiver {
    fn new(ack: MoleculeParams) -> Self {
        Self {
            received: HashMap::new(),
            completed: HashMap::new(),
            ack,
        }
    }

    fn acks(&self, source: MachineId, msg_id: MessageId, at: Position) -> Vec<Emission> {
        (0..self.ack.count)
            .map(|_| Emission {
                kind: MoleculeKind::Acknowledgement,
                msg_id,
                seq: 0,
                at,
                movement: self.ack.movement,
                volume: self.ack.volume(),
                source,
            })
            .collect()
    }
}
