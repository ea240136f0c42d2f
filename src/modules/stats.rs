use std::fs;
use std::path::Path;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::modules::medium::MachineId;
use crate::modules::molecule::{CollisionPair, MessageId, MoleculeId, MoleculeKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    MessageSent {
        machine: MachineId,
        msg_id: MessageId,
        molecules: u32,
        tick: u64,
    },
    MessageCompleted {
        msg_id: MessageId,
        tick: u64,
    },
    MessageReceived {
        machine: MachineId,
        msg_id: MessageId,
        received: u32,
        tick: u64,
    },
    MessageFailed {
        msg_id: MessageId,
        tick: u64,
    },
    Retransmission {
        transmitter_side: bool,
        msg_id: MessageId,
        tick: u64,
    },
    Collision {
        pair: CollisionPair,
        tick: u64,
    },
    Decomposition {
        molecule: MoleculeId,
        kind: MoleculeKind,
        tick: u64,
    },
    Absorbed {
        molecule: MoleculeId,
        kind: MoleculeKind,
        machine: MachineId,
        travel_time: u64,
        tick: u64,
    },
    MoleculeReleased {
        molecule: MoleculeId,
        kind: MoleculeKind,
        tick: u64,
    },
    SimulationFinished {
        final_tick: u64,
        completed: u32,
        configured: u32,
    },
}

/// Observer for run statistics. Every callback defaults to a no-op so a
/// missing reporting layer costs nothing.
pub trait StatsSink {
    fn message_completed(&mut self, _msg_id: MessageId, _tick: u64) {}
    fn message_received(&mut self, _msg_id: MessageId, _received: u32, _tick: u64) {}
    fn message_failed(&mut self, _msg_id: MessageId, _tick: u64) {}
    fn retransmission_fired(&mut self, _transmitter_side: bool, _tick: u64) {}
    fn collision_occurred(&mut self, _pair: CollisionPair, _tick: u64) {}
    fn particle_decomposed(&mut self, _tick: u64) {}
    fn particle_absorbed(&mut self, _kind: MoleculeKind, _travel_time: u64, _tick: u64) {}
    fn simulation_finished(&mut self, _final_tick: u64, _completed: u32, _configured: u32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatsSink for NullSink {}

/// Routes one tick event to the matching sink callback.
pub fn dispatch(sink: &mut dyn StatsSink, event: &Event) {
    match *event {
        Event::MessageCompleted { msg_id, tick } => sink.message_completed(msg_id, tick),
        Event::MessageReceived {
            msg_id,
            received,
            tick,
            ..
        } => sink.message_received(msg_id, received, tick),
        Event::MessageFailed { msg_id, tick } => sink.message_failed(msg_id, tick),
        Event::Retransmission {
            transmitter_side,
            tick,
            ..
        } => sink.retransmission_fired(transmitter_side, tick),
        Event::Collision { pair, tick } => sink.collision_occurred(pair, tick),
        Event::Decomposition { tick, .. } => sink.particle_decomposed(tick),
        Event::Absorbed {
            kind,
            travel_time,
            tick,
            ..
        } => sink.particle_absorbed(kind, travel_time, tick),
        Event::SimulationFinished {
            final_tick,
            completed,
            configured,
        } => sink.simulation_finished(final_tick, completed, configured),
        Event::MessageSent { .. } | Event::MoleculeReleased { .. } => {}
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionTally {
    pub ack_ack: u64,
    pub ack_info: u64,
    pub ack_noise: u64,
    pub info_info: u64,
    pub info_noise: u64,
}

impl CollisionTally {
    pub fn record(&mut self, pair: CollisionPair) {
        let slot = match pair {
            CollisionPair::AckAck => &mut self.ack_ack,
            CollisionPair::AckInfo => &mut self.ack_info,
            CollisionPair::AckNoise => &mut self.ack_noise,
            CollisionPair::InfoInfo => &mut self.info_info,
            CollisionPair::InfoNoise => &mut self.info_noise,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, pair: CollisionPair) -> u64 {
        match pair {
            CollisionPair::AckAck => self.ack_ack,
            CollisionPair::AckInfo => self.ack_info,
            CollisionPair::AckNoise => self.ack_noise,
            CollisionPair::InfoInfo => self.info_info,
            CollisionPair::InfoNoise => self.info_noise,
        }
    }

    pub fn total(&self) -> u64 {
        CollisionPair::ALL.iter().map(|p| self.get(*p)).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsCollector {
    pub completed: Vec<Completion>,
    pub received_messages: u64,
    pub failed_messages: Vec<MessageId>,
    pub transmitter_retransmissions: u64,
    pub receiver_retransmissions: u64,
    pub collisions: CollisionTally,
    pub decompositions: u64,
    pub info_travel_time: u64,
    pub info_absorbed: u64,
    pub ack_travel_time: u64,
    pub ack_absorbed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub msg_id: MessageId,
    pub tick: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn average_info_travel_time(&self) -> Option<f64> {
        average(self.info_travel_time, self.info_absorbed)
    }

    pub fn average_ack_travel_time(&self) -> Option<f64> {
        average(self.ack_travel_time, self.ack_absorbed)
    }
}

fn average(total: u64, count: u64) -> Option<f64> {
    (count > 0).then(|| total as f64 / count as f64)
}

impl StatsSink for StatsCollector {
    fn message_completed(&mut self, msg_id: MessageId, tick: u64) {
        self.completed.push(Completion { msg_id, tick });
    }

    fn message_received(&mut self, _msg_id: MessageId, _received: u32, _tick: u64) {
        self.received_messages += 1;
    }

    fn message_failed(&mut self, msg_id: MessageId, _tick: u64) {
        self.failed_messages.push(msg_id);
    }

    fn retransmission_fired(&mut self, transmitter_side: bool, _tick: u64) {
        if transmitter_side {
            self.transmitter_retransmissions += 1;
        } else {
            self.receiver_retransmissions += 1;
        }
    }

    fn collision_occurred(&mut self, pair: CollisionPair, _tick: u64) {
        self.collisions.record(pair);
    }

    fn particle_decomposed(&mut self, _tick: u64) {
        self.decompositions += 1;
    }

    fn particle_absorbed(&mut self, kind: MoleculeKind, travel_time: u64, _tick: u64) {
        match kind {
            MoleculeKind::Information => {
                self.info_travel_time += travel_time;
                self.info_absorbed += 1;
            }
            MoleculeKind::Acknowledgement => {
                self.ack_travel_time += travel_time;
                self.ack_absorbed += 1;
            }
            MoleculeKind::Noise => {}
        }
    }
}

/// Result of one run, saved as pretty JSON by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_tick: u64,
    /// Tick at which the stop condition first held.
    pub finish_tick: Option<u64>,
    pub completed: u32,
    pub configured: u32,
    pub stats: StatsCollector,
    pub finished_at: String,
}

impl RunSummary {
    pub fn new(
        final_tick: u64,
        finish_tick: Option<u64>,
        completed: u32,
        configured: u32,
        stats: StatsCollector,
    ) -> Self {
        Self {
            final_tick,
            finish_tick,
            completed,
            configured,
            stats,
            finished_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn all_completed(&self) -> bool {
        self.completed >= self.configured
    }

    /// Human-readable report in the order the batch tooling expects.
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .stats
            .completed
            .iter()
            .map(|c| format!("Completed message: {}, at step: {}", c.msg_id, c.tick))
            .collect();
        for msg_id in &self.stats.failed_messages {
            lines.push(format!("Failed message: {msg_id}"));
        }
        lines.push(format!(
            "Messages completed: {}/{} (last step {})",
            self.completed, self.configured, self.final_tick
        ));
        lines.push(format!(
            "Retransmissions: transmitter {}, receiver {}",
            self.stats.transmitter_retransmissions, self.stats.receiver_retransmissions
        ));
        let tally = CollisionPair::ALL
            .iter()
            .map(|p| format!("{}={}", p.label(), self.stats.collisions.get(*p)))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("Collisions: {tally}"));
        lines.push(format!("Decompositions: {}", self.stats.decompositions));
        if let Some(avg) = self.stats.average_info_travel_time() {
            lines.push(format!("Average information travel time: {avg:.2}"));
        }
        if let Some(avg) = self.stats.average_ack_travel_time() {
            lines.push(format!("Average acknowledgement travel time: {avg:.2}"));
        }
        lines
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        info!("run summary written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_tallies_dispatched_events() {
        let mut stats = StatsCollector::new();
        let events = [
            Event::Collision {
                pair: CollisionPair::AckInfo,
                tick: 1,
            },
            Event::Collision {
                pair: CollisionPair::AckInfo,
                tick: 2,
            },
            Event::Retransmission {
                transmitter_side: true,
                msg_id: 1,
                tick: 3,
            },
            Event::Decomposition {
                molecule: 4,
                kind: MoleculeKind::Information,
                tick: 3,
            },
            Event::Absorbed {
                molecule: 5,
                kind: MoleculeKind::Information,
                machine: 1,
                travel_time: 10,
                tick: 10,
            },
            Event::Absorbed {
                molecule: 6,
                kind: MoleculeKind::Information,
                machine: 1,
                travel_time: 20,
                tick: 20,
            },
            Event::MessageCompleted { msg_id: 1, tick: 30 },
        ];
        for event in &events {
            dispatch(&mut stats, event);
        }
        assert_eq!(stats.collisions.ack_info, 2);
        assert_eq!(stats.collisions.total(), 2);
        assert_eq!(stats.transmitter_retransmissions, 1);
        assert_eq!(stats.decompositions, 1);
        assert_eq!(stats.average_info_travel_time(), Some(15.0));
        assert_eq!(stats.average_ack_travel_time(), None);
        assert_eq!(stats.completed, vec![Completion { msg_id: 1, tick: 30 }]);
    }

    #[test]
    fn null_sink_accepts_everything() {
        let mut sink = NullSink;
        dispatch(
            &mut sink,
            &Event::SimulationFinished {
                final_tick: 5,
                completed: 0,
                configured: 1,
            },
        );
    }

    #[test]
    fn report_uses_completion_format() {
        let mut stats = StatsCollector::new();
        stats.message_completed(2, 41);
        let summary = RunSummary::new(50, Some(41), 1, 1, stats);
        let lines = summary.report_lines();
        assert_eq!(lines[0], "Completed message: 2, at step: 41");
        assert!(summary.all_completed());
    }
}
