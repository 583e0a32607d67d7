//! Runtime container: the block network plus its companions.
//!
//! Mirrors the shape of a running installation: the graph of blocks, the
//! deterministic execution order, the cycle clock, and the fieldbus adapter
//! appended last in that order. The runtime discovers motion players and
//! behaviors from the execution order, so the command surface addresses them
//! by stable indices.

use std::time::Instant;

use thiserror::Error;
use tracing::info;

use animata_can::adapter::{CanAdapter, DriveReport};
use animata_core::behavior::{Behavior, StateChange};
use animata_core::block::BlockId;
use animata_core::clock::Clock;
use animata_core::exec::Executor;
use animata_core::graph::{GraphError, Network};
use animata_core::player::MotionPlayer;

use crate::command::{Command, CommandError, CommandReply};
use crate::telemetry::OutputSnapshot;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("block {0} is not a fieldbus adapter")]
    NotAnAdapter(String),
}

/// Aggregate result of the fieldbus startup sequence.
///
/// Homing and enable outcomes stay per-axis; the caller decides whether a
/// partial startup is good enough to run with.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub homing: Option<DriveReport>,
    pub enable: Option<DriveReport>,
}

impl StartupReport {
    pub fn all_ok(&self) -> bool {
        self.homing.as_ref().is_none_or(DriveReport::all_ok)
            && self.enable.as_ref().is_none_or(DriveReport::all_ok)
    }
}

/// The assembled runtime: network, order, clock, and fieldbus.
pub struct Runtime {
    network: Network,
    executor: Executor,
    clock: Clock,
    adapter: Option<BlockId>,
    motion_players: Vec<BlockId>,
    behaviors: Vec<BlockId>,
    last_cycle: Option<Instant>,
}

impl Runtime {
    /// Build the execution order from `roots` and assemble the runtime.
    ///
    /// When a fieldbus adapter block is given it is appended last in the
    /// order (unless already reachable), so it always transmits the
    /// setpoints produced earlier in the same cycle.
    pub fn new(
        network: Network,
        roots: &[BlockId],
        adapter: Option<BlockId>,
        clock: Clock,
    ) -> Result<Self, RuntimeError> {
        let mut order = network.build(roots)?;

        if let Some(id) = adapter {
            if network.downcast_ref::<CanAdapter>(id).is_none() {
                return Err(RuntimeError::NotAnAdapter(network.label(id)));
            }
            if !order.contains(&id) {
                order.push(id);
            }
        }

        let motion_players = order
            .iter()
            .copied()
            .filter(|&id| network.downcast_ref::<MotionPlayer>(id).is_some())
            .collect();
        let behaviors = order
            .iter()
            .copied()
            .filter(|&id| network.downcast_ref::<Behavior>(id).is_some())
            .collect();

        info!(
            "runtime assembled: {} blocks in order, interval {:?}",
            order.len(),
            clock.interval()
        );

        Ok(Self {
            network,
            executor: Executor::new(order),
            clock,
            adapter,
            motion_players,
            behaviors,
            last_cycle: None,
        })
    }

    pub fn order(&self) -> &[BlockId] {
        self.executor.order()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn motion_players(&self) -> &[BlockId] {
        &self.motion_players
    }

    pub fn behaviors(&self) -> &[BlockId] {
        &self.behaviors
    }

    // ─── Fieldbus Startup / Shutdown ────────────────────────────────

    /// Home all motors, then enable all drives.
    ///
    /// Blocking; runs before the cycle loop starts. Returns the per-axis
    /// outcomes without judging them.
    pub fn startup(&mut self) -> StartupReport {
        let mut report = StartupReport::default();
        if let Some(id) = self.adapter {
            if let Some(adapter) = self.network.downcast_mut::<CanAdapter>(id) {
                report.homing = Some(adapter.home_motors());
                report.enable = Some(adapter.enable_drives());
            }
        }
        report
    }

    /// Drive all outputs to a safe state and release the fieldbus.
    pub fn shutdown(&mut self) {
        if let Some(id) = self.adapter {
            if let Some(adapter) = self.network.downcast_mut::<CanAdapter>(id) {
                adapter.shutdown();
            }
        }
    }

    // ─── Cycle ──────────────────────────────────────────────────────

    /// Execute one cycle of the block network and step the clock.
    ///
    /// The measured delta between consecutive calls feeds the clock; whether
    /// it is used depends on the clock's tick policy.
    pub fn single_cycle(&mut self) {
        let now = Instant::now();
        let measured = self
            .last_cycle
            .map(|t| now.duration_since(t))
            .unwrap_or_else(|| self.clock.interval());
        self.last_cycle = Some(now);

        self.executor.run_cycle(&mut self.network, &self.clock);
        self.clock.advance(measured);
    }

    /// Ordered snapshot of every value output in execution order.
    pub fn capture_value_outputs(&self) -> Vec<f64> {
        self.network.capture_value_outputs(self.executor.order())
    }

    /// Snapshot with cycle/timestamp attached, for the telemetry surface.
    pub fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            cycle: self.clock.cycle(),
            timestamp: self.clock.now(),
            values: self.capture_value_outputs(),
        }
    }

    // ─── Behavior & Command Surface ─────────────────────────────────

    pub fn play_behaviors(&mut self) {
        for &id in &self.behaviors {
            if let Some(b) = self.network.downcast_mut::<Behavior>(id) {
                b.play();
            }
        }
    }

    pub fn pause_behaviors(&mut self) {
        for &id in &self.behaviors {
            if let Some(b) = self.network.downcast_mut::<Behavior>(id) {
                b.pause();
            }
        }
    }

    /// Attach a state-change subscriber to every behavior.
    pub fn subscribe_behaviors(&mut self, tx: crossbeam_channel::Sender<StateChange>) {
        for &id in &self.behaviors {
            if let Some(b) = self.network.downcast_mut::<Behavior>(id) {
                b.subscribe(tx.clone());
            }
        }
    }

    /// Apply one external command.
    ///
    /// Validation happens before mutation; on error the runtime state is
    /// exactly what it was.
    pub fn apply(&mut self, command: Command) -> Result<CommandReply, CommandError> {
        match command {
            Command::Play {
                player,
                spline,
                looping,
                offset,
            } => {
                let id = self.player_id(player)?;
                let now = self.clock.now();
                let p = self
                    .network
                    .downcast_mut::<MotionPlayer>(id)
                    .ok_or(CommandError::UnknownPlayer(player))?;
                let start = p.play(spline, looping, offset, now)?;
                Ok(CommandReply::Started { start })
            }
            Command::Stop { player } => {
                let id = self.player_id(player)?;
                if let Some(p) = self.network.downcast_mut::<MotionPlayer>(id) {
                    p.stop();
                }
                Ok(CommandReply::Ack)
            }
            Command::LivePreview { player, values } => {
                let id = self.player_id(player)?;
                let p = self
                    .network
                    .downcast_mut::<MotionPlayer>(id)
                    .ok_or(CommandError::UnknownPlayer(player))?;
                p.live_preview(values)?;
                Ok(CommandReply::Ack)
            }
            Command::BehaviorPlay => {
                self.play_behaviors();
                Ok(CommandReply::Ack)
            }
            Command::BehaviorPause => {
                self.pause_behaviors();
                Ok(CommandReply::Ack)
            }
            Command::SetParam {
                behavior,
                key,
                value,
            } => {
                let id = *self
                    .behaviors
                    .get(behavior)
                    .ok_or(CommandError::UnknownBehavior(behavior))?;
                let b = self
                    .network
                    .downcast_mut::<Behavior>(id)
                    .ok_or(CommandError::UnknownBehavior(behavior))?;
                b.set_param(&key, &value)?;
                Ok(CommandReply::Ack)
            }
        }
    }

    fn player_id(&self, player: usize) -> Result<BlockId, CommandError> {
        self.motion_players
            .get(player)
            .copied()
            .ok_or(CommandError::UnknownPlayer(player))
    }
}
