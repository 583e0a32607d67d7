//! Attention-driven behavior state machine.
//!
//! A [`Behavior`] selects which motion should play next from three activity
//! levels. Sensor payloads arriving on its message input mark attention;
//! the attention span decides how long the machine stays lively after the
//! last trigger:
//!
//! - **Sleeping**: idle baseline, cycles through the sleeping motion list.
//! - **Chilled**: recently triggered, cycles through the chilled list until
//!   the attention span runs out.
//! - **Excited**: a trigger just arrived; plays one excited motion to the
//!   end, then falls back to Chilled (attention remaining) or Sleeping.
//!
//! Selected motion names leave through the message output; resolving a name
//! to an actual trajectory is the caller's job. Motion lists are cycled
//! round-robin, so runs are reproducible. Every state change goes to all
//! subscribers; delivery is best-effort and never blocks the cycle.

use std::any::Any;

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::block::{Block, BlockError, BlockIo};
use crate::clock::Clock;
use crate::port::PortSpec;

/// Behavior activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    Sleeping,
    Chilled,
    Excited,
}

impl BehaviorState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sleeping => "sleeping",
            Self::Chilled => "chilled",
            Self::Excited => "excited",
        }
    }
}

impl Default for BehaviorState {
    fn default() -> Self {
        Self::Sleeping
    }
}

impl std::fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State-change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub state: BehaviorState,
}

/// Flat behavior parameter set.
///
/// Mutations land through [`Behavior::set_param`] and take effect from the
/// next cycle on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorParams {
    /// Seconds of liveliness after the last sensor trigger.
    pub attention_span: f64,
    pub sleeping_motions: Vec<String>,
    pub chilled_motions: Vec<String>,
    pub excited_motions: Vec<String>,
}

impl Default for BehaviorParams {
    fn default() -> Self {
        Self {
            attention_span: 10.0,
            sleeping_motions: Vec::new(),
            chilled_motions: Vec::new(),
            excited_motions: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("unknown behavior parameter {0:?}")]
    UnknownKey(String),

    #[error("parameter {key:?} rejects value: {reason}")]
    InvalidValue { key: String, reason: String },
}

// ─── Behavior Block ─────────────────────────────────────────────────

/// Behavior state machine block.
pub struct Behavior {
    state: BehaviorState,
    params: BehaviorParams,
    active: bool,
    last_trigger: f64,
    /// Round-robin cursors per motion list (sleeping, chilled, excited).
    cursors: [usize; 3],
    subscribers: Vec<Sender<StateChange>>,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl Behavior {
    /// Message input carrying sensor payloads.
    pub const SENSOR_IN: usize = 0;
    /// Value input mirroring the player's `playing` flag.
    pub const PLAYING_IN: usize = 1;
    /// Message output emitting selected motion names.
    pub const MOTION_OUT: usize = 0;

    pub fn new(params: BehaviorParams) -> Self {
        Self {
            state: BehaviorState::Sleeping,
            params,
            active: false,
            last_trigger: f64::NEG_INFINITY,
            cursors: [0; 3],
            subscribers: Vec::new(),
            inputs: vec![PortSpec::message("sensor"), PortSpec::value("playing")],
            outputs: vec![PortSpec::message("motion")],
        }
    }

    #[inline]
    pub fn state(&self) -> BehaviorState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn params(&self) -> &BehaviorParams {
        &self.params
    }

    /// Start evaluating transitions each cycle.
    pub fn play(&mut self) {
        self.active = true;
    }

    /// Freeze the machine; sensor input is still drained but ignored.
    pub fn pause(&mut self) {
        self.active = false;
    }

    /// Register a state-change subscriber. Disconnected subscribers are
    /// pruned on the next notification.
    pub fn subscribe(&mut self, tx: Sender<StateChange>) {
        self.subscribers.push(tx);
    }

    /// Update one parameter from a JSON value.
    ///
    /// Validation is all-or-nothing: a rejected value leaves every parameter
    /// untouched.
    pub fn set_param(&mut self, key: &str, value: &serde_json::Value) -> Result<(), ParamError> {
        match key {
            "attention_span" => {
                let span = value.as_f64().ok_or_else(|| ParamError::InvalidValue {
                    key: key.into(),
                    reason: "expected a number".into(),
                })?;
                if !span.is_finite() || span < 0.0 {
                    return Err(ParamError::InvalidValue {
                        key: key.into(),
                        reason: format!("expected a non-negative finite number, got {span}"),
                    });
                }
                self.params.attention_span = span;
            }
            "sleeping_motions" | "chilled_motions" | "excited_motions" => {
                let names = parse_motion_list(key, value)?;
                match key {
                    "sleeping_motions" => self.params.sleeping_motions = names,
                    "chilled_motions" => self.params.chilled_motions = names,
                    _ => self.params.excited_motions = names,
                }
            }
            other => return Err(ParamError::UnknownKey(other.into())),
        }
        Ok(())
    }

    /// Next motion name from the list for `state`, round-robin.
    fn next_motion(&mut self, state: BehaviorState) -> Option<String> {
        let (list, cursor) = match state {
            BehaviorState::Sleeping => (&self.params.sleeping_motions, 0),
            BehaviorState::Chilled => (&self.params.chilled_motions, 1),
            BehaviorState::Excited => (&self.params.excited_motions, 2),
        };
        if list.is_empty() {
            return None;
        }
        let name = list[self.cursors[cursor] % list.len()].clone();
        self.cursors[cursor] += 1;
        Some(name)
    }

    fn transition(&mut self, next: BehaviorState) {
        if next == self.state {
            return;
        }
        debug!("behavior {} -> {}", self.state, next);
        self.state = next;
        let change = StateChange { state: next };
        self.subscribers.retain(|tx| {
            !matches!(tx.try_send(change.clone()), Err(TrySendError::Disconnected(_)))
        });
    }
}

fn parse_motion_list(key: &str, value: &serde_json::Value) -> Result<Vec<String>, ParamError> {
    let array = value.as_array().ok_or_else(|| ParamError::InvalidValue {
        key: key.into(),
        reason: "expected an array of motion names".into(),
    })?;
    array
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| ParamError::InvalidValue {
                    key: key.into(),
                    reason: format!("expected a string entry, got {v}"),
                })
        })
        .collect()
}

impl Block for Behavior {
    fn name(&self) -> &str {
        "behavior"
    }

    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn update(&mut self, io: &mut BlockIo<'_>, clock: &Clock) -> Result<(), BlockError> {
        // Drain the sensor queue unconditionally so a paused machine does not
        // accumulate stale triggers.
        let triggered = io.drain_messages(Self::SENSOR_IN).count() > 0;
        if !self.active {
            return Ok(());
        }

        let now = clock.now();
        if triggered {
            self.last_trigger = now;
        }
        let playing = io.value_in(Self::PLAYING_IN) > 0.5;
        let attention_left = now - self.last_trigger < self.params.attention_span;

        let mut emit: Option<String> = None;
        match self.state {
            BehaviorState::Sleeping => {
                if triggered {
                    emit = self.next_motion(BehaviorState::Excited);
                    self.transition(BehaviorState::Excited);
                } else if !playing {
                    emit = self.next_motion(BehaviorState::Sleeping);
                }
            }
            BehaviorState::Chilled => {
                if triggered {
                    emit = self.next_motion(BehaviorState::Excited);
                    self.transition(BehaviorState::Excited);
                } else if !attention_left {
                    self.transition(BehaviorState::Sleeping);
                } else if !playing {
                    emit = self.next_motion(BehaviorState::Chilled);
                }
            }
            BehaviorState::Excited => {
                if !playing {
                    if attention_left {
                        self.transition(BehaviorState::Chilled);
                    } else {
                        self.transition(BehaviorState::Sleeping);
                    }
                }
            }
        }

        if let Some(name) = emit {
            io.send_message(Self::MOTION_OUT, json!(name));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
