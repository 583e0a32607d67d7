//! External command surface.
//!
//! The control surface reaches exactly five entry points: trajectory
//! play/stop/live-preview on a motion player, and play/pause/parameter
//! updates on the behavior machines. Commands are validated before any state
//! changes; a rejected command leaves the runtime untouched and the error
//! goes back to the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use animata_core::behavior::ParamError;
use animata_core::player::PlayerError;
use animata_core::spline::Spline;

/// A command from the control surface.
///
/// Player and behavior indices address the runtime's discovery order (the
/// execution order restricted to the respective block type).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    Play {
        player: usize,
        spline: Spline,
        #[serde(default)]
        looping: bool,
        #[serde(default)]
        offset: f64,
    },
    Stop {
        player: usize,
    },
    LivePreview {
        player: usize,
        values: Vec<f64>,
    },
    BehaviorPlay,
    BehaviorPause,
    SetParam {
        behavior: usize,
        key: String,
        value: serde_json::Value,
    },
}

/// Successful command acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommandReply {
    Ack,
    /// Play commands report the computed playback start time.
    Started { start: f64 },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no motion player with index {0}")]
    UnknownPlayer(usize),

    #[error("no behavior with index {0}")]
    UnknownBehavior(usize),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error(transparent)]
    Param(#[from] ParamError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_deserialize_from_surface_json() {
        let cmd: Command = serde_json::from_value(json!({
            "type": "play",
            "player": 0,
            "spline": {
                "knots": [0.0, 1.0],
                "coefficients": [[[1.0, 0.0]]],
            },
            "looping": true,
        }))
        .unwrap();
        match cmd {
            Command::Play {
                player,
                looping,
                offset,
                ..
            } => {
                assert_eq!(player, 0);
                assert!(looping);
                assert_eq!(offset, 0.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn malformed_command_is_a_parse_error() {
        let result: Result<Command, _> = serde_json::from_value(json!({
            "type": "play",
            "player": "not-an-index",
        }));
        assert!(result.is_err());
    }
}
