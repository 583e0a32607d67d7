//! Trajectory playback block.
//!
//! A [`MotionPlayer`] owns at most one active [`Spline`] and samples it
//! against the cycle clock: `position = clock.now() - start`. Past the end of
//! the spline the position wraps modulo the duration when looping, otherwise
//! the final sample is emitted once and playback clears.
//!
//! `live_preview` short-circuits exactly one cycle's output without touching
//! playback state — the control surface uses it to scrub outputs by hand
//! while a trajectory stays loaded.

use std::any::Any;

use thiserror::Error;
use tracing::debug;

use crate::block::{Block, BlockError, BlockIo};
use crate::clock::Clock;
use crate::port::PortSpec;
use crate::spline::Spline;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("trajectory has {got} channels, player drives {expected}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("live preview carries {got} values, player drives {expected}")]
    PreviewLengthMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone)]
struct Playback {
    spline: Spline,
    start: f64,
    looping: bool,
}

/// Plays splines onto one value output per channel.
///
/// The final output port (`playing`) carries 1.0 while a spline is active,
/// feeding behavior logic that waits for playback to finish.
pub struct MotionPlayer {
    channels: usize,
    playback: Option<Playback>,
    preview: Option<Vec<f64>>,
    scratch: Vec<f64>,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl MotionPlayer {
    /// Index of the `playing` flag output (after the channel outputs).
    pub fn playing_port(&self) -> usize {
        self.channels
    }

    pub fn new(channels: usize) -> Self {
        let mut outputs: Vec<PortSpec> = (0..channels)
            .map(|i| PortSpec::value(format!("out{i}")))
            .collect();
        outputs.push(PortSpec::value("playing"));
        Self {
            channels,
            playback: None,
            preview: None,
            scratch: vec![0.0; channels],
            inputs: vec![],
            outputs,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Start playing `spline`. `offset` shifts the playback position forward,
    /// i.e. the recorded start is `now - offset`. Returns the start time.
    pub fn play(
        &mut self,
        spline: Spline,
        looping: bool,
        offset: f64,
        now: f64,
    ) -> Result<f64, PlayerError> {
        if spline.channels() != self.channels {
            return Err(PlayerError::ChannelMismatch {
                expected: self.channels,
                got: spline.channels(),
            });
        }
        let start = now - offset;
        debug!(
            "playing trajectory: {} channels, {:.3}s, looping={looping}, start={start:.3}",
            spline.channels(),
            spline.duration()
        );
        self.playback = Some(Playback {
            spline,
            start,
            looping,
        });
        Ok(start)
    }

    /// Clear the active spline immediately. Outputs hold their last samples.
    pub fn stop(&mut self) {
        self.playback = None;
    }

    /// Override the next emitted cycle with raw values, bypassing spline
    /// evaluation. Playback state is untouched; re-invoke every cycle to keep
    /// overriding.
    pub fn live_preview(&mut self, values: Vec<f64>) -> Result<(), PlayerError> {
        if values.len() != self.channels {
            return Err(PlayerError::PreviewLengthMismatch {
                expected: self.channels,
                got: values.len(),
            });
        }
        self.preview = Some(values);
        Ok(())
    }
}

impl Block for MotionPlayer {
    fn name(&self) -> &str {
        "motion_player"
    }

    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn update(&mut self, io: &mut BlockIo<'_>, clock: &Clock) -> Result<(), BlockError> {
        let playing_port = self.channels;

        if let Some(values) = self.preview.take() {
            for (i, v) in values.iter().enumerate() {
                io.set_value(i, *v);
            }
            io.set_value(playing_port, if self.playback.is_some() { 1.0 } else { 0.0 });
            return Ok(());
        }

        let Some(pb) = &self.playback else {
            io.set_value(playing_port, 0.0);
            return Ok(());
        };

        let duration = pb.spline.duration();
        let mut position = clock.now() - pb.start;
        let mut finished = false;

        if position >= duration {
            if pb.looping && duration > 0.0 {
                position %= duration;
            } else {
                position = duration;
                finished = true;
            }
        }

        pb.spline
            .sample_into(pb.spline.start() + position, &mut self.scratch);
        for (i, v) in self.scratch.iter().enumerate() {
            io.set_value(i, *v);
        }

        if finished {
            // Final sample emitted exactly once; playback clears with it.
            self.playback = None;
        }
        io.set_value(playing_port, if self.playback.is_some() { 1.0 } else { 0.0 });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickPolicy;
    use crate::exec::Executor;
    use crate::graph::Network;
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn rig() -> (Network, crate::block::BlockId, Executor, Clock) {
        let mut net = Network::new();
        let id = net.add_block(MotionPlayer::new(1));
        let order = net.build(&[id]).unwrap();
        let exec = Executor::new(order);
        let clock = Clock::new(INTERVAL, TickPolicy::Nominal);
        (net, id, exec, clock)
    }

    fn output(net: &Network, id: crate::block::BlockId) -> (f64, f64) {
        let snap = net.capture_value_outputs(&[id]);
        (snap[0], snap[1])
    }

    #[test]
    fn play_returns_offset_start() {
        let mut player = MotionPlayer::new(1);
        let start = player.play(Spline::ramp(0.0, 1.0, 2.0), false, 0.5, 10.0).unwrap();
        assert_eq!(start, 9.5);
        assert!(player.is_playing());
    }

    #[test]
    fn play_rejects_channel_mismatch() {
        let mut player = MotionPlayer::new(2);
        let err = player
            .play(Spline::ramp(0.0, 1.0, 2.0), false, 0.0, 0.0)
            .unwrap_err();
        assert!(matches!(
            err,
            PlayerError::ChannelMismatch { expected: 2, got: 1 }
        ));
        assert!(!player.is_playing());
    }

    #[test]
    fn one_shot_emits_final_sample_then_stops() {
        let (mut net, id, mut exec, mut clock) = rig();
        // Ramp 0 -> 10 over 1s; cycle interval 0.1s.
        net.downcast_mut::<MotionPlayer>(id)
            .unwrap()
            .play(Spline::ramp(0.0, 10.0, 1.0), false, 0.0, clock.now())
            .unwrap();

        // Run past the end of the trajectory.
        for _ in 0..12 {
            exec.run_cycle(&mut net, &clock);
            clock.advance(INTERVAL);
        }
        let (value, playing) = output(&net, id);
        assert_eq!(value, 10.0);
        assert_eq!(playing, 0.0);
        assert!(!net.downcast_ref::<MotionPlayer>(id).unwrap().is_playing());
    }

    #[test]
    fn looping_wraps_modulo_duration() {
        let (mut net, id, mut exec, mut clock) = rig();
        // Ramp over 1.0s, sampled at t = 1.5 -> same as t = 0.5.
        net.downcast_mut::<MotionPlayer>(id)
            .unwrap()
            .play(Spline::ramp(0.0, 10.0, 1.0), true, 0.0, clock.now())
            .unwrap();

        // Advance to t = 1.5 (15 cycles of 0.1s), then run one cycle.
        for _ in 0..15 {
            clock.advance(INTERVAL);
        }
        exec.run_cycle(&mut net, &clock);
        let (value, playing) = output(&net, id);
        assert!((value - 5.0).abs() < 1e-9);
        assert_eq!(playing, 1.0);
    }

    #[test]
    fn stop_clears_immediately() {
        let (mut net, id, mut exec, clock) = rig();
        let player = net.downcast_mut::<MotionPlayer>(id).unwrap();
        player
            .play(Spline::constant(3.0, 1.0), false, 0.0, clock.now())
            .unwrap();
        player.stop();
        assert!(!player.is_playing());
        exec.run_cycle(&mut net, &clock);
        let (_, playing) = output(&net, id);
        assert_eq!(playing, 0.0);
    }

    #[test]
    fn live_preview_overrides_one_cycle_only() {
        let (mut net, id, mut exec, mut clock) = rig();
        net.downcast_mut::<MotionPlayer>(id)
            .unwrap()
            .play(Spline::constant(3.0, 10.0), false, 0.0, clock.now())
            .unwrap();

        net.downcast_mut::<MotionPlayer>(id)
            .unwrap()
            .live_preview(vec![-7.0])
            .unwrap();
        exec.run_cycle(&mut net, &clock);
        clock.advance(INTERVAL);
        let (value, playing) = output(&net, id);
        assert_eq!(value, -7.0);
        // Playback state untouched by the override.
        assert_eq!(playing, 1.0);

        exec.run_cycle(&mut net, &clock);
        let (value, _) = output(&net, id);
        assert_eq!(value, 3.0);
    }

    #[test]
    fn live_preview_rejects_wrong_length() {
        let mut player = MotionPlayer::new(2);
        assert!(matches!(
            player.live_preview(vec![1.0]),
            Err(PlayerError::PreviewLengthMismatch { expected: 2, got: 1 })
        ));
    }
}
