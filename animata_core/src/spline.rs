//! Piecewise-polynomial motion trajectories.
//!
//! A [`Spline`] is a multi-channel piecewise polynomial over an ascending
//! knot vector: segment `i` spans `knots[i]..knots[i+1]` and evaluates its
//! per-channel coefficient row (highest power first) at the local offset.
//! This mirrors the JSON motion format the trajectory store produces, so a
//! stored motion deserializes straight into a playable value.
//!
//! The player samples with the time clamped into the knot span; trajectories
//! never extrapolate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplineError {
    #[error("knot vector needs at least 2 entries, got {0}")]
    TooFewKnots(usize),

    #[error("knot vector must be strictly ascending at index {0}")]
    KnotsNotAscending(usize),

    #[error("expected {expected} coefficient rows (one per segment), got {got}")]
    SegmentCountMismatch { expected: usize, got: usize },

    #[error("segment {segment} has {got} channels, expected {expected}")]
    ChannelCountMismatch {
        segment: usize,
        expected: usize,
        got: usize,
    },

    #[error("segment {segment} channel {channel} has no coefficients")]
    EmptyCoefficients { segment: usize, channel: usize },
}

/// Multi-channel piecewise polynomial trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spline {
    knots: Vec<f64>,
    /// `coefficients[segment][channel]` = polynomial coefficients,
    /// highest power first.
    coefficients: Vec<Vec<Vec<f64>>>,
}

impl Spline {
    pub fn new(knots: Vec<f64>, coefficients: Vec<Vec<Vec<f64>>>) -> Result<Self, SplineError> {
        if knots.len() < 2 {
            return Err(SplineError::TooFewKnots(knots.len()));
        }
        for i in 1..knots.len() {
            if knots[i] <= knots[i - 1] {
                return Err(SplineError::KnotsNotAscending(i));
            }
        }
        let segments = knots.len() - 1;
        if coefficients.len() != segments {
            return Err(SplineError::SegmentCountMismatch {
                expected: segments,
                got: coefficients.len(),
            });
        }
        let channels = coefficients[0].len();
        for (s, row) in coefficients.iter().enumerate() {
            if row.len() != channels || channels == 0 {
                return Err(SplineError::ChannelCountMismatch {
                    segment: s,
                    expected: channels.max(1),
                    got: row.len(),
                });
            }
            for (c, coeffs) in row.iter().enumerate() {
                if coeffs.is_empty() {
                    return Err(SplineError::EmptyCoefficients {
                        segment: s,
                        channel: c,
                    });
                }
            }
        }
        Ok(Self {
            knots,
            coefficients,
        })
    }

    /// Single-channel trajectory holding `value` for `duration` seconds.
    pub fn constant(value: f64, duration: f64) -> Self {
        Self {
            knots: vec![0.0, duration],
            coefficients: vec![vec![vec![value]]],
        }
    }

    /// Single-channel linear ramp from `from` to `to` over `duration`.
    pub fn ramp(from: f64, to: f64, duration: f64) -> Self {
        Self {
            knots: vec![0.0, duration],
            coefficients: vec![vec![vec![(to - from) / duration, from]]],
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.coefficients[0].len()
    }

    #[inline]
    pub fn start(&self) -> f64 {
        self.knots[0]
    }

    #[inline]
    pub fn end(&self) -> f64 {
        *self.knots.last().unwrap_or(&0.0)
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end() - self.start()
    }

    /// Sample all channels at time `t` into `out`.
    ///
    /// `t` is clamped into the knot span. `out` must hold `channels()`
    /// entries.
    pub fn sample_into(&self, t: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.channels());
        let t = t.clamp(self.start(), self.end());
        // Segment index: last knot <= t, capped to the final segment.
        let seg = self
            .knots
            .partition_point(|&k| k <= t)
            .saturating_sub(1)
            .min(self.coefficients.len() - 1);
        let local = t - self.knots[seg];
        for (channel, coeffs) in self.coefficients[seg].iter().enumerate() {
            // Horner evaluation, highest power first.
            let mut acc = 0.0;
            for &c in coeffs {
                acc = acc * local + c;
            }
            out[channel] = acc;
        }
    }

    /// Allocating convenience wrapper around [`Self::sample_into`].
    pub fn sample(&self, t: f64) -> Vec<f64> {
        let mut out = vec![0.0; self.channels()];
        self.sample_into(t, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_samples_flat() {
        let s = Spline::constant(1.5, 4.0);
        assert_eq!(s.duration(), 4.0);
        assert_eq!(s.channels(), 1);
        assert_eq!(s.sample(0.0), vec![1.5]);
        assert_eq!(s.sample(2.0), vec![1.5]);
        assert_eq!(s.sample(4.0), vec![1.5]);
    }

    #[test]
    fn ramp_interpolates_linearly() {
        let s = Spline::ramp(0.0, 10.0, 2.0);
        assert_eq!(s.sample(0.0), vec![0.0]);
        assert_eq!(s.sample(1.0), vec![5.0]);
        assert_eq!(s.sample(2.0), vec![10.0]);
    }

    #[test]
    fn sampling_clamps_outside_span() {
        let s = Spline::ramp(0.0, 10.0, 2.0);
        assert_eq!(s.sample(-1.0), vec![0.0]);
        assert_eq!(s.sample(99.0), vec![10.0]);
    }

    #[test]
    fn multi_segment_picks_correct_piece() {
        // Two linear segments: up 0->1 over [0,1], down 1->0 over [1,2].
        let s = Spline::new(
            vec![0.0, 1.0, 2.0],
            vec![vec![vec![1.0, 0.0]], vec![vec![-1.0, 1.0]]],
        )
        .unwrap();
        assert_eq!(s.sample(0.5), vec![0.5]);
        assert_eq!(s.sample(1.0), vec![1.0]);
        assert_eq!(s.sample(1.5), vec![0.5]);
        assert_eq!(s.sample(2.0), vec![0.0]);
    }

    #[test]
    fn cubic_segment_evaluates_horner() {
        // p(x) = x^3 over [0, 2].
        let s = Spline::new(vec![0.0, 2.0], vec![vec![vec![1.0, 0.0, 0.0, 0.0]]]).unwrap();
        assert_eq!(s.sample(0.0), vec![0.0]);
        assert_eq!(s.sample(1.0), vec![1.0]);
        assert_eq!(s.sample(2.0), vec![8.0]);
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        assert!(matches!(
            Spline::new(vec![0.0], vec![]),
            Err(SplineError::TooFewKnots(1))
        ));
        assert!(matches!(
            Spline::new(vec![0.0, 0.0], vec![vec![vec![1.0]]]),
            Err(SplineError::KnotsNotAscending(1))
        ));
        assert!(matches!(
            Spline::new(vec![0.0, 1.0, 2.0], vec![vec![vec![1.0]]]),
            Err(SplineError::SegmentCountMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            Spline::new(
                vec![0.0, 1.0, 2.0],
                vec![vec![vec![1.0]], vec![vec![1.0], vec![2.0]]]
            ),
            Err(SplineError::ChannelCountMismatch { segment: 1, .. })
        ));
    }

    #[test]
    fn json_roundtrip_preserves_samples() {
        let s = Spline::new(
            vec![0.0, 1.0, 3.0],
            vec![
                vec![vec![0.5, 0.0], vec![1.0]],
                vec![vec![0.0, 0.5], vec![2.0]],
            ],
        )
        .unwrap();
        let text = serde_json::to_string(&s).unwrap();
        let back: Spline = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.sample(0.5), s.sample(0.5));
    }
}
