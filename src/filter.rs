//! One-Euro filtering for landmark streams.
//!
//! The filter raises its cutoff with signal speed, trading smoothing for
//! responsiveness. Applied independently to 63 scalars (21 landmarks x 3
//! coordinates) by [`LandmarkSmoother`].

use std::f64::consts::PI;

use crate::types::{Frame, LANDMARK_COUNT};

pub const DEFAULT_MIN_CUTOFF: f64 = 1.0;
pub const DEFAULT_BETA: f64 = 0.007;
pub const DEFAULT_D_CUTOFF: f64 = 1.0;

#[derive(Clone, Copy, Debug)]
struct FilterState {
    x_prev: f64,
    dx_prev: f64,
    t_prev: f64,
}

#[derive(Clone, Debug)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    state: Option<FilterState>,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            state: None,
        }
    }

    /// Filter one sample at time `t` (seconds). The first sample passes
    /// through unchanged; a non-positive time step returns the previous
    /// output.
    pub fn filter(&mut self, x: f64, t: f64) -> f64 {
        let Some(state) = self.state else {
            self.state = Some(FilterState {
                x_prev: x,
                dx_prev: 0.0,
                t_prev: t,
            });
            return x;
        };

        let dt = t - state.t_prev;
        if dt <= 0.0 {
            return state.x_prev;
        }

        let dx = (x - state.x_prev) / dt;
        let alpha_d = smoothing_factor(dt, self.d_cutoff);
        let dx_smooth = alpha_d * dx + (1.0 - alpha_d) * state.dx_prev;

        let cutoff = self.min_cutoff + self.beta * dx_smooth.abs();
        let alpha = smoothing_factor(dt, cutoff);
        let x_smooth = alpha * x + (1.0 - alpha) * state.x_prev;

        self.state = Some(FilterState {
            x_prev: x_smooth,
            dx_prev: dx_smooth,
            t_prev: t,
        });

        x_smooth
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

fn smoothing_factor(dt: f64, cutoff: f64) -> f64 {
    let tau = 1.0 / (2.0 * PI * cutoff);
    1.0 / (1.0 + tau / dt)
}

/// 63 One-Euro filters covering a full hand.
///
/// Two disciplines exist: stateful smoothing for live matching (keep state
/// across sequences) and stateless smoothing for recording (call [`reset`]
/// before the sequence). The owner decides which applies.
///
/// [`reset`]: LandmarkSmoother::reset
pub struct LandmarkSmoother {
    filters: Vec<OneEuroFilter>,
}

impl LandmarkSmoother {
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            filters: (0..LANDMARK_COUNT * 3)
                .map(|_| OneEuroFilter::new(min_cutoff, beta, d_cutoff))
                .collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MIN_CUTOFF, DEFAULT_BETA, DEFAULT_D_CUTOFF)
    }

    /// Smooth one frame in place. `t` is seconds relative to whatever epoch
    /// the caller uses consistently.
    pub fn smooth_frame(&mut self, frame: &mut Frame, t: f64) {
        if frame.landmarks.len() != LANDMARK_COUNT {
            return;
        }
        for (i, lm) in frame.landmarks.iter_mut().enumerate() {
            lm.x = self.filters[i * 3].filter(lm.x, t);
            lm.y = self.filters[i * 3 + 1].filter(lm.y, t);
            lm.z = self.filters[i * 3 + 2].filter(lm.z, t);
        }
    }

    /// Smooth a whole sequence in place, timestamps rebased to the first
    /// frame. Frames without 21 landmarks are left untouched.
    pub fn smooth_sequence(&mut self, frames: &mut [Frame]) {
        let Some(first) = frames.first() else {
            return;
        };
        let t0 = first.timestamp_ms;
        for i in 0..frames.len() {
            let t = (frames[i].timestamp_ms - t0) as f64 / 1000.0;
            self.smooth_frame(&mut frames[i], t);
        }
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Handedness, Landmark};

    #[test]
    fn first_sample_passes_through() {
        let mut f = OneEuroFilter::new(1.0, 0.007, 1.0);
        assert_eq!(f.filter(0.42, 0.0), 0.42);
    }

    #[test]
    fn constant_signal_converges_within_two_samples() {
        let mut f = OneEuroFilter::new(1.0, 0.007, 1.0);
        let first = f.filter(0.5, 0.0);
        let second = f.filter(0.5, 1.0 / 30.0);
        assert_eq!(first, 0.5);
        assert!((second - 0.5).abs() < 1e-12);
    }

    #[test]
    fn non_positive_dt_returns_previous_output() {
        let mut f = OneEuroFilter::new(1.0, 0.007, 1.0);
        f.filter(0.1, 0.0);
        let out = f.filter(0.9, 0.033);
        assert_eq!(f.filter(100.0, 0.033), out);
        assert_eq!(f.filter(100.0, 0.01), out);
    }

    #[test]
    fn reset_forgets_state() {
        let mut f = OneEuroFilter::new(1.0, 0.007, 1.0);
        f.filter(0.1, 0.0);
        f.filter(0.2, 0.033);
        f.reset();
        assert_eq!(f.filter(0.7, 0.066), 0.7);
    }

    #[test]
    fn smoother_reduces_jitter_on_noisy_signal() {
        let mut smoother = LandmarkSmoother::with_defaults();
        let mut frames: Vec<Frame> = (0..30)
            .map(|i| Frame {
                timestamp_ms: i * 33,
                landmarks: (0..LANDMARK_COUNT)
                    .map(|_| {
                        let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
                        Landmark::new(0.5 + jitter, 0.5, 0.0)
                    })
                    .collect(),
                handedness: Handedness::Right,
                confidence: 1.0,
            })
            .collect();

        smoother.smooth_sequence(&mut frames);

        let raw_span = 0.02;
        let smoothed_span = frames[20..]
            .iter()
            .map(|f| f.landmarks[0].x)
            .fold((f64::MAX, f64::MIN), |acc, x| (acc.0.min(x), acc.1.max(x)));
        assert!(smoothed_span.1 - smoothed_span.0 < raw_span);
    }
}
