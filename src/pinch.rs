//! Pinch-based click detection: two parallel state machines (index pinch =
//! left click, middle pinch = right click) guarded by hand-stability and
//! palm-orientation gates.

use std::collections::VecDeque;

use crate::types::{ClickKind, Landmark, INDEX_MCP, INDEX_TIP, MIDDLE_TIP, PINKY_MCP, THUMB_TIP, WRIST};

pub const DEFAULT_PINCH_THRESHOLD: f64 = 0.08;
pub const DEFAULT_RELEASE_THRESHOLD: f64 = 0.12;
pub const DEFAULT_COOLDOWN_FRAMES: u32 = 5;
pub const DEFAULT_CONSISTENCY_FRAMES: usize = 2;
pub const DEFAULT_STABILITY_THRESHOLD: f64 = 0.015;
pub const STABILITY_FRAMES: usize = 5;

const ORIENTATION_MEAN_Z_MAX: f64 = -0.3;
const ORIENTATION_VARIANCE_MAX: f64 = 0.1;
const CALIBRATION_SAMPLES: usize = 30;
const REFERENCE_HAND_SIZE: f64 = 0.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickState {
    Idle,
    PinchDetected,
    ClickTriggered,
    Cooldown,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PinchStats {
    pub total_updates: u64,
    pub left_clicks: u64,
    pub right_clicks: u64,
    pub false_positives: u64,
    pub stability_blocks: u64,
    pub orientation_blocks: u64,
}

/// One click kind's state machine plus its consistency buffer.
struct ClickDetector {
    state: ClickState,
    cooldown: u32,
    cooldown_frames: u32,
    buffer: VecDeque<bool>,
    consistency_frames: usize,
}

impl ClickDetector {
    fn new(cooldown_frames: u32, consistency_frames: usize) -> Self {
        Self {
            state: ClickState::Idle,
            cooldown: 0,
            cooldown_frames,
            buffer: VecDeque::with_capacity(consistency_frames),
            consistency_frames,
        }
    }

    fn push_observation(&mut self, is_pinched: bool) -> bool {
        if self.buffer.len() == self.consistency_frames {
            self.buffer.pop_front();
        }
        self.buffer.push_back(is_pinched);
        self.buffer.len() == self.consistency_frames && self.buffer.iter().all(|&b| b)
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Advance the state machine. Returns (click fired, false positive).
    fn step(&mut self, is_pinched: bool) -> (bool, bool) {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            self.state = ClickState::Cooldown;
            return (false, false);
        }

        match self.state {
            ClickState::Idle => {
                if is_pinched {
                    self.state = ClickState::PinchDetected;
                }
                (false, false)
            }
            ClickState::PinchDetected => {
                if is_pinched {
                    self.state = ClickState::ClickTriggered;
                    self.cooldown = self.cooldown_frames;
                    (true, false)
                } else {
                    self.state = ClickState::Idle;
                    (false, true)
                }
            }
            ClickState::ClickTriggered => {
                if !is_pinched {
                    self.state = ClickState::Idle;
                }
                (false, false)
            }
            ClickState::Cooldown => {
                self.state = ClickState::Idle;
                (false, false)
            }
        }
    }

    fn reset(&mut self) {
        self.state = ClickState::Idle;
        self.cooldown = 0;
        self.buffer.clear();
    }
}

pub struct PinchDetector {
    pinch_threshold: f64,
    release_threshold: f64,
    stability_threshold: f64,
    adaptive_threshold: bool,
    left: ClickDetector,
    right: ClickDetector,
    wrist_positions: VecDeque<[f64; 3]>,
    orientation_z: VecDeque<f64>,
    hand_size_samples: Vec<f64>,
    calibrated_hand_size: Option<f64>,
    stats: PinchStats,
}

impl PinchDetector {
    pub fn new(pinch_threshold: f64, stability_threshold: f64, adaptive_threshold: bool) -> Self {
        Self {
            pinch_threshold,
            release_threshold: DEFAULT_RELEASE_THRESHOLD * pinch_threshold
                / DEFAULT_PINCH_THRESHOLD,
            stability_threshold,
            adaptive_threshold,
            left: ClickDetector::new(DEFAULT_COOLDOWN_FRAMES, DEFAULT_CONSISTENCY_FRAMES),
            right: ClickDetector::new(DEFAULT_COOLDOWN_FRAMES, DEFAULT_CONSISTENCY_FRAMES),
            wrist_positions: VecDeque::with_capacity(STABILITY_FRAMES),
            orientation_z: VecDeque::with_capacity(STABILITY_FRAMES),
            hand_size_samples: Vec::new(),
            calibrated_hand_size: None,
            stats: PinchStats::default(),
        }
    }

    pub fn with_defaults() -> Self {
        // Adaptive thresholds stay off by default for consistency.
        Self::new(DEFAULT_PINCH_THRESHOLD, DEFAULT_STABILITY_THRESHOLD, false)
    }

    /// Process one frame. At most one click fires per frame; the left click
    /// wins when both detectors fire simultaneously.
    pub fn detect(&mut self, landmarks: &[Landmark]) -> Option<ClickKind> {
        self.stats.total_updates += 1;

        if self.adaptive_threshold && self.calibrated_hand_size.is_none() {
            self.calibrate(landmarks);
        }

        let stable = self.is_hand_stable(landmarks);
        let facing = self.is_palm_facing_camera(landmarks);
        if !stable || !facing {
            if !stable {
                self.stats.stability_blocks += 1;
            } else {
                self.stats.orientation_blocks += 1;
            }
            self.left.clear_buffer();
            self.right.clear_buffer();
            return None;
        }

        let index_pinched = self.fingertip_distance(landmarks, INDEX_TIP)
            .is_some_and(|d| d < self.pinch_threshold);
        let middle_pinched = self.fingertip_distance(landmarks, MIDDLE_TIP)
            .is_some_and(|d| d < self.pinch_threshold);

        let consistent_left = self.left.push_observation(index_pinched);
        let consistent_right = self.right.push_observation(middle_pinched);

        let (left_fired, left_false) = self.left.step(consistent_left);
        let (right_fired, right_false) = self.right.step(consistent_right);

        if left_false {
            self.stats.false_positives += 1;
        }
        if right_false {
            self.stats.false_positives += 1;
        }

        if left_fired {
            self.stats.left_clicks += 1;
        }
        if right_fired {
            self.stats.right_clicks += 1;
        }

        if left_fired {
            Some(ClickKind::Left)
        } else if right_fired {
            Some(ClickKind::Right)
        } else {
            None
        }
    }

    fn fingertip_distance(&self, landmarks: &[Landmark], tip: usize) -> Option<f64> {
        let thumb = landmarks.get(THUMB_TIP)?;
        let finger = landmarks.get(tip)?;
        Some(thumb.distance(finger))
    }

    /// Ring buffer of recent wrist positions; stable means low variance on
    /// every axis. Blocks clicks during face-rubbing, waving, and similar
    /// fast motion.
    fn is_hand_stable(&mut self, landmarks: &[Landmark]) -> bool {
        let Some(wrist) = landmarks.get(WRIST) else {
            return false;
        };

        if self.wrist_positions.len() == STABILITY_FRAMES {
            self.wrist_positions.pop_front();
        }
        self.wrist_positions.push_back([wrist.x, wrist.y, wrist.z]);

        if self.wrist_positions.len() < STABILITY_FRAMES {
            return false;
        }

        let max_variance = (0..3)
            .map(|axis| {
                let values: Vec<f64> =
                    self.wrist_positions.iter().map(|p| p[axis]).collect();
                variance(&values)
            })
            .fold(0.0f64, f64::max);

        max_variance < self.stability_threshold * self.stability_threshold
    }

    /// Palm normal from wrist/index-MCP/pinky-MCP; requires a consistently
    /// camera-facing palm (mean z below -0.3, low variance).
    fn is_palm_facing_camera(&mut self, landmarks: &[Landmark]) -> bool {
        let (Some(wrist), Some(index_mcp), Some(pinky_mcp)) = (
            landmarks.get(WRIST),
            landmarks.get(INDEX_MCP),
            landmarks.get(PINKY_MCP),
        ) else {
            return false;
        };

        let v1 = [
            index_mcp.x - wrist.x,
            index_mcp.y - wrist.y,
            index_mcp.z - wrist.z,
        ];
        let v2 = [
            pinky_mcp.x - wrist.x,
            pinky_mcp.y - wrist.y,
            pinky_mcp.z - wrist.z,
        ];
        let normal = [
            v1[1] * v2[2] - v1[2] * v2[1],
            v1[2] * v2[0] - v1[0] * v2[2],
            v1[0] * v2[1] - v1[1] * v2[0],
        ];
        let magnitude =
            (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
        if magnitude < 1e-3 {
            return false;
        }

        let z_component = normal[2] / magnitude;
        if self.orientation_z.len() == STABILITY_FRAMES {
            self.orientation_z.pop_front();
        }
        self.orientation_z.push_back(z_component);

        if self.orientation_z.len() < STABILITY_FRAMES {
            return false;
        }

        let values: Vec<f64> = self.orientation_z.iter().copied().collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        mean < ORIENTATION_MEAN_Z_MAX && variance(&values) < ORIENTATION_VARIANCE_MAX
    }

    /// Optional calibration: after 30 samples the median wrist-to-middle-tip
    /// distance rescales both thresholds.
    fn calibrate(&mut self, landmarks: &[Landmark]) {
        let (Some(wrist), Some(middle_tip)) =
            (landmarks.get(WRIST), landmarks.get(MIDDLE_TIP))
        else {
            return;
        };
        let dx = wrist.x - middle_tip.x;
        let dy = wrist.y - middle_tip.y;
        self.hand_size_samples.push((dx * dx + dy * dy).sqrt());

        if self.hand_size_samples.len() >= CALIBRATION_SAMPLES {
            let mut sorted = self.hand_size_samples.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = sorted[sorted.len() / 2];
            let factor = median / REFERENCE_HAND_SIZE;
            self.pinch_threshold *= factor;
            self.release_threshold *= factor;
            self.calibrated_hand_size = Some(median);
            self.hand_size_samples.clear();
            log::info!(
                "hand size calibrated to {median:.3}, pinch threshold now {:.3}",
                self.pinch_threshold
            );
        }
    }

    pub fn states(&self) -> (ClickState, ClickState) {
        (self.left.state, self.right.state)
    }

    pub fn stats(&self) -> PinchStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.wrist_positions.clear();
        self.orientation_z.clear();
        self.stats = PinchStats::default();
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{canonical_hand, pinched_hand};

    fn warm_up(detector: &mut PinchDetector, frames: usize) {
        let hand = canonical_hand([0.5, 0.5]);
        for _ in 0..frames {
            detector.detect(&hand);
        }
    }

    #[test]
    fn click_fires_after_two_consistent_pinched_frames() {
        let mut detector = PinchDetector::with_defaults();
        warm_up(&mut detector, STABILITY_FRAMES);

        let pinched = pinched_hand([0.5, 0.5], ClickKind::Left);
        assert_eq!(detector.detect(&pinched), None); // buffer filling
        assert_eq!(detector.detect(&pinched), None); // Idle -> PinchDetected
        assert_eq!(detector.detect(&pinched), Some(ClickKind::Left));
        assert_eq!(detector.stats().left_clicks, 1);
    }

    #[test]
    fn middle_pinch_fires_right_click() {
        let mut detector = PinchDetector::with_defaults();
        warm_up(&mut detector, STABILITY_FRAMES);

        let pinched = pinched_hand([0.5, 0.5], ClickKind::Right);
        detector.detect(&pinched);
        detector.detect(&pinched);
        assert_eq!(detector.detect(&pinched), Some(ClickKind::Right));
    }

    #[test]
    fn cooldown_blocks_immediate_refire() {
        let mut detector = PinchDetector::with_defaults();
        warm_up(&mut detector, STABILITY_FRAMES);

        let pinched = pinched_hand([0.5, 0.5], ClickKind::Left);
        detector.detect(&pinched);
        detector.detect(&pinched);
        assert_eq!(detector.detect(&pinched), Some(ClickKind::Left));

        // Cooldown of 5 frames: nothing can fire while it drains.
        for _ in 0..DEFAULT_COOLDOWN_FRAMES {
            assert_eq!(detector.detect(&pinched), None);
        }
        let (left_state, _) = detector.states();
        assert_eq!(left_state, ClickState::Cooldown);
    }

    #[test]
    fn unstable_wrist_blocks_clicks() {
        let mut detector = PinchDetector::with_defaults();
        // Wrist jumps around with a pinched hand: the stability gate must
        // keep both detectors silent and the false-positive count at zero.
        for i in 0..20 {
            let offset = if i % 2 == 0 { 0.0 } else { 0.2 };
            let pinched = pinched_hand([0.3 + offset, 0.5], ClickKind::Left);
            assert_eq!(detector.detect(&pinched), None);
        }
        assert!(detector.stats().stability_blocks > 0);
        assert_eq!(detector.stats().false_positives, 0);
        assert_eq!(detector.stats().left_clicks, 0);
    }

    #[test]
    fn palm_away_from_camera_blocks_clicks() {
        let mut detector = PinchDetector::with_defaults();
        let mut hand = pinched_hand([0.5, 0.5], ClickKind::Left);
        // Swap index and pinky MCPs: the palm normal flips away from the
        // camera while the wrist stays still.
        hand.swap(INDEX_MCP, PINKY_MCP);
        for _ in 0..20 {
            assert_eq!(detector.detect(&hand), None);
        }
        assert!(detector.stats().orientation_blocks > 0);
    }

    #[test]
    fn aborted_pinch_counts_a_false_positive() {
        let mut detector = PinchDetector::with_defaults();
        warm_up(&mut detector, STABILITY_FRAMES);

        let pinched = pinched_hand([0.5, 0.5], ClickKind::Left);
        let open = canonical_hand([0.5, 0.5]);
        detector.detect(&pinched); // buffer [t]
        detector.detect(&pinched); // buffer [t, t] -> PinchDetected
        detector.detect(&open); // consistency broken -> back to Idle
        detector.detect(&open);
        assert_eq!(detector.stats().false_positives, 1);
        assert_eq!(detector.stats().left_clicks, 0);
    }

    #[test]
    fn simultaneous_pinches_prefer_left() {
        let mut detector = PinchDetector::with_defaults();
        warm_up(&mut detector, STABILITY_FRAMES);

        let mut both = pinched_hand([0.5, 0.5], ClickKind::Left);
        let right = pinched_hand([0.5, 0.5], ClickKind::Right);
        both[MIDDLE_TIP] = right[MIDDLE_TIP];

        detector.detect(&both);
        detector.detect(&both);
        assert_eq!(detector.detect(&both), Some(ClickKind::Left));
        assert_eq!(detector.stats().right_clicks, 1);
        assert_eq!(detector.stats().left_clicks, 1);
    }
}
