//! Gesture preprocessing: outlier removal, per-frame Procrustes alignment,
//! trajectory encoding, and average-scale bone normalization.
//!
//! Per-frame Procrustes makes each frame translation/scale/orientation
//! invariant, which on its own would erase motion direction: a left swipe
//! and its mirrored right swipe would normalize to the same shapes. The raw
//! wrist trajectory is therefore encoded into two slack z-channels before
//! the features are flattened, keeping direction discrimination alive
//! without growing the 63-value feature dimensionality.

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::filter::LandmarkSmoother;
use crate::resample::resample_to_target;
use crate::types::{Frame, FEATURES_PER_FRAME, INDEX_MCP, LANDMARK_COUNT, MIDDLE_MCP, PINKY_MCP, WRIST};

pub const MIN_FRAMES: usize = 5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const JUMP_FACTOR: f64 = 5.0;
const SCALE_EPSILON: f64 = 1e-6;
const TRAJECTORY_GAIN: f64 = 0.02;
const TRAJECTORY_CAP: f64 = 0.05;

type Vec3 = [f64; 3];
type HandFrame = [Vec3; LANDMARK_COUNT];

pub struct Preprocessor {
    confidence_threshold: f64,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Preprocessor {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Run the full pipeline over a frame sequence and return the flattened
    /// `(frames, 63)` feature array.
    pub fn preprocess(&self, frames: &[Frame]) -> Result<Array2<f64>> {
        if frames.len() < MIN_FRAMES {
            return Err(Error::Input(format!(
                "insufficient frames: {} (minimum {MIN_FRAMES})",
                frames.len()
            )));
        }

        let (hands, confidences) = frames_to_arrays(frames);
        if hands.len() < MIN_FRAMES {
            return Err(Error::Preprocessing(format!(
                "only {} frames carried 21 landmarks",
                hands.len()
            )));
        }

        let (hands, removed) = remove_outliers(hands, confidences, self.confidence_threshold);
        if removed > 0 {
            log::debug!("removed {removed} outlier frames");
        }
        if hands.len() < MIN_FRAMES {
            return Err(Error::Preprocessing(format!(
                "too few frames after outlier removal: {}",
                hands.len()
            )));
        }

        // Directions come from the raw wrist track, before Procrustes has a
        // chance to erase them.
        let directions = trajectory_directions(&hands);

        let mut normalized: Vec<HandFrame> =
            hands.iter().map(procrustes_normalize_frame).collect();
        encode_trajectory(&mut normalized, &directions);
        bone_normalize(&mut normalized);

        Ok(flatten(&normalized))
    }
}

/// Matching discipline: resample, smooth with the session's live filter
/// state intact, then normalize.
pub fn features_for_matching(
    frames: &[Frame],
    smoother: &mut LandmarkSmoother,
    preprocessor: &Preprocessor,
) -> Result<Array2<f64>> {
    let mut resampled = resample_to_target(frames)?;
    smoother.smooth_sequence(&mut resampled);
    preprocessor.preprocess(&resampled)
}

/// Recording discipline: identical pipeline, but the filters are reset first
/// so stored templates never inherit live tracking state.
pub fn features_for_recording(
    frames: &[Frame],
    smoother: &mut LandmarkSmoother,
    preprocessor: &Preprocessor,
) -> Result<Array2<f64>> {
    smoother.reset();
    features_for_matching(frames, smoother, preprocessor)
}

fn frames_to_arrays(frames: &[Frame]) -> (Vec<HandFrame>, Vec<f64>) {
    let mut hands = Vec::with_capacity(frames.len());
    let mut confidences = Vec::with_capacity(frames.len());

    for frame in frames {
        if frame.landmarks.len() != LANDMARK_COUNT {
            log::warn!(
                "frame has {} landmarks (expected {LANDMARK_COUNT}), skipping",
                frame.landmarks.len()
            );
            continue;
        }
        let mut hand = [[0.0; 3]; LANDMARK_COUNT];
        for (i, lm) in frame.landmarks.iter().enumerate() {
            hand[i] = [lm.x, lm.y, lm.z];
        }
        hands.push(hand);
        confidences.push(if frame.confidence.is_finite() {
            frame.confidence
        } else {
            1.0
        });
    }

    (hands, confidences)
}

/// Drop low-confidence frames and sudden jumps (mean landmark movement more
/// than 5x the median pair movement).
fn remove_outliers(
    hands: Vec<HandFrame>,
    confidences: Vec<f64>,
    confidence_threshold: f64,
) -> (Vec<HandFrame>, usize) {
    let n = hands.len();
    let mut keep = vec![true; n];

    for (i, &confidence) in confidences.iter().enumerate() {
        if confidence < confidence_threshold {
            keep[i] = false;
        }
    }

    if n > 1 {
        let movements: Vec<f64> = hands
            .windows(2)
            .map(|pair| mean_landmark_movement(&pair[0], &pair[1]))
            .collect();
        let median = median(&movements);
        if median > 0.0 {
            let threshold = JUMP_FACTOR * median;
            for (i, &movement) in movements.iter().enumerate() {
                if movement > threshold {
                    keep[i + 1] = false;
                }
            }
        }
    }

    let kept: Vec<HandFrame> = hands
        .into_iter()
        .zip(&keep)
        .filter_map(|(hand, &k)| k.then_some(hand))
        .collect();
    let removed = n - kept.len();
    (kept, removed)
}

fn mean_landmark_movement(a: &HandFrame, b: &HandFrame) -> f64 {
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(pa, pb)| norm(sub(*pb, *pa)))
        .sum();
    total / LANDMARK_COUNT as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Unit wrist-to-wrist deltas from the raw frames, one per frame pair.
fn trajectory_directions(hands: &[HandFrame]) -> Vec<Vec3> {
    hands
        .windows(2)
        .map(|pair| {
            let delta = sub(pair[1][WRIST], pair[0][WRIST]);
            let len = norm(delta);
            if len > 0.0 {
                scale(delta, 1.0 / len)
            } else {
                delta
            }
        })
        .collect()
}

/// Translate to the wrist, scale by palm length, rotate into the palm basis.
fn procrustes_normalize_frame(hand: &HandFrame) -> HandFrame {
    let wrist = hand[WRIST];
    let mut centered = [[0.0; 3]; LANDMARK_COUNT];
    for (i, point) in hand.iter().enumerate() {
        centered[i] = sub(*point, wrist);
    }

    let palm_size = norm(centered[MIDDLE_MCP]);
    let scaled = if palm_size > SCALE_EPSILON {
        let mut out = centered;
        for point in &mut out {
            *point = scale(*point, 1.0 / palm_size);
        }
        out
    } else {
        centered
    };

    let primary = scaled[MIDDLE_MCP];
    let secondary = scaled[INDEX_MCP];

    let mut z_axis = cross(primary, secondary);
    let z_len = norm(z_axis);
    if z_len > SCALE_EPSILON {
        z_axis = scale(z_axis, 1.0 / z_len);
    } else {
        z_axis = [0.0, 0.0, 1.0];
    }

    let x_axis = scale(primary, 1.0 / (norm(primary) + SCALE_EPSILON));
    let y_axis = cross(z_axis, x_axis);

    let mut rotated = [[0.0; 3]; LANDMARK_COUNT];
    for (i, point) in scaled.iter().enumerate() {
        rotated[i] = [dot(*point, x_axis), dot(*point, y_axis), dot(*point, z_axis)];
    }
    rotated
}

/// Write direction markers into the slack z-channels: lateral direction into
/// the wrist z, vertical direction into the middle-MCP z.
fn encode_trajectory(normalized: &mut [HandFrame], directions: &[Vec3]) {
    for (i, direction) in directions.iter().enumerate() {
        if i >= normalized.len() {
            break;
        }
        let weight = (norm(*direction) * TRAJECTORY_GAIN).min(TRAJECTORY_CAP);
        normalized[i][WRIST][2] += direction[0] * weight;
        normalized[i][MIDDLE_MCP][2] += direction[1] * weight;
    }
}

/// Divide every frame by one shared reference scale so inter-frame depth
/// changes survive. Per-frame scaling would flatten them.
fn bone_normalize(hands: &mut [HandFrame]) {
    if hands.is_empty() {
        return;
    }

    let mut total = 0.0;
    for hand in hands.iter() {
        let palm_width = norm(sub(hand[PINKY_MCP], hand[INDEX_MCP]));
        let palm_height = norm(sub(hand[MIDDLE_MCP], hand[WRIST]));
        total += (palm_width * palm_width + palm_height * palm_height).sqrt();
    }
    let reference_scale = total / hands.len() as f64;

    if reference_scale > SCALE_EPSILON {
        for hand in hands.iter_mut() {
            for point in hand.iter_mut() {
                *point = scale(*point, 1.0 / reference_scale);
            }
        }
    }
}

fn flatten(hands: &[HandFrame]) -> Array2<f64> {
    let mut flat = Vec::with_capacity(hands.len() * FEATURES_PER_FRAME);
    for hand in hands {
        for point in hand {
            flat.extend_from_slice(point);
        }
    }
    Array2::from_shape_vec((hands.len(), FEATURES_PER_FRAME), flat)
        .expect("frame count times 63 matches the flattened length")
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: Vec3, s: f64) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: Vec3) -> f64 {
    dot(v, v).sqrt()
}
