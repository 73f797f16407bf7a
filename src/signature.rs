//! Cheap per-gesture signatures used for indexing and early rejection,
//! never for final similarity. Deterministic so the matcher and indexer
//! always agree.

use crate::error::{Error, Result};
use crate::types::{Frame, Handedness, WRIST};

const FRAME_DT: f64 = 1.0 / 30.0;

#[derive(Clone, Debug, PartialEq)]
pub struct GestureSignature {
    pub gesture_id: i64,
    pub frame_count: usize,
    pub handedness: Handedness,
    /// (x_min, y_min, x_max, y_max) over every landmark in the sequence.
    pub bounding_box: (f64, f64, f64, f64),
    pub centroid: [f64; 3],
    pub trajectory_length: f64,
    pub velocity_mean: f64,
    pub velocity_std: f64,
    pub cluster_id: Option<usize>,
}

/// Extract a signature in O(frames) from raw landmark data.
pub fn extract_signature(gesture_id: i64, frames: &[Frame]) -> Result<GestureSignature> {
    if frames.is_empty() {
        return Err(Error::Input(
            "cannot extract a signature from an empty sequence".into(),
        ));
    }

    let mut x_min = f64::MAX;
    let mut y_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_max = f64::MIN;
    let mut centroid = [0.0f64; 3];
    let mut landmark_count = 0usize;

    for frame in frames {
        for lm in &frame.landmarks {
            x_min = x_min.min(lm.x);
            y_min = y_min.min(lm.y);
            x_max = x_max.max(lm.x);
            y_max = y_max.max(lm.y);
            centroid[0] += lm.x;
            centroid[1] += lm.y;
            centroid[2] += lm.z;
            landmark_count += 1;
        }
    }

    if landmark_count == 0 {
        return Err(Error::Input("sequence carries no landmarks".into()));
    }
    for c in &mut centroid {
        *c /= landmark_count as f64;
    }

    let wrists: Vec<[f64; 3]> = frames
        .iter()
        .filter_map(|f| f.landmarks.get(WRIST))
        .map(|lm| [lm.x, lm.y, lm.z])
        .collect();

    let mut trajectory_length = 0.0;
    let mut speeds = Vec::with_capacity(wrists.len().saturating_sub(1));
    for pair in wrists.windows(2) {
        let dx = pair[1][0] - pair[0][0];
        let dy = pair[1][1] - pair[0][1];
        let dz = pair[1][2] - pair[0][2];
        let step = (dx * dx + dy * dy + dz * dz).sqrt();
        trajectory_length += step;
        speeds.push(step / FRAME_DT);
    }

    let (velocity_mean, velocity_std) = mean_std(&speeds);

    Ok(GestureSignature {
        gesture_id,
        frame_count: frames.len(),
        handedness: frames[0].handedness,
        bounding_box: (x_min, y_min, x_max, y_max),
        centroid,
        trajectory_length,
        velocity_mean,
        velocity_std,
        cluster_id: None,
    })
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    (mean, variance.sqrt())
}
