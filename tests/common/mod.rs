//! Synthetic hands and gestures for the integration tests.
#![allow(dead_code)]

use gesture_pilot::types::{
    AppContext, Frame, GestureTemplate, Handedness, Landmark, LandmarkData, TemplateStats,
};

/// Open right hand facing the camera, fingers up, index side on +x.
pub const HAND_OFFSETS: [[f64; 3]; 21] = [
    [0.0, 0.0, 0.0],
    [0.04, -0.02, -0.01],
    [0.07, -0.04, -0.015],
    [0.09, -0.07, -0.02],
    [0.10, -0.10, -0.025],
    [0.05, -0.11, -0.005],
    [0.07, -0.14, -0.01],
    [0.08, -0.165, -0.02],
    [0.09, -0.19, -0.03],
    [0.0, -0.12, 0.0],
    [0.0, -0.16, -0.01],
    [0.0, -0.19, -0.02],
    [0.0, -0.22, -0.03],
    [-0.045, -0.115, -0.005],
    [-0.05, -0.15, -0.01],
    [-0.055, -0.175, -0.02],
    [-0.06, -0.20, -0.03],
    [-0.09, -0.10, -0.01],
    [-0.10, -0.125, -0.015],
    [-0.105, -0.145, -0.02],
    [-0.11, -0.165, -0.025],
];

pub fn canonical_hand(center: [f64; 2]) -> Vec<Landmark> {
    HAND_OFFSETS
        .iter()
        .map(|o| Landmark::new(center[0] + o[0], center[1] + o[1], o[2]))
        .collect()
}

pub fn mirrored_hand(center: [f64; 2]) -> Vec<Landmark> {
    HAND_OFFSETS
        .iter()
        .map(|o| Landmark::new(center[0] - o[0], center[1] + o[1], o[2]))
        .collect()
}

pub fn frame_at(timestamp_ms: i64, landmarks: Vec<Landmark>) -> Frame {
    Frame {
        timestamp_ms,
        landmarks,
        handedness: Handedness::Right,
        confidence: 1.0,
    }
}

pub fn swipe_frames(n: usize, from: [f64; 2], to: [f64; 2]) -> Vec<Frame> {
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            let center = [
                from[0] + (to[0] - from[0]) * t,
                from[1] + (to[1] - from[1]) * t,
            ];
            frame_at(i as i64 * 33, canonical_hand(center))
        })
        .collect()
}

/// The same swipe performed with a mirrored hand along the mirrored path.
pub fn mirrored_swipe_frames(n: usize, from: [f64; 2], to: [f64; 2]) -> Vec<Frame> {
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            let center = [
                (1.0 - from[0]) - ((1.0 - from[0]) - (1.0 - to[0])) * t,
                from[1] + (to[1] - from[1]) * t,
            ];
            frame_at(i as i64 * 33, mirrored_hand(center))
        })
        .collect()
}

/// The same hand shape sweeping the reflected path (shape not mirrored).
pub fn trajectory_mirrored_frames(n: usize, from: [f64; 2], to: [f64; 2]) -> Vec<Frame> {
    swipe_frames(n, [1.0 - from[0], from[1]], [1.0 - to[0], to[1]])
}

pub fn template_from_frames(id: i64, name: &str, frames: Vec<Frame>) -> GestureTemplate {
    GestureTemplate {
        id,
        owner_user_id: 1,
        name: name.to_string(),
        action_id: format!("action-{id}"),
        context: AppContext::Global,
        landmark_data: LandmarkData::from_frames(frames),
        adaptive_threshold: None,
        stats: TemplateStats::default(),
    }
}
