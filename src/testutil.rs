//! Synthetic hands and gestures shared across test modules.

use crate::types::{
    ClickKind, Frame, GestureTemplate, Handedness, Landmark, LandmarkData, TemplateStats,
    AppContext, INDEX_TIP, MIDDLE_TIP, THUMB_TIP,
};

/// Landmark offsets of an open right hand facing the camera, fingers up,
/// index side on +x. Spread wide enough that no fingertip pair sits inside
/// the default pinch threshold.
const HAND_OFFSETS: [[f64; 3]; 21] = [
    [0.0, 0.0, 0.0],         // 0 wrist
    [0.04, -0.02, -0.01],    // 1 thumb cmc
    [0.07, -0.04, -0.015],   // 2 thumb mcp
    [0.09, -0.07, -0.02],    // 3 thumb ip
    [0.10, -0.10, -0.025],   // 4 thumb tip
    [0.05, -0.11, -0.005],   // 5 index mcp
    [0.07, -0.14, -0.01],    // 6 index pip
    [0.08, -0.165, -0.02],   // 7 index dip
    [0.09, -0.19, -0.03],    // 8 index tip
    [0.0, -0.12, 0.0],       // 9 middle mcp
    [0.0, -0.16, -0.01],     // 10 middle pip
    [0.0, -0.19, -0.02],     // 11 middle dip
    [0.0, -0.22, -0.03],     // 12 middle tip
    [-0.045, -0.115, -0.005], // 13 ring mcp
    [-0.05, -0.15, -0.01],   // 14 ring pip
    [-0.055, -0.175, -0.02], // 15 ring dip
    [-0.06, -0.20, -0.03],   // 16 ring tip
    [-0.09, -0.10, -0.01],   // 17 pinky mcp
    [-0.10, -0.125, -0.015], // 18 pinky pip
    [-0.105, -0.145, -0.02], // 19 pinky dip
    [-0.11, -0.165, -0.025], // 20 pinky tip
];

/// An open hand with its wrist at `center`.
pub fn canonical_hand(center: [f64; 2]) -> Vec<Landmark> {
    HAND_OFFSETS
        .iter()
        .map(|o| Landmark::new(center[0] + o[0], center[1] + o[1], o[2]))
        .collect()
}

/// A hand pinching for the given click kind: the thumb tip is brought next
/// to the index or middle fingertip.
pub fn pinched_hand(center: [f64; 2], kind: ClickKind) -> Vec<Landmark> {
    let mut hand = canonical_hand(center);
    let target = match kind {
        ClickKind::Left => hand[INDEX_TIP],
        ClickKind::Right => hand[MIDDLE_TIP],
    };
    hand[THUMB_TIP] = match kind {
        ClickKind::Left => Landmark::new(target.x - 0.01, target.y + 0.005, target.z),
        ClickKind::Right => Landmark::new(target.x + 0.01, target.y + 0.005, target.z),
    };
    hand
}

pub fn frame_at(timestamp_ms: i64, landmarks: Vec<Landmark>) -> Frame {
    Frame {
        timestamp_ms,
        landmarks,
        handedness: Handedness::Right,
        confidence: 1.0,
    }
}

/// `n` frames of a motionless hand at `center`, 30 fps timestamps.
pub fn hand_frames(n: usize, center: [f64; 2]) -> Vec<Frame> {
    (0..n)
        .map(|i| frame_at(i as i64 * 33, canonical_hand(center)))
        .collect()
}

/// `n` frames sweeping the hand linearly from `from` to `to`.
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

pub fn template_from_frames(id: i64, frames: Vec<Frame>) -> GestureTemplate {
    GestureTemplate {
        id,
        owner_user_id: 1,
        name: format!("gesture-{id}"),
        action_id: format!("action-{id}"),
        context: AppContext::Global,
        landmark_data: LandmarkData::from_frames(frames),
        adaptive_threshold: None,
        stats: TemplateStats::default(),
    }
}
