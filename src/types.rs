//! Core data model: landmarks, frames, templates, and the events the
//! session emits back to its host.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const LANDMARK_COUNT: usize = 21;
pub const FEATURES_PER_FRAME: usize = 63;
pub const TARGET_FRAMES: usize = 60;

pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_TIP: usize = 12;
pub const PINKY_MCP: usize = 17;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// One detected-hand observation. `landmarks` holds 21 entries after
/// ingress validation; stored template frames are re-validated by the
/// consumers that read them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp_ms: i64,
    pub landmarks: Vec<Landmark>,
    pub handedness: Handedness,
    pub confidence: f64,
}

impl Frame {
    pub fn wrist(&self) -> Option<&Landmark> {
        self.landmarks.first()
    }
}

/// What the vision collaborator produced for one camera frame.
#[derive(Clone, Debug)]
pub enum FrameEvent {
    Hand(Frame),
    NoHand { timestamp_ms: i64 },
}

impl FrameEvent {
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            FrameEvent::Hand(frame) => frame.timestamp_ms,
            FrameEvent::NoHand { timestamp_ms } => *timestamp_ms,
        }
    }

    /// Parse and validate a raw ingest packet. Only `hands[0]` feeds the
    /// hybrid pipeline; a packet with `hand_count == 0` becomes `NoHand`.
    pub fn from_packet(packet: FramePacket) -> Result<FrameEvent> {
        if packet.hand_count == 0 || packet.hands.is_empty() {
            return Ok(FrameEvent::NoHand {
                timestamp_ms: packet.timestamp_ms,
            });
        }

        let hand = &packet.hands[0];
        if hand.landmarks.len() != LANDMARK_COUNT {
            return Err(Error::Input(format!(
                "expected {} landmarks, got {}",
                LANDMARK_COUNT,
                hand.landmarks.len()
            )));
        }
        if hand.landmarks.iter().any(|lm| !lm.is_finite()) {
            return Err(Error::Input("non-finite landmark coordinate".into()));
        }
        if !hand.confidence.is_finite() || !(0.0..=1.0).contains(&hand.confidence) {
            return Err(Error::Input(format!(
                "confidence {} outside [0, 1]",
                hand.confidence
            )));
        }

        Ok(FrameEvent::Hand(Frame {
            timestamp_ms: packet.timestamp_ms,
            landmarks: hand.landmarks.clone(),
            handedness: hand.handedness,
            confidence: hand.confidence,
        }))
    }
}

/// Wire schema of the frame-ingest interface.
#[derive(Clone, Debug, Deserialize)]
pub struct FramePacket {
    pub timestamp_ms: i64,
    pub hands: Vec<HandPacket>,
    pub hand_count: usize,
    pub frame_size: FrameSize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HandPacket {
    pub handedness: Handedness,
    pub confidence: f64,
    pub landmarks: Vec<Landmark>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppContext {
    Global,
    Powerpoint,
    Word,
    Browser,
    Media,
}

impl AppContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppContext::Global => "GLOBAL",
            AppContext::Powerpoint => "POWERPOINT",
            AppContext::Word => "WORD",
            AppContext::Browser => "BROWSER",
            AppContext::Media => "MEDIA",
        }
    }
}

/// Rolling match statistics for one template. `accuracy_score` is the mean
/// similarity over successful matches only; below-threshold attempts do not
/// contribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStats {
    pub match_count: u64,
    pub accumulated_similarity: f64,
    pub accuracy_score: f64,
}

impl TemplateStats {
    pub fn record_match(&mut self, similarity: f64) {
        self.match_count += 1;
        self.accumulated_similarity += similarity;
        self.accuracy_score = self.accumulated_similarity / self.match_count.max(1) as f64;
    }
}

/// Persisted-blob layout for a template's recorded frames. The frames are
/// stored raw, never preprocessed, so preprocessing can change later without
/// re-recording.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LandmarkData {
    pub frames: Vec<Frame>,
    pub metadata: LandmarkMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LandmarkMetadata {
    pub total_frames: usize,
    pub duration_s: f64,
}

impl LandmarkData {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let total_frames = frames.len();
        let duration_s = match (frames.first(), frames.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp_ms - first.timestamp_ms).max(0) as f64 / 1000.0
            }
            _ => 0.0,
        };
        Self {
            frames,
            metadata: LandmarkMetadata {
                total_frames,
                duration_s,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GestureTemplate {
    pub id: i64,
    pub owner_user_id: i64,
    pub name: String,
    pub action_id: String,
    pub context: AppContext,
    pub landmark_data: LandmarkData,
    /// Per-template threshold; overrides the global default when present.
    pub adaptive_threshold: Option<f64>,
    pub stats: TemplateStats,
}

impl GestureTemplate {
    pub fn frames(&self) -> &[Frame] {
        &self.landmark_data.frames
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClickKind {
    Left,
    Right,
}

impl ClickKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickKind::Left => "left",
            ClickKind::Right => "right",
        }
    }
}

/// Everything the core emits back to its host.
#[derive(Clone, Debug, Serialize)]
pub enum Event {
    CursorMove {
        x_px: i32,
        y_px: i32,
        moved: bool,
        latency_ms: f64,
    },
    Click {
        kind: ClickKind,
    },
    GestureMatch {
        matched: bool,
        template_id: Option<i64>,
        name: Option<String>,
        similarity: Option<f64>,
        candidates_evaluated: usize,
        total_time_ms: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(hand_count: usize, landmarks: usize, confidence: f64) -> FramePacket {
        FramePacket {
            timestamp_ms: 1_000,
            hands: vec![HandPacket {
                handedness: Handedness::Right,
                confidence,
                landmarks: (0..landmarks)
                    .map(|i| Landmark::new(i as f64 * 0.01, 0.5, 0.0))
                    .collect(),
            }],
            hand_count,
            frame_size: FrameSize {
                width: 640,
                height: 480,
            },
        }
    }

    #[test]
    fn no_hand_packet_becomes_no_hand_event() {
        let mut p = packet(0, 21, 0.9);
        p.hands.clear();
        match FrameEvent::from_packet(p).unwrap() {
            FrameEvent::NoHand { timestamp_ms } => assert_eq!(timestamp_ms, 1_000),
            other => panic!("expected NoHand, got {other:?}"),
        }
    }

    #[test]
    fn short_landmark_list_is_rejected() {
        let err = FrameEvent::from_packet(packet(1, 20, 0.9)).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn non_finite_coordinate_is_rejected() {
        let mut p = packet(1, 21, 0.9);
        p.hands[0].landmarks[3].y = f64::NAN;
        assert!(FrameEvent::from_packet(p).is_err());
    }

    #[test]
    fn accuracy_score_tracks_successful_matches() {
        let mut stats = TemplateStats::default();
        stats.record_match(0.8);
        stats.record_match(0.6);
        assert_eq!(stats.match_count, 2);
        assert!((stats.accuracy_score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn app_context_serializes_uppercase() {
        let json = serde_json::to_string(&AppContext::Powerpoint).unwrap();
        assert_eq!(json, "\"POWERPOINT\"");
    }
}
