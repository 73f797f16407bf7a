//! Linear frame resampling. Every stored or compared sequence is brought to
//! a fixed length so DTW compares like with like.

use crate::error::{Error, Result};
use crate::types::{Frame, Handedness, Landmark, LANDMARK_COUNT, TARGET_FRAMES};

/// Resample `frames` to exactly `target` frames by linear interpolation over
/// the source timeline. Returns the input unchanged when it is already at
/// the target length.
///
/// A source frame with a landmark count other than 21 invalidates the
/// interpolation pair; one such encounter is retried against the pair's
/// valid endpoint, a second fails the whole resampling.
pub fn resample_linear(frames: &[Frame], target: usize) -> Result<Vec<Frame>> {
    if frames.is_empty() {
        return Err(Error::Input("cannot resample an empty sequence".into()));
    }
    if target == 0 {
        return Err(Error::Input("target frame count must be positive".into()));
    }
    if frames.len() == target {
        return Ok(frames.to_vec());
    }

    let n = frames.len();
    let mut resampled = Vec::with_capacity(target);
    // One invalid source frame is tolerated by substituting its valid
    // neighbor; a second distinct invalid frame fails the resampling.
    let mut tolerated: Option<usize> = None;

    for t in 0..target {
        let u = if target == 1 {
            0.0
        } else {
            t as f64 * (n - 1) as f64 / (target - 1) as f64
        };
        let i = u.floor() as usize;
        let j = (i + 1).min(n - 1);
        let w = u - i as f64;

        let valid_i = frames[i].landmarks.len() == LANDMARK_COUNT;
        let valid_j = frames[j].landmarks.len() == LANDMARK_COUNT;

        let frame = if valid_i && valid_j {
            interpolate(&frames[i], &frames[j], w)
        } else {
            let (bad, fallback) = if valid_i {
                (j, &frames[i])
            } else if valid_j {
                (i, &frames[j])
            } else {
                return Err(Error::Input(format!(
                    "frames {i} and {j} both have invalid landmark counts"
                )));
            };
            match tolerated {
                None => {
                    tolerated = Some(bad);
                    log::warn!(
                        "invalid landmark count at frame {bad}, substituting nearest valid frame"
                    );
                }
                Some(known) if known == bad => {}
                Some(_) => {
                    return Err(Error::Input(
                        "more than one frame with invalid landmark count".into(),
                    ));
                }
            }
            fallback.clone()
        };

        resampled.push(frame);
    }

    log::debug!("resampled {} frames to {}", n, target);
    Ok(resampled)
}

/// Convenience wrapper for the canonical template length.
pub fn resample_to_target(frames: &[Frame]) -> Result<Vec<Frame>> {
    resample_linear(frames, TARGET_FRAMES)
}

fn interpolate(a: &Frame, b: &Frame, w: f64) -> Frame {
    let landmarks = a
        .landmarks
        .iter()
        .zip(&b.landmarks)
        .map(|(la, lb)| Landmark {
            x: (1.0 - w) * la.x + w * lb.x,
            y: (1.0 - w) * la.y + w * lb.y,
            z: (1.0 - w) * la.z + w * lb.z,
        })
        .collect();

    Frame {
        timestamp_ms: ((1.0 - w) * a.timestamp_ms as f64 + w * b.timestamp_ms as f64) as i64,
        landmarks,
        handedness: a.handedness,
        confidence: (1.0 - w) * a.confidence + w * b.confidence,
    }
}

/// Summary statistics for a recorded sequence, used as template metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceStats {
    pub frame_count: usize,
    pub duration_ms: i64,
    pub avg_fps: f64,
    pub avg_confidence: f64,
    pub handedness: Option<Handedness>,
}

pub fn sequence_stats(frames: &[Frame]) -> SequenceStats {
    if frames.is_empty() {
        return SequenceStats {
            frame_count: 0,
            duration_ms: 0,
            avg_fps: 0.0,
            avg_confidence: 0.0,
            handedness: None,
        };
    }

    let frame_count = frames.len();
    let duration_ms = if frame_count > 1 {
        frames[frame_count - 1].timestamp_ms - frames[0].timestamp_ms
    } else {
        0
    };
    let avg_fps = if duration_ms > 0 {
        frame_count as f64 / (duration_ms as f64 / 1000.0)
    } else {
        0.0
    };
    let avg_confidence =
        frames.iter().map(|f| f.confidence).sum::<f64>() / frame_count as f64;

    let (left, right) = frames.iter().fold((0usize, 0usize), |(l, r), f| {
        match f.handedness {
            Handedness::Left => (l + 1, r),
            Handedness::Right => (l, r + 1),
        }
    });
    let handedness = if left > right {
        Some(Handedness::Left)
    } else {
        Some(Handedness::Right)
    };

    SequenceStats {
        frame_count,
        duration_ms,
        avg_fps,
        avg_confidence,
        handedness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: i64, x: f64) -> Frame {
        Frame {
            timestamp_ms: ts,
            landmarks: (0..LANDMARK_COUNT)
                .map(|i| Landmark::new(x, i as f64 * 0.01, 0.0))
                .collect(),
            handedness: Handedness::Right,
            confidence: 1.0,
        }
    }

    #[test]
    fn output_length_is_always_target() {
        for n in [1usize, 5, 30, 59, 61, 120] {
            let frames: Vec<Frame> = (0..n).map(|i| frame(i as i64 * 33, i as f64)).collect();
            let out = resample_to_target(&frames).unwrap();
            assert_eq!(out.len(), TARGET_FRAMES, "n={n}");
        }
    }

    #[test]
    fn resampling_sixty_frames_is_identity() {
        let frames: Vec<Frame> = (0..TARGET_FRAMES)
            .map(|i| frame(i as i64 * 33, i as f64 * 0.1))
            .collect();
        let out = resample_to_target(&frames).unwrap();
        for (a, b) in frames.iter().zip(&out) {
            assert_eq!(a.timestamp_ms, b.timestamp_ms);
            assert_eq!(a.confidence, b.confidence);
            for (la, lb) in a.landmarks.iter().zip(&b.landmarks) {
                assert_eq!(la.x, lb.x);
                assert_eq!(la.y, lb.y);
                assert_eq!(la.z, lb.z);
            }
        }
    }

    #[test]
    fn interpolation_is_linear_between_endpoints() {
        let frames = vec![frame(0, 0.0), frame(1000, 1.0)];
        let out = resample_linear(&frames, 3).unwrap();
        assert_eq!(out.len(), 3);
        assert!((out[1].landmarks[0].x - 0.5).abs() < 1e-12);
        assert_eq!(out[1].timestamp_ms, 500);
    }

    #[test]
    fn single_invalid_frame_is_tolerated_once() {
        let mut frames: Vec<Frame> = (0..10).map(|i| frame(i * 33, i as f64)).collect();
        frames[4].landmarks.truncate(10);
        assert!(resample_linear(&frames, 20).is_ok());
    }

    #[test]
    fn two_invalid_frames_fail_the_resampling() {
        let mut frames: Vec<Frame> = (0..10).map(|i| frame(i * 33, i as f64)).collect();
        frames[3].landmarks.truncate(10);
        frames[7].landmarks.truncate(10);
        assert!(resample_linear(&frames, 20).is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(resample_to_target(&[]).is_err());
    }

    #[test]
    fn stats_report_duration_and_majority_handedness() {
        let mut frames: Vec<Frame> = (0..30).map(|i| frame(i * 33, 0.0)).collect();
        frames[0].handedness = Handedness::Left;
        let stats = sequence_stats(&frames);
        assert_eq!(stats.frame_count, 30);
        assert_eq!(stats.duration_ms, 29 * 33);
        assert_eq!(stats.handedness, Some(Handedness::Right));
        assert!(stats.avg_fps > 29.0 && stats.avg_fps < 32.0);
    }
}
