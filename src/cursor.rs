//! Cursor control: maps the index fingertip to screen pixels through
//! speed-adaptive smoothing, a dead zone, mirroring, and centered scaling.

use std::time::Instant;

use crate::filter::OneEuroFilter;
use crate::types::{Landmark, INDEX_TIP};

const CURSOR_BETA: f64 = 0.01;
const CURSOR_D_CUTOFF: f64 = 1.0;
/// Pixel distance past which a frame counts as intentional movement. Small
/// jitter below this must not register as cursor motion elsewhere in the
/// system.
pub const MOVED_THRESHOLD_PX: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CursorUpdate {
    pub x_px: i32,
    pub y_px: i32,
    pub moved: bool,
    pub latency_ms: f64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CursorStats {
    pub total_updates: u64,
    pub emitted_updates: u64,
}

pub struct CursorController {
    filter_x: OneEuroFilter,
    filter_y: OneEuroFilter,
    dead_zone: f64,
    scale: f64,
    screen_width: u32,
    screen_height: u32,
    last_position: Option<(f64, f64)>,
    last_pixel: Option<(i32, i32)>,
    stats: CursorStats,
}

impl CursorController {
    pub fn new(
        smoothing_level: f64,
        dead_zone: f64,
        scale: f64,
        screen_width: u32,
        screen_height: u32,
    ) -> Self {
        Self {
            filter_x: OneEuroFilter::new(smoothing_level, CURSOR_BETA, CURSOR_D_CUTOFF),
            filter_y: OneEuroFilter::new(smoothing_level, CURSOR_BETA, CURSOR_D_CUTOFF),
            dead_zone,
            scale,
            screen_width: screen_width.max(1),
            screen_height: screen_height.max(1),
            last_position: None,
            last_pixel: None,
            stats: CursorStats::default(),
        }
    }

    /// Process one frame of landmarks. Returns `None` when the landmarks
    /// cannot yield a cursor position; otherwise the pixel position plus a
    /// `moved` flag that only trips past the intentional-movement gate.
    pub fn update(&mut self, landmarks: &[Landmark], timestamp_ms: i64) -> Option<CursorUpdate> {
        let started = Instant::now();
        self.stats.total_updates += 1;

        let tip = landmarks.get(INDEX_TIP)?;
        if !tip.is_finite() {
            return None;
        }

        let t = timestamp_ms as f64 / 1000.0;
        let smoothed_x = self.filter_x.filter(tip.x, t);
        let smoothed_y = self.filter_y.filter(tip.y, t);

        let (filtered_x, filtered_y) = self.apply_dead_zone(smoothed_x, smoothed_y);
        let (x_px, y_px) = self.map_to_screen(filtered_x, filtered_y);

        let moved = match self.last_pixel {
            Some((last_x, last_y)) => {
                let dx = (x_px - last_x) as f64;
                let dy = (y_px - last_y) as f64;
                (dx * dx + dy * dy).sqrt() > MOVED_THRESHOLD_PX
            }
            // First position: never counts as movement, so gestures right
            // after startup are not suppressed.
            None => false,
        };

        self.last_pixel = Some((x_px, y_px));
        self.stats.emitted_updates += 1;

        Some(CursorUpdate {
            x_px,
            y_px,
            moved,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn apply_dead_zone(&mut self, x: f64, y: f64) -> (f64, f64) {
        let Some((last_x, last_y)) = self.last_position else {
            self.last_position = Some((x, y));
            return (x, y);
        };

        let dx = x - last_x;
        let dy = y - last_y;
        if (dx * dx + dy * dy).sqrt() > self.dead_zone {
            self.last_position = Some((x, y));
            (x, y)
        } else {
            (last_x, last_y)
        }
    }

    fn map_to_screen(&self, x: f64, y: f64) -> (i32, i32) {
        // Mirror x: the camera faces the user.
        let mirrored_x = 1.0 - x;

        let scaled_x = ((mirrored_x - 0.5) * self.scale + 0.5).clamp(0.0, 1.0);
        let scaled_y = ((y - 0.5) * self.scale + 0.5).clamp(0.0, 1.0);

        let px = ((scaled_x * self.screen_width as f64) as i32)
            .clamp(0, self.screen_width as i32 - 1);
        let py = ((scaled_y * self.screen_height as f64) as i32)
            .clamp(0, self.screen_height as i32 - 1);
        (px, py)
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.filter_x.reset();
        self.filter_y.reset();
        self.last_position = None;
        self.last_pixel = None;
        self.stats = CursorStats::default();
    }
}
