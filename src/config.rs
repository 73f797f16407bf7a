//! Configuration surface supplied by the collaborator at session start.
//! Out-of-range values are clamped to their documented range with a WARN
//! logged once per key.

use crate::error::Error;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Scale factor applied around the screen center (`cursor.speed`).
    pub cursor_speed: f64,
    /// One-Euro min_cutoff for the cursor filters (`cursor.smoothing_level`).
    pub cursor_smoothing_level: f64,
    /// Normalized dead-zone radius (`cursor.dead_zone`).
    pub cursor_dead_zone: f64,
    /// Master cursor switch (`cursor.enabled`).
    pub cursor_enabled: bool,
    /// Pinch distance threshold (`click.sensitivity`).
    pub click_sensitivity: f64,
    /// Master click switch (`click.enabled`).
    pub click_enabled: bool,
    /// Global similarity threshold (`gesture.sensitivity`).
    pub gesture_sensitivity: f64,
    /// Stationary duration before collection starts (`gesture.hold_time`).
    pub gesture_hold_time: f64,
    /// Maximum frames buffered per gesture (`system.gesture_collection_frames`).
    pub collection_max_frames: usize,
    /// IDLE cooldown duration in seconds (`system.idle_cooldown`).
    pub idle_cooldown: f64,
    /// Target screen dimensions for cursor mapping.
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cursor_speed: 1.0,
            cursor_smoothing_level: 0.5,
            cursor_dead_zone: 0.0,
            cursor_enabled: true,
            click_sensitivity: 0.08,
            click_enabled: true,
            gesture_sensitivity: 0.65,
            gesture_hold_time: 2.0,
            collection_max_frames: 90,
            idle_cooldown: 1.0,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

impl SessionConfig {
    /// Clamp every value to its documented range, warning per clamped key.
    pub fn sanitized(mut self) -> Self {
        self.cursor_speed = clamp_key("cursor.speed", self.cursor_speed, 0.1, 5.0);
        self.cursor_smoothing_level =
            clamp_key("cursor.smoothing_level", self.cursor_smoothing_level, 0.1, 5.0);
        self.cursor_dead_zone = clamp_key("cursor.dead_zone", self.cursor_dead_zone, 0.0, 0.5);
        self.click_sensitivity =
            clamp_key("click.sensitivity", self.click_sensitivity, 0.01, 0.3);
        self.gesture_sensitivity =
            clamp_key("gesture.sensitivity", self.gesture_sensitivity, 0.3, 0.95);
        self.gesture_hold_time = clamp_key("gesture.hold_time", self.gesture_hold_time, 0.2, 10.0);
        self.collection_max_frames = clamp_frames(
            "system.gesture_collection_frames",
            self.collection_max_frames,
            30,
            300,
        );
        self.idle_cooldown = clamp_key("system.idle_cooldown", self.idle_cooldown, 0.1, 10.0);
        self
    }
}

fn clamp_key(key: &'static str, value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        let err = Error::Config {
            key,
            message: format!("{value} is not finite, using {min}"),
        };
        log::warn!("{err}");
        return min;
    }
    if value < min || value > max {
        let clamped = value.clamp(min, max);
        let err = Error::Config {
            key,
            message: format!("{value} outside [{min}, {max}], clamped to {clamped}"),
        };
        log::warn!("{err}");
        return clamped;
    }
    value
}

fn clamp_frames(key: &'static str, value: usize, min: usize, max: usize) -> usize {
    if value < min || value > max {
        let clamped = value.clamp(min, max);
        let err = Error::Config {
            key,
            message: format!("{value} outside [{min}, {max}], clamped to {clamped}"),
        };
        log::warn!("{err}");
        return clamped;
    }
    value
}
