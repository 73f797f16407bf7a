//! Hybrid-mode state machine: arbitrates between cursor control and gesture
//! collection so the two never interfere.
//!
//! All timing derives from frame timestamps, so behavior is a pure function
//! of the frame stream.

use crate::types::{Frame, WRIST};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HybridState {
    CursorOnly,
    Collecting,
    Matching,
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerType {
    Stationary,
    Moving,
}

#[derive(Clone, Debug)]
pub struct HybridParams {
    /// Velocity below which the hand counts as stationary (per frame, no dt
    /// division).
    pub stationary_velocity_threshold: f64,
    /// Seconds of stillness before a stationary trigger fires.
    pub stationary_duration: f64,
    /// Velocity above which the hand counts as deliberately moving.
    pub moving_velocity_threshold: f64,
    /// Seconds of sustained motion before a moving trigger fires.
    pub moving_duration: f64,
    pub collection_max_frames: usize,
    pub collection_min_frames: usize,
    /// Seconds of stillness that end a moving-triggered collection.
    pub gesture_end_stationary_duration: f64,
    /// Seconds spent in IDLE before cursor mode resumes.
    pub idle_cooldown: f64,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            stationary_velocity_threshold: 0.015,
            stationary_duration: 0.8,
            moving_velocity_threshold: 0.12,
            moving_duration: 0.5,
            collection_max_frames: 90,
            collection_min_frames: 10,
            gesture_end_stationary_duration: 0.5,
            idle_cooldown: 1.0,
        }
    }
}

/// What one FSM step decided. When `match_request` is set the caller must
/// run the matcher on the buffer and then call [`HybridStateMachine::finish_matching`].
#[derive(Debug, Default)]
pub struct FsmStep {
    pub match_request: Option<Vec<Frame>>,
    pub collection_aborted: bool,
}

pub struct HybridStateMachine {
    state: HybridState,
    params: HybridParams,
    stationary_since: Option<f64>,
    moving_since: Option<f64>,
    gesture_end_since: Option<f64>,
    idle_since: Option<f64>,
    collected: Vec<Frame>,
    trigger_type: Option<TriggerType>,
    previous_wrist: Option<[f64; 3]>,
    last_velocity: f64,
}

impl HybridStateMachine {
    pub fn new(params: HybridParams) -> Self {
        log::info!("hybrid state machine initialized in cursor-only state");
        Self {
            state: HybridState::CursorOnly,
            params,
            stationary_since: None,
            moving_since: None,
            gesture_end_since: None,
            idle_since: None,
            collected: Vec::new(),
            trigger_type: None,
            previous_wrist: None,
            last_velocity: 0.0,
        }
    }

    pub fn state(&self) -> HybridState {
        self.state
    }

    /// Cursor control (and the click gates) run only in cursor-only mode.
    pub fn cursor_active(&self) -> bool {
        self.state == HybridState::CursorOnly
    }

    pub fn last_velocity(&self) -> f64 {
        self.last_velocity
    }

    pub fn collected_count(&self) -> usize {
        self.collected.len()
    }

    pub fn trigger_type(&self) -> Option<TriggerType> {
        self.trigger_type
    }

    /// Advance on a hand frame. `auth_ok` is the collaborator's auth/record
    /// gate for this step.
    pub fn on_frame(&mut self, frame: &Frame, auth_ok: bool) -> FsmStep {
        let t = frame.timestamp_ms as f64 / 1000.0;
        let velocity = self.update_velocity(frame);

        match self.state {
            HybridState::CursorOnly => {
                if !auth_ok {
                    // Policy rejection is a normal outcome, not an error.
                    self.stationary_since = None;
                    self.moving_since = None;
                    return FsmStep::default();
                }
                self.update_trigger_timers(velocity, t);

                if let Some(trigger) = self.collection_trigger(t) {
                    self.state = HybridState::Collecting;
                    self.trigger_type = Some(trigger);
                    self.gesture_end_since = None;
                    self.collected = vec![frame.clone()];
                    log::info!(
                        "state: cursor-only -> collecting ({trigger:?} trigger, velocity {velocity:.4})"
                    );
                }
                FsmStep::default()
            }

            HybridState::Collecting => {
                if !auth_ok {
                    log::info!(
                        "aborting collection after {} frames (auth gate closed)",
                        self.collected.len()
                    );
                    self.reset_to_cursor();
                    return FsmStep {
                        collection_aborted: true,
                        ..FsmStep::default()
                    };
                }

                self.collected.push(frame.clone());

                if self.gesture_ended(velocity, t) {
                    log::info!(
                        "state: collecting -> matching (gesture ended at {} frames)",
                        self.collected.len()
                    );
                    return self.begin_matching();
                }
                if self.collected.len() >= self.params.collection_max_frames {
                    log::info!(
                        "state: collecting -> matching (max {} frames reached)",
                        self.collected.len()
                    );
                    return self.begin_matching();
                }
                FsmStep::default()
            }

            HybridState::Matching => {
                // The matcher runs synchronously relative to the FSM; frames
                // arriving here are dropped.
                FsmStep::default()
            }

            HybridState::Idle => {
                // Any observed hand resets the trigger timers so collection
                // cannot begin before the cooldown elapses.
                self.stationary_since = None;
                self.moving_since = None;
                self.maybe_leave_idle(t);
                FsmStep::default()
            }
        }
    }

    /// Advance on a no-hand frame. While collecting with enough frames this
    /// is the hand-removed shortcut straight into matching.
    pub fn on_no_hand(&mut self, timestamp_ms: i64) -> FsmStep {
        let t = timestamp_ms as f64 / 1000.0;
        self.previous_wrist = None;
        self.last_velocity = 0.0;

        match self.state {
            HybridState::Collecting
                if self.collected.len() >= self.params.collection_min_frames =>
            {
                log::info!(
                    "hand removed, matching {} collected frames",
                    self.collected.len()
                );
                self.begin_matching()
            }
            HybridState::CursorOnly => {
                self.stationary_since = None;
                self.moving_since = None;
                FsmStep::default()
            }
            HybridState::Idle => {
                self.maybe_leave_idle(t);
                FsmStep::default()
            }
            _ => FsmStep::default(),
        }
    }

    /// Complete the matching phase: enter IDLE and clear wrist tracking so
    /// the hand reappearing cannot produce a velocity spike.
    pub fn finish_matching(&mut self, timestamp_ms: i64) {
        if self.state != HybridState::Matching {
            return;
        }
        self.state = HybridState::Idle;
        self.idle_since = Some(timestamp_ms as f64 / 1000.0);
        self.previous_wrist = None;
        self.last_velocity = 0.0;
        self.stationary_since = None;
        self.moving_since = None;
        log::info!("state: matching -> idle");
    }

    pub fn reset(&mut self) {
        self.reset_to_cursor();
        log::info!("state machine reset to cursor-only");
    }

    fn begin_matching(&mut self) -> FsmStep {
        self.state = HybridState::Matching;
        let frames = std::mem::take(&mut self.collected);
        FsmStep {
            match_request: Some(frames),
            collection_aborted: false,
        }
    }

    fn reset_to_cursor(&mut self) {
        self.state = HybridState::CursorOnly;
        self.collected.clear();
        self.stationary_since = None;
        self.moving_since = None;
        self.gesture_end_since = None;
        self.idle_since = None;
        self.trigger_type = None;
        self.previous_wrist = None;
        self.last_velocity = 0.0;
    }

    fn maybe_leave_idle(&mut self, t: f64) {
        let Some(idle_since) = self.idle_since else {
            return;
        };
        if t - idle_since >= self.params.idle_cooldown {
            self.reset_to_cursor();
            log::info!("state: idle -> cursor-only (cooldown complete)");
        }
    }

    /// Wrist displacement per frame, no dt division.
    fn update_velocity(&mut self, frame: &Frame) -> f64 {
        let Some(wrist) = frame.landmarks.get(WRIST) else {
            return self.last_velocity;
        };
        let current = [wrist.x, wrist.y, wrist.z];
        let velocity = match self.previous_wrist {
            Some(prev) => {
                let dx = current[0] - prev[0];
                let dy = current[1] - prev[1];
                let dz = current[2] - prev[2];
                (dx * dx + dy * dy + dz * dz).sqrt()
            }
            None => 0.0,
        };
        self.previous_wrist = Some(current);
        self.last_velocity = velocity;
        velocity
    }

    fn update_trigger_timers(&mut self, velocity: f64, t: f64) {
        if velocity < self.params.stationary_velocity_threshold {
            self.stationary_since.get_or_insert(t);
        } else {
            self.stationary_since = None;
        }

        if velocity > self.params.moving_velocity_threshold {
            self.moving_since.get_or_insert(t);
        } else {
            self.moving_since = None;
        }
    }

    fn collection_trigger(&self, t: f64) -> Option<TriggerType> {
        if let Some(since) = self.stationary_since {
            if t - since >= self.params.stationary_duration {
                return Some(TriggerType::Stationary);
            }
        }
        if let Some(since) = self.moving_since {
            if t - since >= self.params.moving_duration {
                return Some(TriggerType::Moving);
            }
        }
        None
    }

    /// Natural end of a collection, relative to how it was triggered: a
    /// moving gesture ends by coming to rest, a stationary one by breaking
    /// into motion. Needs the minimum frame count either way.
    fn gesture_ended(&mut self, velocity: f64, t: f64) -> bool {
        if self.collected.len() < self.params.collection_min_frames {
            return false;
        }

        match self.trigger_type {
            Some(TriggerType::Moving) => {
                if velocity < self.params.stationary_velocity_threshold {
                    let since = *self.gesture_end_since.get_or_insert(t);
                    t - since >= self.params.gesture_end_stationary_duration
                } else {
                    self.gesture_end_since = None;
                    false
                }
            }
            Some(TriggerType::Stationary) => velocity > self.params.moving_velocity_threshold,
            None => false,
        }
    }
}
