//! One client's bound set of components. A `Session` owns every filter,
//! state machine, cache, and the matcher by value; nothing in this crate is
//! process-global.

use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::cache::MatchCache;
use crate::config::SessionConfig;
use crate::cursor::CursorController;
use crate::error::Result;
use crate::filter::{LandmarkSmoother, DEFAULT_BETA, DEFAULT_D_CUTOFF, DEFAULT_MIN_CUTOFF};
use crate::hybrid::{HybridParams, HybridStateMachine};
use crate::index::GestureIndexer;
use crate::matcher::{GestureMatcher, MatcherSettings};
use crate::pinch::{PinchDetector, DEFAULT_STABILITY_THRESHOLD};
use crate::types::{AppContext, Event, Frame, FrameEvent, GestureTemplate};

/// Template store callbacks supplied by the persistence collaborator.
pub trait TemplateProvider: Send {
    fn list_templates(&self, user_id: i64, app_context: AppContext) -> Vec<GestureTemplate>;

    /// Persist updated stats after a successful match. The core computes the
    /// new values; storage is the collaborator's concern.
    fn update_template_stats(
        &self,
        template_id: i64,
        similarity: f64,
        match_count: u64,
        accumulated_similarity: f64,
    );
}

/// The auth/record gate. `false` blocks and aborts gesture collection; it is
/// never an error.
pub trait AuthGate: Send {
    fn auth_check(&self) -> bool;
}

impl<F> AuthGate for F
where
    F: Fn() -> bool + Send,
{
    fn auth_check(&self) -> bool {
        self()
    }
}

/// Inputs the session worker accepts over its channel.
pub enum SessionInput {
    Frame(FrameEvent),
    /// A template changed (create/update/delete) for this user: invalidate
    /// caches and rebuild the index.
    TemplateChange { user_id: i64 },
}

pub struct Session {
    config: SessionConfig,
    user_id: i64,
    app_context: AppContext,
    hybrid: HybridStateMachine,
    cursor: CursorController,
    pinch: PinchDetector,
    matcher: GestureMatcher,
    indexer: GestureIndexer,
    cache: MatchCache,
    smoother: LandmarkSmoother,
    provider: Box<dyn TemplateProvider>,
    auth: Box<dyn AuthGate>,
    auth_was_denied: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        provider: Box<dyn TemplateProvider>,
        auth: Box<dyn AuthGate>,
        user_id: i64,
        app_context: AppContext,
    ) -> Result<Self> {
        let config = config.sanitized();

        let hybrid = HybridStateMachine::new(HybridParams {
            stationary_duration: config.gesture_hold_time,
            collection_max_frames: config.collection_max_frames,
            idle_cooldown: config.idle_cooldown,
            ..HybridParams::default()
        });
        let cursor = CursorController::new(
            config.cursor_smoothing_level,
            config.cursor_dead_zone,
            config.cursor_speed,
            config.screen_width,
            config.screen_height,
        );
        let pinch = PinchDetector::new(config.click_sensitivity, DEFAULT_STABILITY_THRESHOLD, false);
        let matcher = GestureMatcher::new(MatcherSettings {
            similarity_threshold: config.gesture_sensitivity,
            ..MatcherSettings::default()
        })?;

        let mut indexer = GestureIndexer::new();
        let templates = provider.list_templates(user_id, app_context);
        indexer.rebuild(&templates);

        Ok(Self {
            config,
            user_id,
            app_context,
            hybrid,
            cursor,
            pinch,
            matcher,
            indexer,
            cache: MatchCache::default(),
            smoother: LandmarkSmoother::new(DEFAULT_MIN_CUTOFF, DEFAULT_BETA, DEFAULT_D_CUTOFF),
            provider,
            auth,
            auth_was_denied: false,
        })
    }

    /// Feed one frame event through the pipeline: hybrid FSM first, then
    /// cursor and pinch detection while cursor mode holds. Returns the
    /// events to emit, in order.
    pub fn process(&mut self, event: FrameEvent) -> Vec<Event> {
        let mut events = Vec::new();

        match event {
            FrameEvent::NoHand { timestamp_ms } => {
                let step = self.hybrid.on_no_hand(timestamp_ms);
                if let Some(frames) = step.match_request {
                    events.push(self.run_match(&frames));
                    self.hybrid.finish_matching(timestamp_ms);
                }
            }
            FrameEvent::Hand(frame) => {
                let auth_ok = self.check_auth();
                let step = self.hybrid.on_frame(&frame, auth_ok);

                if let Some(frames) = step.match_request {
                    events.push(self.run_match(&frames));
                    self.hybrid.finish_matching(frame.timestamp_ms);
                }

                if self.hybrid.cursor_active() {
                    if self.config.cursor_enabled {
                        if let Some(update) =
                            self.cursor.update(&frame.landmarks, frame.timestamp_ms)
                        {
                            events.push(Event::CursorMove {
                                x_px: update.x_px,
                                y_px: update.y_px,
                                moved: update.moved,
                                latency_ms: update.latency_ms,
                            });
                        }
                    }
                    if self.config.click_enabled {
                        if let Some(kind) = self.pinch.detect(&frame.landmarks) {
                            events.push(Event::Click { kind });
                        }
                    }
                }
            }
        }

        events
    }

    /// Collaborator hook for template create/update/delete: drop the user's
    /// cached matches and rebuild the index.
    pub fn on_template_change(&mut self, user_id: i64) {
        self.cache.invalidate_user(user_id);
        let templates = self.provider.list_templates(self.user_id, self.app_context);
        self.indexer.rebuild(&templates);
        log::info!("index rebuilt after template change for user {user_id}");
    }

    pub fn hybrid_state(&self) -> crate::hybrid::HybridState {
        self.hybrid.state()
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    fn check_auth(&mut self) -> bool {
        let ok = self.auth.auth_check();
        if ok && self.auth_was_denied {
            log::info!("auth gate reopened, gesture collection available again");
        }
        self.auth_was_denied = !ok;
        ok
    }

    fn run_match(&mut self, frames: &[Frame]) -> Event {
        let templates = self.provider.list_templates(self.user_id, self.app_context);
        let outcome = self.matcher.match_gesture(
            frames,
            &templates,
            self.user_id,
            self.app_context,
            &mut self.smoother,
            &mut self.indexer,
            &self.cache,
        );

        match outcome.result {
            Some((template, similarity)) => {
                let mut stats = template.stats.clone();
                stats.record_match(similarity);
                self.provider.update_template_stats(
                    template.id,
                    similarity,
                    stats.match_count,
                    stats.accumulated_similarity,
                );
                Event::GestureMatch {
                    matched: true,
                    template_id: Some(template.id),
                    name: Some(template.name),
                    similarity: Some(similarity),
                    candidates_evaluated: outcome.candidates_evaluated,
                    total_time_ms: outcome.total_time_ms,
                }
            }
            None => Event::GestureMatch {
                matched: false,
                template_id: None,
                name: None,
                similarity: None,
                candidates_evaluated: outcome.candidates_evaluated,
                total_time_ms: outcome.total_time_ms,
            },
        }
    }
}

/// Drive a session from a channel until the sender hangs up. Frames are
/// processed in arrival order; emitted events keep that order.
pub fn run_session_loop(
    mut session: Session,
    input_rx: Receiver<SessionInput>,
    event_tx: Sender<Event>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(input) = input_rx.recv() {
            match input {
                SessionInput::Frame(frame_event) => {
                    for event in session.process(frame_event) {
                        if event_tx.send(event).is_err() {
                            log::info!("event receiver dropped, stopping session loop");
                            return;
                        }
                    }
                }
                SessionInput::TemplateChange { user_id } => {
                    session.on_template_change(user_id);
                }
            }
        }
        log::info!("frame source closed, session loop finished");
    })
}
