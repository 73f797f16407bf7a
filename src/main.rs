//! Demo driver: wires a session worker to bounded channels and feeds it a
//! synthetic frame stream, logging every emitted event. Stands in for the
//! transport collaborator during development.

use anyhow::Result;
use crossbeam_channel::{bounded, unbounded};

use gesture_pilot::session::{run_session_loop, Session, SessionInput, TemplateProvider};
use gesture_pilot::types::{
    AppContext, Event, Frame, FrameEvent, GestureTemplate, Handedness, Landmark, LandmarkData,
    TemplateStats,
};
use gesture_pilot::SessionConfig;

struct DemoProvider {
    templates: Vec<GestureTemplate>,
}

impl TemplateProvider for DemoProvider {
    fn list_templates(&self, _user_id: i64, _app_context: AppContext) -> Vec<GestureTemplate> {
        self.templates.clone()
    }

    fn update_template_stats(
        &self,
        template_id: i64,
        similarity: f64,
        match_count: u64,
        _accumulated_similarity: f64,
    ) {
        log::info!(
            "template {template_id} stats: {match_count} matches, last similarity {similarity:.2}"
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let hold_frames = demo_hold(40);
    let template = GestureTemplate {
        id: 1,
        owner_user_id: 1,
        name: "hold".into(),
        action_id: "media.play_pause".into(),
        context: AppContext::Global,
        landmark_data: LandmarkData::from_frames(hold_frames),
        adaptive_threshold: None,
        stats: TemplateStats::default(),
    };

    let config = SessionConfig {
        gesture_hold_time: 0.5,
        ..SessionConfig::default()
    };
    let session = Session::new(
        config,
        Box::new(DemoProvider {
            templates: vec![template],
        }),
        Box::new(|| true),
        1,
        AppContext::Global,
    )?;

    let (input_tx, input_rx) = bounded(8);
    let (event_tx, event_rx) = unbounded();
    let handle = run_session_loop(session, input_rx, event_tx);

    // Sweep the cursor, hold still long enough to trigger collection, then
    // remove the hand so the matcher runs on the buffer.
    let mut ts = 0i64;
    for i in 0..30 {
        let x = 0.3 + i as f64 * 0.01;
        input_tx.send(SessionInput::Frame(FrameEvent::Hand(demo_frame(ts, x))))?;
        ts += 33;
    }
    for _ in 0..40 {
        input_tx.send(SessionInput::Frame(FrameEvent::Hand(demo_frame(ts, 0.6))))?;
        ts += 33;
    }
    input_tx.send(SessionInput::Frame(FrameEvent::NoHand { timestamp_ms: ts }))?;
    drop(input_tx);
    handle.join().expect("session loop finished");

    for event in event_rx.try_iter() {
        match event {
            Event::CursorMove {
                x_px, y_px, moved, ..
            } if moved => println!("cursor -> ({x_px}, {y_px})"),
            Event::CursorMove { .. } => {}
            Event::Click { kind } => println!("click: {}", kind.as_str()),
            Event::GestureMatch {
                matched,
                name,
                similarity,
                candidates_evaluated,
                total_time_ms,
                ..
            } => println!(
                "gesture match: matched={matched} name={name:?} similarity={similarity:?} \
                 ({candidates_evaluated} candidates, {total_time_ms:.1}ms)"
            ),
        }
    }

    Ok(())
}

fn demo_frame(timestamp_ms: i64, x: f64) -> Frame {
    // A rough open hand: wrist at (x, 0.55), fingers pointing up.
    let offsets: [[f64; 3]; 21] = [
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
    Frame {
        timestamp_ms,
        landmarks: offsets
            .iter()
            .map(|o| Landmark::new(x + o[0], 0.55 + o[1], o[2]))
            .collect(),
        handedness: Handedness::Right,
        confidence: 1.0,
    }
}

fn demo_hold(n: usize) -> Vec<Frame> {
    (0..n).map(|i| demo_frame(i as i64 * 33, 0.6)).collect()
}
