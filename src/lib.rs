//! Real-time hand-gesture recognition and hybrid cursor/gesture control
//! core. Consumes 21-landmark hand frames from an external vision pipeline
//! and emits cursor moves, clicks, and gesture-match events.

pub mod cache;
pub mod config;
pub mod cursor;
pub mod dtw;
pub mod error;
pub mod filter;
pub mod hybrid;
pub mod index;
pub mod matcher;
pub mod pinch;
pub mod preprocess;
pub mod resample;
pub mod session;
pub mod signature;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{run_session_loop, AuthGate, Session, SessionInput, TemplateProvider};
pub use types::{AppContext, ClickKind, Event, Frame, FrameEvent, GestureTemplate, Handedness, Landmark};
