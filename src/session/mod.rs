//! Session state management
//!
//! Entities, the session state machine, progress events, and the
//! controller that sequences analysis, remediation, and checkpointing.

mod controller;
mod events;
mod state;

pub use controller::{ControlHandle, SessionController};
pub use events::{null_sink, EventSink, ProgressEvent};
pub use state::{Checkpoint, Session, SessionCounters, SessionId, SessionStatus};
