mod controller;
mod registry;


pub use controller::{
    ActiveSession, SessionStatus, SessionStatusReport, Tracker, TrackerBuilder,
    DEFAULT_CONTEXT_DESCRIPTION, DEFAULT_CONTEXT_NAME,
};
pub use registry::{RunningSession, SessionRegistry};
