mod controller;
mod loop_worker;

pub use controller::SensingController;
pub use loop_worker::{CaptureLoop, LoopReport, LoopSettings, TickOutcome};
