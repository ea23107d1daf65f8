pub mod context;
pub mod event;
pub mod session;

pub use context::{Context, NewContext, DEFAULT_CONTEXT_COLOR};
pub use event::{EventRecord, NewEvent};
pub use session::{SessionRecord, SessionSummary};
