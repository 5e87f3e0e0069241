//! Pipeline session state and persistence.

mod persistence;
mod state;

pub use persistence::SessionStore;
pub use state::{PipelineSession, PipelineStage, SessionStatus};
