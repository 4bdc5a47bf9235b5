pub mod engine;
pub mod review;
pub mod session;
mod stages;
pub mod state;

pub use engine::{EngineSettings, StageConfirmer, WorkflowEngine, WorkflowResult, WorkflowStatus};
pub use session::WorkflowSession;
pub use state::{Stage, WorkflowState};
