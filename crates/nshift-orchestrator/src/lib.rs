pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod report;

pub use error::OrchestrateError;
pub use lock::ScheduleLockRegistry;
pub use orchestrator::Orchestrator;
pub use report::{ScanMode, ScanOutcome, ScanRequest};
