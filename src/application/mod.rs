// Application layer - use cases and orchestration

pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod service;

pub use error::*;
pub use orchestrator::*;
pub use retry::*;
pub use service::*;
