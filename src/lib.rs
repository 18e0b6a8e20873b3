pub mod application;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod storage;

pub use application::{LedgerService, TransferOrchestrator};
pub use domain::*;
pub use storage::{LedgerStore, LedgerTx, MemoryStore, SqliteStore};
