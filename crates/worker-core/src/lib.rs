pub mod config;
pub mod error;
pub mod manager;
pub mod runtime;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use manager::WorkerManager;
pub use runtime::{WorkerRuntime, WorkerState};
