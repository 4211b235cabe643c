pub mod application;
pub mod batch;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod library;
pub mod signals;
pub mod types;
pub mod workspace;

#[cfg(test)]
pub mod test_helpers;

// Re-export main types
pub use types::*;

pub use application::Application;
pub use coordinator::{Coordinator, CoordinatorBuilder, WorkspaceEvent};
pub use error::CoordinatorError;

// Re-export init API for convenience
pub use application::{initialize, InitBuilder, InitOptions};
