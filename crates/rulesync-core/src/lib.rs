pub mod config;
pub mod controller;
pub mod diff;
pub mod error;
pub mod executor;
pub mod io;
pub mod manifest;
pub mod parser;
pub mod paths;
pub mod pending;
pub mod persistence;
pub mod reconcile;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

pub use controller::{ControllerStatus, SyncController, SyncReport};
pub use error::{Result, RuleSyncError};
pub use types::{Rule, RuleConflict, RuleMetadata, SyncStatus};
