//! Configuration for calendar resources.

mod engine;
mod manager;
mod store;

pub use engine::{EngineConfig, StandardConflictPolicy};
pub use manager::{ConfigManager, NewResource, RemovalTicket};
pub use store::ConfigStore;
