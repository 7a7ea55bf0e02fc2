pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{ErrorClass, Result, WaypointError};
pub use types::*;
