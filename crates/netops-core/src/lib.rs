pub mod config;
pub mod error;
pub mod inventory;

pub mod backoff;
pub mod progress;
pub mod telemetry;

pub mod systems;
pub mod transport;

pub mod export;
pub mod mass_config;
pub mod orchestrator;
pub mod passwords;
pub mod report;
pub mod upload;

pub use error::{NetopsError, Result};
