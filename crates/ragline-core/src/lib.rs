//! Configuration, secrets, and wiring of the retrieval pipeline.

pub mod bootstrap;
pub mod config;
pub mod vault;

pub use bootstrap::App;
pub use config::Config;
