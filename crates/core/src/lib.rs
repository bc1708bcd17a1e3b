pub mod config;
pub mod error;
pub mod event_bus;
pub mod seed;
pub mod types;

pub use config::AppConfig;
pub use error::{ForgeError, ForgeResult};
pub use seed::SeedContext;
