pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{BanditError, BanditResult, RotationError, RotationResult, StoreError, StoreResult};
