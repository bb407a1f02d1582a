pub mod config;
pub mod error;
pub mod event;
pub mod security;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use error::{CodexError, Result};
pub use event::EventBus;
pub use types::*;
