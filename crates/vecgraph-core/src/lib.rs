pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, VecgraphConfig};
pub use error::{Result, VecgraphError};
pub use types::*;
