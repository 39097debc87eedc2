pub mod api;
pub mod config;
pub mod error;
pub mod mcp;
pub mod port;
pub mod reasoner;

pub use config::Config;
pub use error::{Error, Result};
