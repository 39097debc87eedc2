//! HTTP surface: the SSE subscribe endpoint, the message endpoint and health

mod error;
pub mod server;

pub use server::{ApiServer, AppState, MESSAGES_PATH, SSE_PATH};
