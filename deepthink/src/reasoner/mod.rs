//! Upstream reasoning model access
//!
//! The thinking tool only needs `query -> text`; everything about the wire
//! format lives behind the [`Reasoner`] trait so tests can stub it out.

mod chat;

pub use chat::ChatCompletionsReasoner;

use async_trait::async_trait;

use crate::Result;

/// Trait for reasoning backends
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Send a single user query and return the model's textual answer.
    ///
    /// Any transport failure, non-2xx status, or unexpected response shape
    /// is reported as [`crate::Error::Upstream`].
    async fn think(&self, query: &str) -> Result<String>;

    /// Model identifier, used for logging
    fn model_name(&self) -> &str;
}
