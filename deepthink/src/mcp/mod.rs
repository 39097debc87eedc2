//! MCP (Model Context Protocol) support for deepthink
//!
//! This module provides HTTP SSE-based MCP transport with:
//! - SessionManager: Multi-client SSE connection management
//! - McpHandler: JSON-RPC 2.0 request handling
//! - ToolRegistry: Static tool registration and lookup

pub mod handler;
pub mod session;
pub mod tools;

pub use handler::{CallToolResult, Content, JsonRpcRequest, JsonRpcResponse, McpHandler};
pub use session::{Session, SessionManager, SessionState, SseEvent};
pub use tools::{McpTool, ToolDescriptor, ToolRegistry, THINKING_TOOL};
