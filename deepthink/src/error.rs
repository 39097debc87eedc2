use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid input schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session is busy: {0}")]
    SessionBusy(String),

    #[error("Too many concurrent sessions (limit {0})")]
    TooManySessions(usize),

    #[error("No available port in {start}..{end} after {attempts} attempts")]
    NoAvailablePort { start: u16, end: u32, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
