pub mod config;
pub mod protocol;

/// Default chat server the client connects to.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
