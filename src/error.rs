//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug)]
pub enum ChatError {
    /// Network-related errors (read/write/accept failures)
    Network(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol errors (bad framing, missing or unknown discriminator)
    Protocol(String),
    /// Configuration error (bad arguments, bind failure)
    Config(String),
}

impl ChatError {
    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Network(msg) => msg,
            ChatError::Serialization(msg) => msg,
            ChatError::Protocol(msg) => msg,
            ChatError::Config(msg) => msg,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<bincode::Error> for ChatError {
    fn from(err: bincode::Error) -> Self {
        ChatError::Serialization(format!("binary codec error: {}", err))
    }
}
