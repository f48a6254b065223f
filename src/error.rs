use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Not joined to a room")]
    NotJoined,

    #[error("Hub connection is closed")]
    Disconnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("UI error: {0}")]
    Ui(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Box<dyn std::error::Error>> for ChatError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        ChatError::Transport(err.to_string())
    }
}
