use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Invalid or missing configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external command exited unsuccessfully.
    #[error("{0}")]
    Execution(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SnapshotError {
    pub fn config(msg: impl Into<String>) -> Self {
        SnapshotError::Configuration(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        SnapshotError::Execution(msg.into())
    }

    #[cfg(test)]
    pub fn is_configuration(&self) -> bool {
        matches!(self, SnapshotError::Configuration(_))
    }
}
