use thiserror::Error;

use crate::instance::InstanceId;

pub type Result<T> = std::result::Result<T, TerminalError>;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to spawn shell '{executable}': {reason}")]
    Spawn { executable: String, reason: String },
    #[error("terminal instance {0} not found")]
    NotFound(InstanceId),
    #[error("terminal index {index} out of range for {len} instances")]
    InvalidIndex { index: usize, len: usize },
    #[error("maximum concurrent terminal instances ({0}) reached")]
    LimitReached(usize),
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error("invalid terminal configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TerminalError {
    /// Build a spawn error from any collaborator failure, keeping the full cause chain
    pub fn spawn(executable: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Spawn {
            executable: executable.into(),
            reason: format!("{:#}", err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
