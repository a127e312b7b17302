use std::path::PathBuf;

/// Errors surfaced by the library. Core game and agent operations are total;
/// these only come from conversion, configuration and I/O boundaries.
#[derive(thiserror::Error, Debug)]
pub enum SnakeError {
    #[error("invalid action index: {0} (expected 0, 1 or 2)")]
    InvalidAction(u8),
    #[error("invalid direction index: {0} (expected 0..4)")]
    InvalidDirection(u8),
    #[error("board {width}x{height} is too small: need at least two cells")]
    BoardTooSmall { width: u16, height: u16 },
    #[error("invalid agent config: {0}")]
    InvalidAgentConfig(String),
    #[error("trainer has been destroyed")]
    Destroyed,
    #[error("no tokio runtime available to spawn the training loop")]
    NoRuntime,
    #[error("failed to read config {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    ConfigParse(#[from] serde_json::Error),
    #[error("failed to encode q-table snapshot")]
    SnapshotEncode(#[from] bincode::error::EncodeError),
    #[error("failed to decode q-table snapshot")]
    SnapshotDecode(#[from] bincode::error::DecodeError),
    #[error("q-table snapshot holds an invalid state key {0:#x}")]
    CorruptSnapshot(u16),
}

pub type Result<T> = std::result::Result<T, SnakeError>;
