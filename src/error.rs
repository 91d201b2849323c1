use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("log path is empty")]
    EmptyPath,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to watch log directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("malformed item table: {0}")]
    Json(#[from] serde_json::Error),
}
