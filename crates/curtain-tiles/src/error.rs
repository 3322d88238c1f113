use curtain_tiles_lib::CurtainError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid GPX in {}: {message}", .path.display())]
    Gpx { path: PathBuf, message: String },

    #[error("No path given: pass --gpx or at least two --waypoint values")]
    NoPath,

    #[error("Failed to write summary: {0}")]
    Summary(String),

    #[error(transparent)]
    Curtain(#[from] CurtainError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type AppResult<T> = Result<T, AppError>;
