use thiserror::Error;

use super::{ConfigError, ControlError, RunnerError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("HTTP client error: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },
    #[error("WebSocket error: {source}")]
    WebSocket {
        #[from]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Control channel error: {0}")]
    Control(#[from] ControlError),
    #[error("Test runner error: {0}")]
    Runner(#[from] RunnerError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn control<E>(error: E) -> Self
    where
        E: Into<ControlError>,
    {
        error.into().into()
    }

    pub fn runner<E>(error: E) -> Self
    where
        E: Into<RunnerError>,
    {
        error.into().into()
    }
}
