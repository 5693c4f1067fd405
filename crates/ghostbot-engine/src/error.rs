use ghostbot_contracts::color::ColorError;
use ghostbot_contracts::grid::GridCoordinate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid color format: {0}")]
    InvalidColorFormat(String),
    #[error("tile {tile:?} could not be decoded: {reason}")]
    TileDecode {
        tile: Option<GridCoordinate>,
        reason: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication expired")]
    AuthExpired,
    #[error("ghost image not loaded: {0}")]
    ImageNotLoaded(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("canvas sync superseded by a reload {attempts} times")]
    SyncSuperseded { attempts: usize },
}

impl From<ColorError> for EngineError {
    fn from(err: ColorError) -> Self {
        match err {
            ColorError::InvalidColorFormat(text) => Self::InvalidColorFormat(text),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
