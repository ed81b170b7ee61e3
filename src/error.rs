use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{}:{}: cannot parse {:?} as a tilt angle", .path.display(), .line, .text)]
    AngleParse {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{}: no value for {:?} found in acquisition parameters", .path.display(), .field)]
    MissingField { path: PathBuf, field: &'static str },

    #[error("start angle {start_angle:.1} not found in tilt angle list")]
    SequenceMismatch { start_angle: f64 },

    #[error("stack has {frames} frames, but {angles} tilt angles were given")]
    Bounds { frames: usize, angles: usize },

    #[error("frame {frame} out of range for a stack of {frames} frames")]
    FrameOutOfRange { frame: usize, frames: usize },

    #[error("unsupported stack: {0}")]
    UnsupportedStack(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
