use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No video stream found in {path:?}")]
    NoVideoStream { path: PathBuf },

    #[error("Could not determine video duration of {path:?}")]
    UnknownDuration { path: PathBuf },

    #[error("Invalid video parameters in {path:?} (fps={frame_rate}, width={width}, height={height})")]
    InvalidVideoParameters {
        path: PathBuf,
        frame_rate: f64,
        width: u64,
        height: u64,
    },

    #[error("Failed to probe {path:?}: {msg}")]
    ToolInvocationFailed { path: PathBuf, msg: String },
}

impl ProbeError {
    pub fn invocation(path: &Path, msg: &str) -> Self {
        ProbeError::ToolInvocationFailed {
            path: path.to_path_buf(),
            msg: String::from(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Palette generation failed: {msg}")]
    PaletteGenerationFailed { msg: String },

    #[error("Output GIF was not created: {path:?}")]
    OutputNotCreated { path: PathBuf },

    #[error("{program} failed: {msg}")]
    ToolFailed { program: String, msg: String },

    #[error("Unable to run {program}: {msg}")]
    ToolInvocationFailed { program: String, msg: String },
}

impl EncodeError {
    pub fn failed(program: &Path, msg: &str) -> Self {
        EncodeError::ToolFailed {
            program: program.display().to_string(),
            msg: String::from(msg),
        }
    }

    pub fn invocation(program: &Path, msg: &str) -> Self {
        EncodeError::ToolInvocationFailed {
            program: program.display().to_string(),
            msg: String::from(msg),
        }
    }
}

/// Fatal errors of one conversion. Optimizer problems never end up here.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Input file not found: {0:?}")]
    InputNotFound(PathBuf),

    #[error("Input is not a regular file: {0:?}")]
    InputNotAFile(PathBuf),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
