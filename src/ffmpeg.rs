use std::path::{Path, PathBuf};
pub mod encoder;
pub mod parameter_factories;
pub mod probe;

/// Locations of the external programs the pipeline drives.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub gifsicle: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            gifsicle: PathBuf::from("gifsicle"),
        }
    }
}

impl Toolchain {
    pub fn new() -> Self {
        Toolchain::default()
    }

    pub fn ffmpeg(mut self, ffmpeg: PathBuf) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    pub fn ffprobe(mut self, ffprobe: PathBuf) -> Self {
        self.ffprobe = ffprobe;
        self
    }

    pub fn gifsicle(mut self, gifsicle: PathBuf) -> Self {
        self.gifsicle = gifsicle;
        self
    }

    pub fn is_installed(program: &Path) -> bool {
        which::which(program).is_ok()
    }

    /// Required programs that cannot be found. gifsicle is optional and
    /// only looked up when an optimization actually runs.
    pub fn missing(&self) -> Vec<&Path> {
        [self.ffmpeg.as_path(), self.ffprobe.as_path()]
            .into_iter()
            .filter(|program| !Toolchain::is_installed(program))
            .collect()
    }
}
