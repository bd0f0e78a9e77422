use std::path::PathBuf;

use crate::error::ConversionError;

pub const DEFAULT_FRAME_RATE: u32 = 15;
pub const DEFAULT_QUALITY: u32 = 10;
pub const MAX_FRAME_RATE: u32 = 30;
pub const MAX_QUALITY: u32 = 31;

/// Everything the caller decides about one conversion. The pipeline only
/// reads it.
///
/// `quality` (1 is best, 31 worst) is validated and logged but does not
/// change the filter chain or the optimizer settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start_time: f64,
    pub clip_duration: Option<f64>,
    pub frame_rate: u32,
    pub width: Option<u32>,
    pub quality: u32,
    pub optimize: bool,
}

impl ConversionRequest {
    pub fn new(input: PathBuf, output: PathBuf) -> Self {
        ConversionRequest {
            input,
            output,
            start_time: 0.0,
            clip_duration: None,
            frame_rate: DEFAULT_FRAME_RATE,
            width: None,
            quality: DEFAULT_QUALITY,
            optimize: true,
        }
    }

    pub fn start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn clip_duration(mut self, clip_duration: Option<f64>) -> Self {
        self.clip_duration = clip_duration;
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    pub fn quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        if !(self.start_time.is_finite() && self.start_time >= 0.0) {
            return Err(invalid(format!("start time must be >= 0, got {}", self.start_time)));
        }
        if let Some(d) = self.clip_duration {
            if !(d.is_finite() && d > 0.0) {
                return Err(invalid(format!("clip duration must be > 0, got {}", d)));
            }
        }
        if !(1..=MAX_FRAME_RATE).contains(&self.frame_rate) {
            return Err(invalid(format!("frame rate must be within 1..={}, got {}", MAX_FRAME_RATE, self.frame_rate)));
        }
        if self.width == Some(0) {
            return Err(invalid(String::from("width must be > 0")));
        }
        if !(1..=MAX_QUALITY).contains(&self.quality) {
            return Err(invalid(format!("quality must be within 1..={}, got {}", MAX_QUALITY, self.quality)));
        }
        if self.input == self.output {
            return Err(invalid(String::from("output would overwrite the input")));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConversionError {
    ConversionError::InvalidRequest(msg)
}

/// `clip.mp4` becomes `clip.gif`; a gif input gets `.converted.gif` so the
/// source is never the destination.
pub fn default_output_path(input: &PathBuf) -> PathBuf {
    let is_gif = input.extension().is_some_and(|e| e.eq_ignore_ascii_case("gif"));
    let mut out = input.clone();
    match is_gif {
        true => out.set_extension("converted.gif"),
        false => out.set_extension("gif"),
    };
    out
}
