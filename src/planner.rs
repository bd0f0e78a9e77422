use tracing::warn;

use crate::ffmpeg::probe::MediaInfo;
use crate::request::ConversionRequest;

/// The window of the source that gets converted, and how many frames the
/// encode pass is expected to produce for it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipPlan {
    pub start: f64,
    pub duration: f64,
    pub frame_rate: u32,
    pub total_frames: u64,
}

impl ClipPlan {
    /// `start` is taken as given. A start at or past the end of the source
    /// yields a non-positive duration; that is left for ffmpeg to fail on.
    pub fn new(info: &MediaInfo, request: &ConversionRequest) -> Self {
        let remaining = info.duration - request.start_time;
        let duration = match request.clip_duration {
            Some(clip) => f64::min(remaining, clip),
            None => remaining,
        };

        ClipPlan {
            start: request.start_time,
            duration,
            frame_rate: request.frame_rate,
            // saturates to 0 for an empty window
            total_frames: (duration * request.frame_rate as f64).floor() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.duration <= 0.0
    }
}

/// The requested width, never wider than the source.
pub fn output_width(info: &MediaInfo, request: &ConversionRequest) -> Option<u32> {
    let source = u32::try_from(info.width).unwrap_or(u32::MAX);
    match request.width {
        Some(width) if width > source => {
            warn!(requested = width, source, "requested width exceeds the source; keeping the source width");
            Some(source)
        },
        width => width,
    }
}
