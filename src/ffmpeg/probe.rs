use std::fmt::Display;
use std::path::Path;
use std::process::{Command, Stdio};
use serde::{Deserialize, Serialize};
use serde_json;

use crate::error::ProbeError;
use crate::ffmpeg::Toolchain;

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What the pipeline needs to know about a source video. Every field has
/// been validated: duration, dimensions and frame rate are all positive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: u64,
    pub height: u64,
    pub frame_rate: f64,
    pub codec: String,
    pub total_frames: u64,
    pub format_name: String,
}

impl MediaInfo {
    pub fn resolution(&self) -> Resolution {
        Resolution { width: self.width, height: self.height }
    }
}

impl Display for MediaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {:.3}fps {:.2}s ~{} frames ({})",
            self.codec,
            self.resolution(),
            self.frame_rate,
            self.duration,
            self.total_frames,
            self.format_name)
    }
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonOutput {
    #[serde(default)]
    pub streams: Vec<FFProbeJsonStream>,
    pub format: Option<FFProbeJsonFormat>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonFormat {
    pub duration: Option<String>,
    pub format_long_name: Option<String>,
}

pub fn probe_file(tools: &Toolchain, path: &Path) -> Result<MediaInfo, ProbeError> {
    let output = Command::new(&tools.ffprobe)
        .args(["-v", "error", "-of", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| ProbeError::invocation(path, &format!("unable to run {}: {}", tools.ffprobe.display(), err)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::invocation(path, &format!("ffprobe did not exit successfully: {}", stderr.trim())));
    }

    let utf8 = String::from_utf8_lossy(&output.stdout);
    let info = parse_probe_output(path, &utf8)?;
    tracing::debug!(path = ?path, info = %info, "probed");
    Ok(info)
}

pub fn parse_probe_output(path: &Path, json: &str) -> Result<MediaInfo, ProbeError> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)
        .map_err(|err| ProbeError::invocation(path, &format!("unreadable ffprobe output: {}", err)))?;

    let stream = deserialized.streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream { path: path.to_path_buf() })?;

    let format_duration = deserialized.format.as_ref().and_then(|f| f.duration.as_deref());
    let duration = match parse_duration(stream.duration.as_deref()) {
        d if d > 0.0 => d,
        _ => parse_duration(format_duration),
    };
    if duration <= 0.0 {
        return Err(ProbeError::UnknownDuration { path: path.to_path_buf() });
    }

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let frame_rate = parse_frame_rate(stream.r_frame_rate.as_deref().unwrap_or("0/1"));
    if frame_rate <= 0.0 || width == 0 || height == 0 {
        return Err(ProbeError::InvalidVideoParameters {
            path: path.to_path_buf(),
            frame_rate,
            width,
            height,
        });
    }

    Ok(MediaInfo {
        duration,
        width,
        height,
        frame_rate,
        codec: stream.codec_name.clone().unwrap_or_else(|| String::from("unknown")),
        total_frames: (duration * frame_rate).floor() as u64,
        format_name: deserialized.format
            .and_then(|f| f.format_long_name)
            .unwrap_or_else(|| String::from("unknown")),
    })
}

// ffprobe reports durations as strings, and "N/A" when it has none
fn parse_duration(duration: Option<&str>) -> f64 {
    match duration.map(|d| d.trim().parse::<f64>()) {
        Some(Ok(d)) if d.is_finite() && d > 0.0 => d,
        _ => 0.0,
    }
}

/// Anything unparsable, infinite or with a zero denominator comes back as 0.
fn parse_frame_rate(frame_rate: &str) -> f64 {
    let rate = match frame_rate.split_once('/') {
        Some((num, denom)) => match (num.trim().parse::<f64>(), denom.trim().parse::<f64>()) {
            (Ok(num), Ok(denom)) if denom != 0.0 => num / denom,
            _ => 0.0,
        },
        None => frame_rate.trim().parse::<f64>().unwrap_or(0.0),
    };
    if rate.is_finite() { rate } else { 0.0 }
}
