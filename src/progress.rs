use std::fmt::Display;

use crate::converter::ConversionStage;

const LOG_EVERY_N_FRAMES: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConversionProgress {
    pub frames_done: u64,
    pub total_frames: u64,
    pub percent: f64,
}

impl ConversionProgress {
    pub fn new(frames_done: u64, total_frames: u64) -> Self {
        let percent = match total_frames {
            0 => 0.0,
            _ => f64::min(100.0, (frames_done as f64) / (total_frames as f64) * 100.0),
        };
        ConversionProgress { frames_done, total_frames, percent }
    }

    pub fn complete(frames_done: u64, total_frames: u64) -> Self {
        ConversionProgress { frames_done, total_frames, percent: 100.0 }
    }
}

impl Display for ConversionProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Converting: {}/{} frames ({:.1}%)", self.frames_done, self.total_frames, self.percent)
    }
}

/// Receives what a running conversion reports. Called inline on the
/// conversion thread, so implementations must return quickly.
pub trait ConversionObserver {
    fn progress(&mut self, progress: ConversionProgress);

    fn stage(&mut self, _stage: ConversionStage) {}
}

impl<F: FnMut(ConversionProgress)> ConversionObserver for F {
    fn progress(&mut self, progress: ConversionProgress) {
        self(progress)
    }
}

#[derive(Debug, Default)]
struct EncodeStatus {
    pub frame: u64,
    pub fps: f64,
    pub total_size: u64,
}

enum FFmpegStdoutResult {
    Continue,
    Render,
}

/// Turns the key=value blocks ffmpeg writes with `-progress pipe:1` into
/// `ConversionProgress` events. Frame counts never go backwards.
pub struct ProgressTracker<'a> {
    total_frames: u64,
    last_frame: u64,
    status: EncodeStatus,
    observer: &'a mut dyn ConversionObserver,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total_frames: u64, observer: &'a mut dyn ConversionObserver) -> Self {
        ProgressTracker {
            total_frames,
            last_frame: 0,
            status: EncodeStatus::default(),
            observer,
        }
    }

    pub fn last_frame(&self) -> u64 {
        self.last_frame
    }

    pub fn handle_line(&mut self, line: &str) {
        match handle_ffmpeg_stdout_line(line, &mut self.status) {
            FFmpegStdoutResult::Continue => (),
            FFmpegStdoutResult::Render => self.report(),
        }
    }

    fn report(&mut self) {
        let frame = u64::max(self.last_frame, self.status.frame);
        self.last_frame = frame;
        let progress = ConversionProgress::new(frame, self.total_frames);

        // the log is throttled, the observer sees every update
        if frame % LOG_EVERY_N_FRAMES == 0 || frame == self.total_frames {
            tracing::info!("Progress: {}/{} frames ({:.1}%)", frame, self.total_frames, progress.percent);
            tracing::debug!(fps = self.status.fps, total_size = self.status.total_size, "encoder status");
        }
        self.observer.progress(progress);
    }
}

fn handle_ffmpeg_stdout_line(line: &str, status: &mut EncodeStatus) -> FFmpegStdoutResult {
    match line.trim().split_once('=') {
        Some((key, value)) => match key {
            "frame" => {
                status.frame = value.trim().parse().unwrap_or(status.frame);
                FFmpegStdoutResult::Continue
            },
            "fps" => {
                status.fps = value.trim().parse().unwrap_or(status.fps);
                FFmpegStdoutResult::Continue
            },
            "total_size" => {
                status.total_size = value.trim().parse().unwrap_or(status.total_size);
                FFmpegStdoutResult::Continue
            },
            "progress" => FFmpegStdoutResult::Render,
            _ => FFmpegStdoutResult::Continue,
        },
        None => FFmpegStdoutResult::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(total_frames: u64, lines: &[&str]) -> Vec<ConversionProgress> {
        let mut events = vec![];
        let mut sink = |p: ConversionProgress| events.push(p);
        {
            let mut tracker = ProgressTracker::new(total_frames, &mut sink);
            for line in lines {
                tracker.handle_line(line);
            }
        }
        events
    }

    #[test]
    fn test_percent() {
        assert_eq!(ConversionProgress::new(50, 200).percent, 25.0);
        assert_eq!(ConversionProgress::new(250, 200).percent, 100.0);
        assert_eq!(ConversionProgress::new(5, 0).percent, 0.0);
        assert_eq!(ConversionProgress::complete(0, 0).percent, 100.0);
    }

    #[test]
    fn test_ffmpeg_progress_blocks() {
        let events = feed(75, &[
            "frame=12", "fps=24.00", "stream_0_0_q=-0.0", "total_size=104857", "out_time=00:00:00.800000", "speed=1.6x", "progress=continue",
            "frame=75", "fps=25.00", "total_size=654321", "progress=end",
        ]);
        assert_eq!(events, vec![ConversionProgress::new(12, 75), ConversionProgress::new(75, 75)]);
        assert_eq!(events[1].percent, 100.0);
    }

    #[test]
    fn test_every_update_is_forwarded() {
        let mut lines = vec![];
        let frames: Vec<String> = (1..=23).map(|n| format!("frame={}", n)).collect();
        for frame in &frames {
            lines.push(frame.as_str());
            lines.push("progress=continue");
        }
        let events = feed(23, &lines);
        assert_eq!(events.len(), 23);
        assert_eq!(events.last().unwrap().percent, 100.0);
    }

    #[test]
    fn test_frames_never_go_backwards() {
        let events = feed(100, &[
            "frame=40", "progress=continue",
            "frame=30", "progress=continue",
            "frame=garbage", "progress=continue",
            "frame=90", "progress=continue",
        ]);
        let frames: Vec<u64> = events.iter().map(|e| e.frames_done).collect();
        assert_eq!(frames, vec![40, 40, 40, 90]);
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    }

    #[test]
    fn test_ignores_noise() {
        let events = feed(10, &["", "Press [q] to stop", "bitrate=N/A", "frame=3"]);
        assert!(events.is_empty());
    }
}
