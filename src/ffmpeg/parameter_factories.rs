use std::ffi::OsString;
use std::path::Path;

use crate::planner::ClipPlan;

pub mod gif;
pub mod palette;

pub trait ParameterFactory {
    fn parameters(&self, input: &Path, output: &Path) -> Vec<OsString>;
}

/// Frame sampling and scaling. Both passes must run the exact same chain,
/// otherwise the palette is built from frames the encoder never sees.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameFilter {
    pub frame_rate: u32,
    pub width: Option<u32>,
}

impl FrameFilter {
    pub fn new(frame_rate: u32, width: Option<u32>) -> Self {
        FrameFilter { frame_rate, width }
    }

    pub fn chain(&self) -> String {
        match self.width {
            // -1 lets the scaler keep the aspect ratio
            Some(width) => format!("fps={},scale={}:-1", self.frame_rate, width),
            None => format!("fps={}", self.frame_rate),
        }
    }
}

fn os(s: &str) -> OsString { OsString::from(s) }

fn common_args() -> Vec<OsString> {
    vec![
        os("-hide_banner"), os("-nostats"),
        os("-loglevel"), os("warning"),
        os("-y"),
    ]
}

fn clip_args(plan: &ClipPlan, input: &Path) -> Vec<OsString> {
    vec![
        os("-ss"), OsString::from(format!("{:.3}", plan.start)),
        os("-t"), OsString::from(format!("{:.3}", plan.duration)),
        os("-i"), input.as_os_str().to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        assert_eq!(FrameFilter::new(15, None).chain(), "fps=15");
        assert_eq!(FrameFilter::new(10, Some(480)).chain(), "fps=10,scale=480:-1");
    }

    #[test]
    fn test_clip_args() {
        let plan = ClipPlan { start: 1.5, duration: 2.25, frame_rate: 10, total_frames: 22 };
        assert_eq!(
            clip_args(&plan, Path::new("in.mp4")),
            vec![os("-ss"), os("1.500"), os("-t"), os("2.250"), os("-i"), os("in.mp4")]);
    }
}
