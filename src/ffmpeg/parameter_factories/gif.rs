use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::planner::ClipPlan;
use super::{clip_args, common_args, os, FrameFilter, ParameterFactory};

const DITHER: &str = "sierra2_4a";

/// Second pass: maps the sampled clip onto the palette and writes a gif
/// that loops forever. Progress goes to stdout.
pub struct GifParameterFactory {
    plan: ClipPlan,
    filter: FrameFilter,
    palette: PathBuf,
}

impl GifParameterFactory {
    pub fn new(plan: ClipPlan, filter: FrameFilter, palette: PathBuf) -> Self {
        GifParameterFactory { plan, filter, palette }
    }
}

impl ParameterFactory for GifParameterFactory {
    fn parameters(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut params = common_args();
        params.push(os("-progress"));
        params.push(os("pipe:1"));
        params.append(&mut clip_args(&self.plan, input));
        params.push(os("-i"));
        params.push(self.palette.as_os_str().to_owned());

        params.push(os("-lavfi"));
        params.push(OsString::from(format!(
            "[0:v]{}[x];[x][1:v]paletteuse=dither={}",
            self.filter.chain(),
            DITHER)));

        params.push(os("-loop"));
        params.push(os("0"));
        params.push(os("-r"));
        params.push(OsString::from(self.plan.frame_rate.to_string()));
        params.push(output.as_os_str().to_owned());
        params
    }
}
