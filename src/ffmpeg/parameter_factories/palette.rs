use std::ffi::OsString;
use std::path::Path;

use crate::planner::ClipPlan;
use super::{clip_args, common_args, os, FrameFilter, ParameterFactory};

/// First pass: one palette image built from the sampled clip.
pub struct PaletteParameterFactory {
    plan: ClipPlan,
    filter: FrameFilter,
}

impl PaletteParameterFactory {
    pub fn new(plan: ClipPlan, filter: FrameFilter) -> Self {
        PaletteParameterFactory { plan, filter }
    }
}

impl ParameterFactory for PaletteParameterFactory {
    fn parameters(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut params = common_args();
        params.append(&mut clip_args(&self.plan, input));

        // stats_mode=diff weighs what changes between frames over static background
        params.push(os("-vf"));
        params.push(OsString::from(format!("{},palettegen=stats_mode=diff", self.filter.chain())));

        params.push(os("-frames:v"));
        params.push(os("1"));
        params.push(os("-update"));
        params.push(os("1"));
        params.push(output.as_os_str().to_owned());
        params
    }
}
