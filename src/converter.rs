use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use human_repr::HumanCount;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use crate::error::{ConversionError, EncodeError, ProbeError};
use crate::ffmpeg::Toolchain;
use crate::ffmpeg::encoder::{GifEncoder, PassOutcome};
use crate::ffmpeg::parameter_factories::FrameFilter;
use crate::ffmpeg::parameter_factories::gif::GifParameterFactory;
use crate::ffmpeg::parameter_factories::palette::PaletteParameterFactory;
use crate::ffmpeg::probe::{probe_file, MediaInfo};
use crate::fstools::{classify_file, file_size, DirEntryCategory};
use crate::optimizer::GifOptimizer;
use crate::planner::{output_width, ClipPlan};
use crate::progress::{ConversionObserver, ConversionProgress};
use crate::request::ConversionRequest;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConversionStage {
    Idle,
    Probing,
    Planning,
    GeneratingPalette,
    Encoding,
    Optimizing,
    Done,
    Cancelled,
    Failed,
}

impl Display for ConversionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversionStage::Idle => "idle",
            ConversionStage::Probing => "probing input",
            ConversionStage::Planning => "planning clip",
            ConversionStage::GeneratingPalette => "generating palette",
            ConversionStage::Encoding => "encoding gif",
            ConversionStage::Optimizing => "optimizing gif",
            ConversionStage::Done => "done",
            ConversionStage::Cancelled => "cancelled",
            ConversionStage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionResult {
    pub succeeded: bool,
    /// Empty when optimization was disabled.
    pub optimization_summary: String,
}

impl ConversionResult {
    pub fn completed(optimization_summary: String) -> Self {
        ConversionResult { succeeded: true, optimization_summary }
    }

    pub fn cancelled() -> Self {
        ConversionResult { succeeded: false, optimization_summary: String::new() }
    }

    pub fn message(&self) -> String {
        match (self.succeeded, self.optimization_summary.is_empty()) {
            (false, _) => String::from("Conversion was cancelled."),
            (true, true) => String::from("Conversion completed successfully!"),
            (true, false) => format!("Conversion completed successfully!\n{}", self.optimization_summary),
        }
    }
}

/// The palette image shared by the two ffmpeg passes. Owned by exactly one
/// run and deleted when dropped.
struct PaletteArtifact {
    path: TempPath,
}

impl PaletteArtifact {
    fn create(temp_dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("palette-").suffix(".png");
        let file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(PaletteArtifact { path: file.into_temp_path() })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(self) {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => debug!(?path, "palette removed"),
            Err(err) => warn!(?path, %err, "unable to remove palette"),
        }
    }
}

/// Drives one request through probe, plan, palette, encode and optimize.
///
/// Setting the stop flag (see [`Converter::cancel`]) kills whichever ffmpeg
/// pass is running. A run stopped before the gif is complete reports
/// `ConversionResult::cancelled()` and leaves no output behind; a stop that
/// arrives after encoding only skips the optimizer.
pub struct Converter {
    tools: Toolchain,
    stop: Arc<AtomicBool>,
    temp_dir: Option<PathBuf>,
    media_info: Option<(PathBuf, MediaInfo)>,
    stage: ConversionStage,
}

impl Converter {
    pub fn new(tools: Toolchain) -> Self {
        Converter {
            tools,
            stop: Arc::new(AtomicBool::new(false)),
            temp_dir: None,
            media_info: None,
            stage: ConversionStage::Idle,
        }
    }

    /// Where the palette is written. Defaults to the system temp directory.
    pub fn temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = Some(temp_dir);
        self
    }

    /// Seeds the probe cache, e.g. with the result of an earlier `--info`.
    pub fn with_media_info(mut self, input: PathBuf, info: MediaInfo) -> Self {
        self.media_info = Some((input, info));
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stage(&self) -> ConversionStage {
        self.stage
    }

    pub fn media_info(&mut self, input: &Path) -> Result<MediaInfo, ProbeError> {
        if let Some((path, info)) = &self.media_info {
            if path == input {
                debug!(?input, "using cached media info");
                return Ok(info.clone());
            }
        }

        let info = probe_file(&self.tools, input)?;
        info!("Video info: {}", info);
        self.media_info = Some((input.to_path_buf(), info.clone()));
        Ok(info)
    }

    pub fn convert(&mut self, request: &ConversionRequest, observer: &mut dyn ConversionObserver) -> Result<ConversionResult, ConversionError> {
        let started = Instant::now();
        let result = self.run(request, observer);

        let stage = match &result {
            Ok(r) if r.succeeded => ConversionStage::Done,
            Ok(_) => ConversionStage::Cancelled,
            Err(_) => ConversionStage::Failed,
        };
        self.enter(stage, observer);

        match &result {
            Ok(r) => info!("{} ({:.1}s)", r.message().replace('\n', " "), started.elapsed().as_secs_f64()),
            Err(err) => error!(%err, "Error during conversion"),
        }
        result
    }

    fn run(&mut self, request: &ConversionRequest, observer: &mut dyn ConversionObserver) -> Result<ConversionResult, ConversionError> {
        request.validate()?;
        match classify_file(&request.input) {
            DirEntryCategory::RegularFile => (),
            DirEntryCategory::DoesNotExist => return Err(ConversionError::InputNotFound(request.input.clone())),
            _ => return Err(ConversionError::InputNotAFile(request.input.clone())),
        }

        info!(
            input = ?request.input,
            output = ?request.output,
            start = request.start_time,
            clip = ?request.clip_duration,
            fps = request.frame_rate,
            width = ?request.width,
            quality = request.quality,
            optimize = request.optimize,
            "Starting conversion");
        // quality is accepted for compatibility only
        debug!(quality = request.quality, "quality does not affect the filter chain");

        if self.should_stop() {
            return Ok(self.cancelled_by("before probing"));
        }
        self.enter(ConversionStage::Probing, observer);
        let info = self.media_info(&request.input)?;

        if self.should_stop() {
            return Ok(self.cancelled_by("after probing"));
        }
        self.enter(ConversionStage::Planning, observer);
        let plan = ClipPlan::new(&info, request);
        if plan.is_empty() {
            warn!(start = plan.start, duration = info.duration, "clip window is empty; ffmpeg will likely produce nothing");
        }
        info!("Clip: {:.2}s from {:.2}s at {} fps, {} frames", plan.duration, plan.start, plan.frame_rate, plan.total_frames);
        let filter = FrameFilter::new(plan.frame_rate, output_width(&info, request));

        let palette = PaletteArtifact::create(self.temp_dir.as_deref())?;
        let encoded = self.encode(request, plan, filter, &palette, observer);
        palette.remove();

        let frames = match encoded {
            Ok(PassOutcome::Completed { frames }) => frames,
            Ok(PassOutcome::Stopped) => return Ok(self.cancelled_by("during encoding")),
            Err(err) if self.should_stop() => {
                // a killed ffmpeg tends to fail in creative ways
                debug!(%err, "pass failed after stop request");
                return Ok(self.cancelled_by("during encoding"));
            },
            Err(err) => return Err(err.into()),
        };

        info!("GIF created: {:?} ({})", request.output, file_size(&request.output).human_count_bytes());
        observer.progress(ConversionProgress::complete(u64::max(frames, plan.total_frames), plan.total_frames));

        let summary = if !request.optimize {
            String::new()
        } else if self.should_stop() {
            info!("stop requested after encoding; keeping the unoptimized gif");
            String::from("Optimization skipped: conversion was cancelled")
        } else {
            self.enter(ConversionStage::Optimizing, observer);
            let outcome = GifOptimizer::new(self.tools.gifsicle.clone()).optimize(&request.output);
            if outcome.succeeded() {
                info!("GIF optimized: {:?} ({})", request.output, file_size(&request.output).human_count_bytes());
            }
            outcome.summary()
        };

        Ok(ConversionResult::completed(summary))
    }

    fn encode(
        &mut self,
        request: &ConversionRequest,
        plan: ClipPlan,
        filter: FrameFilter,
        palette: &PaletteArtifact,
        observer: &mut dyn ConversionObserver,
    ) -> Result<PassOutcome, EncodeError> {
        let encoder = GifEncoder::new(self.tools.ffmpeg.clone(), Arc::clone(&self.stop));

        self.enter(ConversionStage::GeneratingPalette, observer);
        let started = Instant::now();
        let parameters = PaletteParameterFactory::new(plan, filter.clone());
        if encoder.generate_palette(&request.input, palette.path(), &parameters)? == PassOutcome::Stopped {
            return Ok(PassOutcome::Stopped);
        }
        info!(
            "Palette generated in {:.1}s ({})",
            started.elapsed().as_secs_f64(),
            file_size(palette.path()).human_count_bytes());

        if self.should_stop() {
            return Ok(PassOutcome::Stopped);
        }
        self.enter(ConversionStage::Encoding, observer);
        let started = Instant::now();
        let parameters = GifParameterFactory::new(plan, filter, palette.path().to_path_buf());
        let outcome = encoder.encode_gif(&request.input, &request.output, &parameters, plan.total_frames, observer)?;
        if let PassOutcome::Completed { frames } = outcome {
            info!("Encoded {} frames in {:.1}s", frames, started.elapsed().as_secs_f64());
        }
        Ok(outcome)
    }

    fn enter(&mut self, stage: ConversionStage, observer: &mut dyn ConversionObserver) {
        debug!(from = %self.stage, to = %stage, "stage change");
        self.stage = stage;
        observer.stage(stage);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn cancelled_by(&self, when: &str) -> ConversionResult {
        warn!("Conversion cancelled {}", when);
        ConversionResult::cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[derive(Default)]
    struct Recorder {
        stages: Vec<ConversionStage>,
        progress: Vec<ConversionProgress>,
    }

    impl ConversionObserver for Recorder {
        fn progress(&mut self, progress: ConversionProgress) {
            self.progress.push(progress);
        }

        fn stage(&mut self, stage: ConversionStage) {
            self.stages.push(stage);
        }
    }

    fn media_info() -> MediaInfo {
        MediaInfo {
            duration: 10.0,
            width: 640,
            height: 360,
            frame_rate: 30.0,
            codec: String::from("h264"),
            total_frames: 300,
            format_name: String::from("QuickTime / MOV"),
        }
    }

    fn missing_tools() -> Toolchain {
        Toolchain::new()
            .ffmpeg(PathBuf::from("gif-forge-no-such-ffmpeg"))
            .ffprobe(PathBuf::from("gif-forge-no-such-ffprobe"))
            .gifsicle(PathBuf::from("gif-forge-no-such-gifsicle"))
    }

    // a workspace with an input file and an empty directory for palettes
    fn workspace() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        fs::write(&input, b"not really a video").unwrap();
        let palettes = dir.path().join("palettes");
        fs::create_dir(&palettes).unwrap();
        (dir, input, palettes)
    }

    fn is_empty_dir(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_result_message() {
        assert_eq!(ConversionResult::completed(String::new()).message(), "Conversion completed successfully!");
        assert_eq!(
            ConversionResult::completed(String::from("Optimization skipped: gifsicle is not installed")).message(),
            "Conversion completed successfully!\nOptimization skipped: gifsicle is not installed");
        assert_eq!(ConversionResult::cancelled().message(), "Conversion was cancelled.");
        assert!(!ConversionResult::cancelled().succeeded);
    }

    #[test]
    fn test_cancel_before_start() {
        let (dir, input, _) = workspace();
        let output = dir.path().join("clip.gif");
        let mut converter = Converter::new(missing_tools());
        converter.cancel();

        let mut recorder = Recorder::default();
        let result = converter.convert(&ConversionRequest::new(input, output.clone()), &mut recorder).unwrap();
        assert_eq!(result, ConversionResult::cancelled());
        assert_eq!(recorder.stages, vec![ConversionStage::Cancelled]);
        assert_eq!(converter.stage(), ConversionStage::Cancelled);
        assert!(recorder.progress.is_empty());
        assert!(!output.exists());
    }

    #[test]
    fn test_shared_stop_flag() {
        let converter = Converter::new(missing_tools());
        let stop = converter.stop_flag();
        assert!(!stop.load(Ordering::SeqCst));
        converter.cancel();
        assert!(stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_input_checks() {
        let (dir, _, _) = workspace();
        let mut recorder = Recorder::default();
        let mut converter = Converter::new(missing_tools());

        let missing = dir.path().join("missing.mp4");
        let err = converter.convert(&ConversionRequest::new(missing.clone(), dir.path().join("a.gif")), &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::InputNotFound(path) if path == missing));

        let err = converter.convert(&ConversionRequest::new(dir.path().to_path_buf(), dir.path().join("a.gif")), &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::InputNotAFile(_)));
        assert_eq!(recorder.stages, vec![ConversionStage::Failed, ConversionStage::Failed]);
    }

    #[test]
    fn test_invalid_request() {
        let (dir, input, _) = workspace();
        let mut recorder = Recorder::default();
        let request = ConversionRequest::new(input, dir.path().join("a.gif")).frame_rate(0);
        let err = Converter::new(missing_tools()).convert(&request, &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidRequest(_)));
    }

    #[test]
    fn test_probe_failure() {
        let (dir, input, palettes) = workspace();
        let mut recorder = Recorder::default();
        let mut converter = Converter::new(missing_tools()).temp_dir(palettes.clone());
        let err = converter.convert(&ConversionRequest::new(input, dir.path().join("a.gif")), &mut recorder).unwrap_err();

        assert!(matches!(err, ConversionError::Probe(ProbeError::ToolInvocationFailed { .. })));
        assert_eq!(recorder.stages, vec![ConversionStage::Probing, ConversionStage::Failed]);
        assert!(is_empty_dir(&palettes));
    }

    #[test]
    fn test_cached_media_info() {
        let (_dir, input, _) = workspace();
        let mut converter = Converter::new(missing_tools()).with_media_info(input.clone(), media_info());
        assert_eq!(converter.media_info(&input).unwrap(), media_info());
        // a different input is probed again
        assert!(converter.media_info(Path::new("other.mp4")).is_err());
    }

    #[test]
    fn test_missing_ffmpeg_cleans_up_palette() {
        let (dir, input, palettes) = workspace();
        let output = dir.path().join("clip.gif");
        fs::write(&output, b"GIF89a earlier result").unwrap();
        let mut recorder = Recorder::default();
        let mut converter = Converter::new(missing_tools())
            .temp_dir(palettes.clone())
            .with_media_info(input.clone(), media_info());

        let err = converter.convert(&ConversionRequest::new(input, output.clone()), &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::Encode(EncodeError::ToolInvocationFailed { .. })));
        assert_eq!(recorder.stages, vec![
            ConversionStage::Probing,
            ConversionStage::Planning,
            ConversionStage::GeneratingPalette,
            ConversionStage::Failed,
        ]);
        assert!(is_empty_dir(&palettes));
        assert_eq!(fs::read(&output).unwrap(), b"GIF89a earlier result");
        assert!(recorder.progress.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_palette_failure_keeps_existing_output() {
        let (dir, input, palettes) = workspace();
        let output = dir.path().join("clip.gif");
        fs::write(&output, b"GIF89a earlier result").unwrap();
        let mut recorder = Recorder::default();
        let mut converter = Converter::new(missing_tools().ffmpeg(PathBuf::from("false")))
            .temp_dir(palettes.clone())
            .with_media_info(input.clone(), media_info());

        let err = converter.convert(&ConversionRequest::new(input, output.clone()), &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::Encode(EncodeError::PaletteGenerationFailed { .. })));
        assert_eq!(fs::read(&output).unwrap(), b"GIF89a earlier result");
        assert!(is_empty_dir(&palettes));
    }

    #[cfg(unix)]
    #[test]
    fn test_full_pipeline() {
        let (dir, input, palettes) = workspace();
        let tools_dir = tempfile::tempdir().unwrap();
        let tools = missing_tools()
            .ffmpeg(crate::testing::fake_tool(tools_dir.path(), "ffmpeg", crate::testing::FFMPEG_SCRIPT))
            .gifsicle(crate::testing::fake_tool(tools_dir.path(), "gifsicle", "head -c 1000 /dev/zero > \"$6\""));
        let output = dir.path().join("clip.gif");
        let mut recorder = Recorder::default();
        let mut converter = Converter::new(tools)
            .temp_dir(palettes.clone())
            .with_media_info(input.clone(), media_info());

        // 2 s at 3 fps is the six frames the fake ffmpeg reports
        let request = ConversionRequest::new(input, output.clone()).clip_duration(Some(2.0)).frame_rate(3);
        let result = converter.convert(&request, &mut recorder).unwrap();

        assert!(result.succeeded);
        assert!(result.optimization_summary.starts_with("Optimization succeeded"), "{}", result.optimization_summary);
        assert_eq!(recorder.stages, vec![
            ConversionStage::Probing,
            ConversionStage::Planning,
            ConversionStage::GeneratingPalette,
            ConversionStage::Encoding,
            ConversionStage::Optimizing,
            ConversionStage::Done,
        ]);

        let last = recorder.progress.last().unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.frames_done, 6);
        assert!(recorder.progress.windows(2).all(|w| w[0].frames_done <= w[1].frames_done && w[0].percent <= w[1].percent));

        assert_eq!(fs::metadata(&output).unwrap().len(), 1000);
        assert!(is_empty_dir(&palettes));
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_palette_fails() {
        let (dir, input, palettes) = workspace();
        let mut recorder = Recorder::default();
        let tools = missing_tools().ffmpeg(PathBuf::from("true"));
        let mut converter = Converter::new(tools)
            .temp_dir(palettes.clone())
            .with_media_info(input.clone(), media_info());

        let request = ConversionRequest::new(input, dir.path().join("clip.gif")).clip_duration(Some(2.0));
        let err = converter.convert(&request, &mut recorder).unwrap_err();
        assert!(matches!(err, ConversionError::Encode(EncodeError::PaletteGenerationFailed { .. })));
        assert!(!recorder.stages.contains(&ConversionStage::Encoding));
        assert_eq!(converter.stage(), ConversionStage::Failed);
        assert!(is_empty_dir(&palettes));
    }

    #[test]
    fn test_palette_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let palette = PaletteArtifact::create(Some(dir.path())).unwrap();
        let path = palette.path().to_path_buf();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("palette-"));
        palette.remove();
        assert!(!path.exists());

        let palette = PaletteArtifact::create(Some(dir.path())).unwrap();
        let path = palette.path().to_path_buf();
        drop(palette);
        assert!(!path.exists());
    }
}
