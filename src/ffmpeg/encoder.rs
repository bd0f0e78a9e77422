use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::error::EncodeError;
use crate::ffmpeg::parameter_factories::ParameterFactory;
use crate::ffmpeg::parameter_factories::gif::GifParameterFactory;
use crate::ffmpeg::parameter_factories::palette::PaletteParameterFactory;
use crate::process::{self, WaitResult};
use crate::progress::{ConversionObserver, ProgressTracker};

#[derive(Debug, PartialEq)]
pub enum PassOutcome {
    Completed { frames: u64 },
    Stopped,
}

/// Runs the two ffmpeg passes. Setting `stop` kills whichever pass is
/// running; the palette pass notices within a poll interval, the gif pass
/// on the next progress line ffmpeg writes.
pub struct GifEncoder {
    ffmpeg: PathBuf,
    stop: Arc<AtomicBool>,
}

impl GifEncoder {
    pub fn new(ffmpeg: PathBuf, stop: Arc<AtomicBool>) -> Self {
        GifEncoder { ffmpeg, stop }
    }

    pub fn generate_palette(&self, input: &Path, palette: &Path, parameters: &PaletteParameterFactory) -> Result<PassOutcome, EncodeError> {
        let args = parameters.parameters(input, palette);
        debug!("ffmpeg {}", args.iter().map(|s| s.to_string_lossy()).collect::<Vec<_>>().join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EncodeError::invocation(&self.ffmpeg, &err.to_string()))?;

        let stderr = process::spawn_stderr_reader(child.stderr.take());
        let waited = process::wait_for(&mut child, None, Some(&self.stop));
        let stderr = process::join_stderr(stderr);

        match waited.map_err(|err| EncodeError::invocation(&self.ffmpeg, &err.to_string()))? {
            WaitResult::Stopped => Ok(PassOutcome::Stopped),
            WaitResult::TimedOut => Err(EncodeError::PaletteGenerationFailed { msg: String::from("timed out") }),
            WaitResult::Exited(status) => {
                if !status.success() {
                    return Err(EncodeError::PaletteGenerationFailed { msg: process::exit_message(&status, &stderr) });
                }
                // ffmpeg can exit 0 after a partial run; trust the file, not the status
                match fs::metadata(palette) {
                    Ok(metadata) if metadata.len() > 0 => Ok(PassOutcome::Completed { frames: 1 }),
                    _ => Err(EncodeError::PaletteGenerationFailed { msg: String::from("no palette file created") }),
                }
            },
        }
    }

    pub fn encode_gif(
        &self,
        input: &Path,
        output: &Path,
        parameters: &GifParameterFactory,
        total_frames: u64,
        observer: &mut dyn ConversionObserver,
    ) -> Result<PassOutcome, EncodeError> {
        let args = parameters.parameters(input, output);
        debug!("ffmpeg {}", args.iter().map(|s| s.to_string_lossy()).collect::<Vec<_>>().join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EncodeError::invocation(&self.ffmpeg, &err.to_string()))?;

        let stderr = process::spawn_stderr_reader(child.stderr.take());
        let mut tracker = ProgressTracker::new(total_frames, observer);
        let stopped = match child.stdout.take() {
            Some(stdout) => self.consume_stdout(stdout, &mut child, &mut tracker),
            None => false,
        };

        let status = child.wait();
        let stderr = process::join_stderr(stderr);

        // from here on ffmpeg has run against `output`; a killed or failed
        // encode leaves a truncated gif behind
        if stopped {
            remove_partial_output(output);
            return Ok(PassOutcome::Stopped);
        }

        let status = match status {
            Ok(status) => status,
            Err(err) => {
                remove_partial_output(output);
                return Err(EncodeError::invocation(&self.ffmpeg, &err.to_string()));
            },
        };
        if !status.success() {
            remove_partial_output(output);
            return Err(EncodeError::failed(&self.ffmpeg, &process::exit_message(&status, &stderr)));
        }
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "ffmpeg reported warnings");
        }
        if !output.is_file() {
            return Err(EncodeError::OutputNotCreated { path: output.to_path_buf() });
        }

        Ok(PassOutcome::Completed { frames: tracker.last_frame() })
    }

    fn consume_stdout(&self, stdout: ChildStdout, child: &mut Child, tracker: &mut ProgressTracker) -> bool {
        let stdout_reader = BufReader::new(stdout);
        for line in stdout_reader.lines() {
            match line {
                Ok(l) => tracker.handle_line(&l),
                Err(_) => break,
            }

            if self.should_stop() {
                warn!(pid = child.id(), "stop requested; killing ffmpeg");
                if let Err(err) = child.kill() {
                    warn!(pid = child.id(), %err, "error killing ffmpeg");
                }
                return true;
            }
        }

        false
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

fn remove_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => debug!(?output, "removed partial output"),
        Err(err) => debug!(?output, %err, "no partial output to remove"),
    }
}
