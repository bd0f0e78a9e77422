use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use human_repr::HumanCount;
use tracing::{debug, error, info, warn};

use crate::process::{self, WaitResult};

pub const OPTIMIZE_TIMEOUT: Duration = Duration::from_secs(300);
pub const COLOR_CAP: u32 = 256;
pub const LOSSY_LEVEL: u32 = 80;

#[derive(Clone, Debug, PartialEq)]
pub enum OptimizationOutcome {
    Succeeded { original_size: u64, new_size: u64 },
    /// gifsicle ran but its result was not smaller; the gif is left as is.
    NoImprovement { original_size: u64, new_size: u64 },
    ToolNotAvailable,
    ToolFailed(String),
    ToolTimedOut,
}

impl OptimizationOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, OptimizationOutcome::Succeeded { .. })
    }

    /// One line for the user, whatever happened.
    pub fn summary(&self) -> String {
        match self {
            OptimizationOutcome::Succeeded { original_size, new_size } => format!(
                "Optimization succeeded: was {}, now {} ({:.1}% smaller)",
                (*original_size).human_count_bytes(),
                (*new_size).human_count_bytes(),
                reduction_percent(*original_size, *new_size)),
            OptimizationOutcome::NoImprovement { original_size, new_size } => format!(
                "Optimization skipped: gifsicle did not reduce the size (was {}, would be {})",
                (*original_size).human_count_bytes(),
                (*new_size).human_count_bytes()),
            OptimizationOutcome::ToolNotAvailable =>
                String::from("Optimization skipped: gifsicle is not installed"),
            OptimizationOutcome::ToolFailed(msg) =>
                format!("Optimization skipped: GIF optimization failed: {}", msg),
            OptimizationOutcome::ToolTimedOut =>
                format!("Optimization skipped: GIF optimization timed out after {} seconds", OPTIMIZE_TIMEOUT.as_secs()),
        }
    }
}

pub fn reduction_percent(original_size: u64, new_size: u64) -> f64 {
    match original_size {
        0 => 0.0,
        _ => (original_size as f64 - new_size as f64) / (original_size as f64) * 100.0,
    }
}

/// Lossy recompression through gifsicle. Works on a sibling temp file and
/// only replaces the gif once gifsicle has produced a usable one, so the
/// original survives every failure.
pub struct GifOptimizer {
    program: PathBuf,
    timeout: Duration,
}

impl GifOptimizer {
    pub fn new(program: PathBuf) -> Self {
        GifOptimizer { program, timeout: OPTIMIZE_TIMEOUT }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn optimize(&self, gif: &Path) -> OptimizationOutcome {
        let original_size = match fs::metadata(gif) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                error!(path = ?gif, "Output file not found for optimization");
                return OptimizationOutcome::ToolFailed(String::from("Output file not found for optimization"));
            },
        };

        if which::which(&self.program).is_err() {
            warn!(program = ?self.program, "gifsicle not installed; keeping the unoptimized gif");
            return OptimizationOutcome::ToolNotAvailable;
        }

        info!("Optimizing GIF: {:?} ({})", gif, original_size.human_count_bytes());
        let started = Instant::now();
        let outcome = match self.run(gif) {
            Ok(outcome) => outcome,
            Err(err) if err.kind() == io::ErrorKind::NotFound => OptimizationOutcome::ToolNotAvailable,
            Err(err) => OptimizationOutcome::ToolFailed(err.to_string()),
        };

        match &outcome {
            OptimizationOutcome::Succeeded { new_size, .. } => info!(
                "Optimization done in {:.1}s -> {} ({:.1}% smaller)",
                started.elapsed().as_secs_f64(),
                (*new_size).human_count_bytes(),
                reduction_percent(original_size, *new_size)),
            OptimizationOutcome::NoImprovement { .. } => info!("{}", outcome.summary()),
            other => warn!("{}", other.summary()),
        }
        outcome
    }

    fn run(&self, gif: &Path) -> io::Result<OptimizationOutcome> {
        let original_size = fs::metadata(gif)?.len();
        let dir = match gif.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // dropping the TempPath deletes it, which covers every early return
        let temp = tempfile::Builder::new()
            .prefix(".gif-forge-")
            .suffix(".temp.gif")
            .tempfile_in(dir)?
            .into_temp_path();

        let mut child = Command::new(&self.program)
            .arg("-O3")
            .arg("--colors").arg(COLOR_CAP.to_string())
            .arg(format!("--lossy={}", LOSSY_LEVEL))
            .arg("-o").arg(temp.as_os_str())
            .arg(gif)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = process::spawn_stderr_reader(child.stderr.take());
        let waited = process::wait_for(&mut child, Some(self.timeout), None);
        let stderr = process::join_stderr(stderr);

        let status = match waited? {
            WaitResult::Exited(status) => status,
            WaitResult::TimedOut => return Ok(OptimizationOutcome::ToolTimedOut),
            WaitResult::Stopped => return Ok(OptimizationOutcome::ToolFailed(String::from("stopped"))),
        };
        if !status.success() {
            let msg = match stderr.trim() {
                "" => String::from("Unknown error"),
                s => String::from(s),
            };
            return Ok(OptimizationOutcome::ToolFailed(msg));
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "gifsicle stderr");
        }

        let new_size = fs::metadata(&*temp)?.len();
        if new_size == 0 {
            return Ok(OptimizationOutcome::ToolFailed(String::from("gifsicle produced an empty file")));
        }
        if new_size >= original_size {
            return Ok(OptimizationOutcome::NoImprovement { original_size, new_size });
        }

        // rename within one directory, so readers see the old or the new gif
        temp.persist(gif).map_err(|err| err.error)?;
        Ok(OptimizationOutcome::Succeeded { original_size, new_size })
    }
}
