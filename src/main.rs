pub mod converter;
pub mod error;
pub mod ffmpeg;
pub mod fstools;
pub mod logging;
pub mod optimizer;
pub mod planner;
pub mod process;
pub mod progress;
pub mod request;
pub mod worker;

#[cfg(all(test, unix))]
mod testing;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use human_repr::HumanCount;
use kdam::{term, tqdm, Bar, BarExt};
use rustop::opts;
use signal_hook::consts::{SIGINT, SIGTERM};

use converter::{ConversionStage, Converter};
use ffmpeg::Toolchain;
use fstools::{classify_file, file_size, DirEntryCategory};
use request::{default_output_path, ConversionRequest, DEFAULT_FRAME_RATE, DEFAULT_QUALITY};
use worker::{ConversionWorker, WorkerMessage};

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let (args, _rest) = opts! {
        synopsis "Convert a video clip into an optimized, looping GIF";
        opt start:f64=0.0, desc:"Start time in seconds.";
        opt duration:Option<f64>, desc:"Clip length in seconds. (default: to the end of the video)";
        opt fps:u32=DEFAULT_FRAME_RATE, desc:"GIF frame rate, 1-30.";
        opt width:Option<u32>, desc:"Output width in pixels; height keeps the aspect ratio.";
        opt quality:u32=DEFAULT_QUALITY, desc:"Quality, 1 (best) to 31 (worst). Currently informational.";
        opt no_optimize:bool=false, desc:"Skip the gifsicle optimization pass.";
        opt overwrite:bool=false, desc:"Replace the output file if it exists.";
        opt info:bool=false, desc:"Print the probed video information and exit.";
        opt ffmpeg:String=String::from("ffmpeg"), desc:"Path to ffmpeg.";
        opt ffprobe:String=String::from("ffprobe"), desc:"Path to ffprobe.";
        opt gifsicle:String=String::from("gifsicle"), desc:"Path to gifsicle.";
        opt verbose:bool=false, desc:"Log debug output to stderr.";
        opt log_file:Option<String>, desc:"Also write an info-level log to this file.";
        param infile:String, desc:"Input video";
        param outfile:Option<String>, desc:"Output gif (default: input with a .gif extension)";
    }.parse_or_exit();

    let _log_guard = match logging::init_logging(args.verbose, args.log_file.as_deref().map(Path::new)) {
        Ok(guard) => guard,
        Err(err) => {
            println!("Unable to initialize logging: {}", err);
            return ExitCode::FAILURE;
        },
    };

    let tools = Toolchain::new()
        .ffmpeg(PathBuf::from(&args.ffmpeg))
        .ffprobe(PathBuf::from(&args.ffprobe))
        .gifsicle(PathBuf::from(&args.gifsicle));
    let missing = tools.missing();
    if !missing.is_empty() {
        for program in missing {
            println!("{:?} is not installed.", program);
        }
        return ExitCode::FAILURE;
    }

    let input = PathBuf::from(&args.infile);
    match classify_file(&input) {
        DirEntryCategory::RegularFile => (),
        DirEntryCategory::DoesNotExist => {
            println!("{:?} does not exist.", input);
            return ExitCode::FAILURE;
        },
        DirEntryCategory::Directory => {
            println!("{:?} is a directory.", input);
            return ExitCode::FAILURE;
        },
        DirEntryCategory::Unknown => {
            println!("Unable to classify {:?}.", input);
            return ExitCode::FAILURE;
        },
    }

    let mut converter = Converter::new(tools);
    let info = match converter.media_info(&input) {
        Ok(info) => info,
        Err(err) => {
            println!("Failure -__-\n{}", err);
            return ExitCode::FAILURE;
        },
    };
    if args.info {
        return match serde_json::to_string_pretty(&info) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            },
            Err(err) => {
                println!("Unable to render media info: {}", err);
                ExitCode::FAILURE
            },
        };
    }
    println!("{:?}: {} ({})", input, info, file_size(&input).human_count_bytes());

    let output = match &args.outfile {
        Some(outfile) => PathBuf::from(outfile),
        None => default_output_path(&input),
    };
    if output.exists() && !args.overwrite {
        println!("{:?} already exists; pass --overwrite to replace it.", output);
        return ExitCode::FAILURE;
    }

    let request = ConversionRequest::new(input, output.clone())
        .start_time(args.start)
        .clip_duration(args.duration)
        .frame_rate(args.fps)
        .width(args.width)
        .quality(args.quality)
        .optimize(!args.no_optimize);

    let worker = match ConversionWorker::spawn(converter, request) {
        Ok(worker) => worker,
        Err(err) => {
            println!("Unable to start conversion: {}", err);
            return ExitCode::FAILURE;
        },
    };
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&interrupted)) {
            tracing::warn!(signal, %err, "unable to install signal handler");
        }
    }

    let exit_code = report(&worker, &interrupted, &output);
    worker.join();
    exit_code
}

fn report(worker: &ConversionWorker, interrupted: &AtomicBool, output: &Path) -> ExitCode {
    term::init(false);
    let mut pbar: Option<Bar> = None;
    let mut exit_code = ExitCode::FAILURE;
    let mut cancelling = false;

    loop {
        if !cancelling && interrupted.load(Ordering::SeqCst) {
            cancelling = true;
            eprintln!("\nCaught stop signal; stopping ffmpeg.");
            worker.cancel();
        }

        let msg = match worker.messages().recv_timeout(SIGNAL_POLL_INTERVAL) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let terminal = msg.is_terminal();

        match msg {
            WorkerMessage::Stage(stage) => {
                if let Some(mut bar) = pbar.take() {
                    let _ = bar.refresh();
                    eprintln!();
                }
                match stage {
                    ConversionStage::Done | ConversionStage::Cancelled | ConversionStage::Failed => (),
                    _ => println!("{}...", stage),
                }
            },
            WorkerMessage::Progress(progress) => {
                let bar = pbar.get_or_insert_with(|| tqdm!(
                    total = progress.total_frames as usize,
                    desc = "encoding",
                    position = 0,
                    force_refresh = true
                ));
                bar.set_postfix(format!("{:.1}%", progress.percent));
                let _ = bar.update_to(progress.frames_done as usize);
            },
            WorkerMessage::Finished(result) => {
                println!("{}", result.message());
                if result.succeeded {
                    println!("{:?} ({})", output, file_size(output).human_count_bytes());
                    exit_code = ExitCode::SUCCESS;
                }
            },
            WorkerMessage::Failed(msg) => println!("Failure -__-\n{}", msg),
        }

        if terminal {
            break;
        }
    }

    exit_code
}
