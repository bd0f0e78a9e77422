use std::io::{self, BufReader, Read};
use std::process::{Child, ChildStderr, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum WaitResult {
    Exited(ExitStatus),
    TimedOut,
    Stopped,
}

/// Drains stderr on its own thread so a chatty child cannot fill the pipe
/// while we are blocked on stdout or on `wait`.
pub fn spawn_stderr_reader(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|stream| thread::spawn(move || read_stderr_to_end(stream)))
}

pub fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(h) => h.join().unwrap_or_default(),
        None => String::new(),
    }
}

fn read_stderr_to_end(stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    // keep whatever arrived before a read error
    let _ = BufReader::new(stderr).read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Waits for `child`, killing and reaping it if `timeout` elapses or `stop`
/// gets set first.
pub fn wait_for(child: &mut Child, timeout: Option<Duration>, stop: Option<&AtomicBool>) -> io::Result<WaitResult> {
    if timeout.is_none() && stop.is_none() {
        return child.wait().map(WaitResult::Exited);
    }

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitResult::Exited(status));
        }

        if stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
            kill_and_reap(child);
            return Ok(WaitResult::Stopped);
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_and_reap(child);
            return Ok(WaitResult::TimedOut);
        }

        thread::sleep(POLL_INTERVAL);
    }
}

pub fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::warn!(pid = child.id(), %err, "error killing child process");
    }
    let _ = child.wait();
}

pub fn exit_message(status: &ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    let code = match status.code() {
        Some(code) => format!("exited with {}", code),
        None => String::from("did not exit successfully"),
    };
    match stderr.is_empty() {
        true => code,
        false => format!("{}: {}", code, stderr),
    }
}
