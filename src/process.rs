use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::events::CancelFlag;
use crate::EngineError;

const POLL_INTERVAL_MS: u64 = 200;

/// Builds a `Command` that will not pop a console window while tools run.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}

#[derive(Debug)]
pub enum CommandRunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    Canceled,
    TimedOut(u64),
}

impl CommandRunError {
    pub fn into_engine(self, tool: &str) -> EngineError {
        match self {
            CommandRunError::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                EngineError::ExternalToolMissing {
                    tool: tool.to_string(),
                }
            }
            CommandRunError::Spawn(e) | CommandRunError::Wait(e) => EngineError::Io(e),
            CommandRunError::Canceled => EngineError::Canceled,
            CommandRunError::TimedOut(seconds) => EngineError::ExternalToolTimedOut {
                tool: tool.to_string(),
                seconds,
            },
        }
    }
}

#[derive(Debug)]
pub struct StreamedOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

pub fn kill_child_tree(child: &mut Child) {
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        let _ = command("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `cmd`, feeding every stdout line to `on_line` while watching the
/// cancel flag and a wall-clock timeout (0 disables the timeout). stderr is
/// collected whole for error reporting. The child tree is killed on cancel
/// or timeout.
pub fn run_streaming(
    cmd: &mut Command,
    cancel: &CancelFlag,
    timeout_secs: u64,
    on_line: &mut dyn FnMut(&str),
) -> std::result::Result<StreamedOutput, CommandRunError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(CommandRunError::Spawn)?;

    let stdout = child.stdout.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(
            std::io::ErrorKind::Other,
            "stdout pipe missing",
        ))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(
            std::io::ErrorKind::Other,
            "stderr pipe missing",
        ))
    })?;

    let (line_tx, line_rx) = mpsc::channel::<String>();
    let stdout_handle = thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let mut abort_reason: Option<CommandRunError> = None;

    loop {
        for line in line_rx.try_iter() {
            on_line(&line);
        }

        if abort_reason.is_none() && cancel.is_canceled() {
            kill_child_tree(&mut child);
            abort_reason = Some(CommandRunError::Canceled);
        }
        if abort_reason.is_none()
            && timeout_secs > 0
            && started.elapsed() >= Duration::from_secs(timeout_secs)
        {
            kill_child_tree(&mut child);
            abort_reason = Some(CommandRunError::TimedOut(timeout_secs));
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let _ = stdout_handle.join();
                for line in line_rx.try_iter() {
                    on_line(&line);
                }
                let stderr = stderr_handle.join().unwrap_or_default();
                if let Some(reason) = abort_reason {
                    return Err(reason);
                }
                return Ok(StreamedOutput {
                    status,
                    stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                });
            }
            Ok(None) => {
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                kill_child_tree(&mut child);
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(CommandRunError::Wait(err));
            }
        }
    }
}

/// Like `run_streaming`, but accumulates stdout instead of streaming it.
pub fn run_capture(
    cmd: &mut Command,
    cancel: &CancelFlag,
    timeout_secs: u64,
) -> std::result::Result<CapturedOutput, CommandRunError> {
    let mut lines: Vec<String> = Vec::new();
    let output = run_streaming(cmd, cancel, timeout_secs, &mut |line| {
        lines.push(line.to_string());
    })?;
    Ok(CapturedOutput {
        status: output.status,
        stdout: lines.join("\n"),
        stderr: output.stderr,
    })
}
