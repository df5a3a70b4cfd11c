use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between the telemetry workers and the `adb` binary.
///
/// `run` is bounded and reports non-zero exits through `CommandOutput::exit_code`;
/// `spawn_stream` starts a long-running process with both pipes captured.
pub trait Bridge: Send + Sync {
    fn run(&self, args: &[String], trace_id: &str) -> Result<CommandOutput, AppError>;

    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<StreamProcess, AppError>;
}

#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
    timeout: Duration,
}

impl AdbBridge {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Bridge for AdbBridge {
    fn run(&self, args: &[String], trace_id: &str) -> Result<CommandOutput, AppError> {
        debug!(trace_id = %trace_id, args = ?args, "adb run");
        run_command_with_timeout(&self.program, args, self.timeout, trace_id)
    }

    fn spawn_stream(&self, args: &[String], trace_id: &str) -> Result<StreamProcess, AppError> {
        debug!(trace_id = %trace_id, args = ?args, "adb spawn stream");
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to start {}: {err}", self.program), trace_id)
            })?;
        Ok(StreamProcess::new(child))
    }
}

/// A long-running bridge process. Killing is idempotent.
pub struct StreamProcess {
    child: Child,
    killed: bool,
}

impl StreamProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            killed: false,
        }
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        // The child may already have exited on its own; both calls are then harmless.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for StreamProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Runs a command and fails on spawn errors, timeouts and non-zero exit codes.
///
/// Used by mutating operations whose failure must reach the caller.
pub fn run_checked(
    bridge: &dyn Bridge,
    args: &[String],
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let output = bridge.run(args, trace_id)?;
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(AppError::dependency(
            format!(
                "adb {} failed (exit {:?}): {detail}",
                args.join(" "),
                output.exit_code
            ),
            trace_id,
        ));
    }
    Ok(output)
}

/// Read-path helper: any failure is logged and becomes `None`.
pub fn read_stdout(bridge: &dyn Bridge, args: &[String], trace_id: &str) -> Option<String> {
    match run_checked(bridge, args, trace_id) {
        Ok(output) => Some(output.stdout),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err.error, "bridge read failed");
            None
        }
    }
}

/// Builds `-s <serial> <rest...>`.
pub fn device_args(serial: &str, rest: &[&str]) -> Vec<String> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    args.push("-s".to_string());
    args.push(serial.to_string());
    args.extend(rest.iter().map(|value| value.to_string()));
    args
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Both pipes are drained concurrently; a full pipe buffer would otherwise stall the
    // child until the timeout fires.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain_pipe(stdout);
    let stderr_handle = drain_pipe(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::dependency(
                        format!("{program} timed out after {} ms", timeout.as_millis()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

fn drain_pipe<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}
