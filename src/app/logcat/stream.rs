use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::adb::runner::{device_args, Bridge, StreamProcess};
use crate::app::error::AppError;
use crate::app::gate::EmitGate;
use crate::app::logcat::parse::parse_log_line;
use crate::app::models::LogEntry;

pub type LogEmitter = Arc<dyn Fn(LogEntry) + Send + Sync>;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Splits a byte stream on `\n`, carrying the unterminated tail over to the next chunk.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
            .collect()
    }

    /// Returns the unterminated fragment left when the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub fn build_logcat_args(serial: &str, filters: &[String]) -> Vec<String> {
    let mut args = device_args(serial, &["logcat", "-v", "time"]);
    args.extend(
        filters
            .iter()
            .flat_map(|spec| spec.split_whitespace())
            .map(str::to_string),
    );
    args
}

struct ActiveStream {
    process: StreamProcess,
    stop_flag: Arc<AtomicBool>,
}

/// Tails `adb logcat` for one device. At most one subprocess is alive per streamer.
pub struct LogStreamer {
    serial: String,
    bridge: Arc<dyn Bridge>,
    gate: Arc<EmitGate>,
    active: Option<ActiveStream>,
}

impl LogStreamer {
    pub fn new(serial: impl Into<String>, bridge: Arc<dyn Bridge>) -> Self {
        Self {
            serial: serial.into(),
            bridge,
            gate: Arc::new(EmitGate::new()),
            active: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Restarts the stream: any running subprocess is torn down before the new one spawns.
    pub fn start(
        &mut self,
        filters: &[String],
        emitter: LogEmitter,
        trace_id: &str,
    ) -> Result<(), AppError> {
        self.stop();

        let args = build_logcat_args(&self.serial, filters);
        let mut process = self.bridge.spawn_stream(&args, trace_id)?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| AppError::system("Failed to capture logcat stdout", trace_id))?;
        let stderr = process.take_stderr();

        let generation = self.gate.advance();
        let stop_flag = Arc::new(AtomicBool::new(false));

        spawn_stdout_reader(
            stdout,
            Arc::clone(&self.gate),
            generation,
            Arc::clone(&stop_flag),
            emitter,
            self.serial.clone(),
            trace_id.to_string(),
        );
        if let Some(stderr) = stderr {
            spawn_stderr_reader(stderr, Arc::clone(&stop_flag), self.serial.clone(), trace_id.to_string());
        }

        info!(trace_id = %trace_id, serial = %self.serial, generation, "logcat stream started");
        self.active = Some(ActiveStream { process, stop_flag });
        Ok(())
    }

    /// Kills the subprocess. Returns `false` when nothing was streaming.
    pub fn stop(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        active.stop_flag.store(true, Ordering::Relaxed);
        // Advance before killing so lines still in the pipe are not delivered.
        self.gate.advance();
        active.process.kill();
        debug!(serial = %self.serial, "logcat stream stopped");
        true
    }
}

impl Drop for LogStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_stdout_reader<R: Read + Send + 'static>(
    mut stdout: R,
    gate: Arc<EmitGate>,
    generation: u64,
    stop_flag: Arc<AtomicBool>,
    emitter: LogEmitter,
    serial: String,
    trace_id: String,
) {
    std::thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let deliver = |line: &str| {
            if let Some(entry) = parse_log_line(line) {
                gate.emit_if_current(generation, || emitter(entry));
            }
        };

        loop {
            if stop_flag.load(Ordering::Relaxed) {
                return;
            }
            let count = match stdout.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => count,
                Err(err) => {
                    warn!(trace_id = %trace_id, serial = %serial, error = %err, "failed to read logcat stdout");
                    break;
                }
            };
            for line in splitter.push(&chunk[..count]) {
                deliver(&line);
            }
        }
        if let Some(tail) = splitter.finish() {
            deliver(&tail);
        }
        debug!(trace_id = %trace_id, serial = %serial, "logcat stdout closed");
    });
}

fn spawn_stderr_reader<R: Read + Send + 'static>(
    stderr: R,
    stop_flag: Arc<AtomicBool>,
    serial: String,
    trace_id: String,
) {
    std::thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            match line {
                Ok(line) if !line.trim().is_empty() => {
                    warn!(trace_id = %trace_id, serial = %serial, line = %line, "logcat stderr");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::CommandOutput;
    use std::process::{Command, Stdio};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[test]
    fn splitter_keeps_partial_line_for_next_chunk() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"05-02 14:33:21.123 I/A( 1): he").is_empty());
        assert_eq!(splitter.pending_len(), 30);

        let lines = splitter.push(b"llo\r\n05-02 14:33:21.124 I/A( 1): second\n05-02");
        assert_eq!(
            lines,
            vec![
                "05-02 14:33:21.123 I/A( 1): hello".to_string(),
                "05-02 14:33:21.124 I/A( 1): second".to_string(),
            ]
        );
        assert_eq!(splitter.finish().as_deref(), Some("05-02"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_handles_multibyte_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        let text = "héllo\n".as_bytes();
        assert!(splitter.push(&text[..2]).is_empty());
        assert_eq!(splitter.push(&text[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn logcat_args_match_bridge_format() {
        let args = build_logcat_args("abc", &["ReactNativeJS:V".to_string(), "*:S".to_string()]);
        assert_eq!(
            args,
            vec!["-s", "abc", "logcat", "-v", "time", "ReactNativeJS:V", "*:S"]
        );
    }

    /// Spawns `sh -c <script>` for every stream and counts spawns.
    struct ScriptBridge {
        script: String,
        spawned: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptBridge {
        fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
                spawned: Mutex::new(Vec::new()),
            }
        }
    }

    impl Bridge for ScriptBridge {
        fn run(&self, _args: &[String], _trace_id: &str) -> Result<CommandOutput, AppError> {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }

        fn spawn_stream(&self, args: &[String], _trace_id: &str) -> Result<StreamProcess, AppError> {
            self.spawned.lock().expect("spawned").push(args.to_vec());
            let child = Command::new("sh")
                .args(["-c", &self.script])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .expect("spawn sh");
            Ok(StreamProcess::new(child))
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn collecting_emitter() -> (LogEmitter, Arc<Mutex<Vec<LogEntry>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let emitter: LogEmitter = Arc::new(move |entry| sink.lock().expect("sink").push(entry));
        (emitter, seen)
    }

    #[cfg(unix)]
    #[test]
    fn emits_recognized_lines_in_order_and_drops_noise() {
        let script = "printf '%s\\n' '--------- beginning of main' \
'05-02 14:33:21.123 I/ReactNativeJS( 1234): Hello' \
'05-02 14:33:21.200 W/Other: second'; sleep 30";
        let bridge = Arc::new(ScriptBridge::new(script));
        let mut streamer = LogStreamer::new("abc", bridge.clone());
        let (emitter, seen) = collecting_emitter();

        streamer.start(&[], emitter, "trace").expect("start");
        assert!(wait_for(|| seen.lock().expect("seen").len() == 2));

        let entries = seen.lock().expect("seen").clone();
        assert_eq!(entries[0].tag, "ReactNativeJS");
        assert_eq!(entries[0].pid, Some(1234));
        assert_eq!(entries[1].tag, "Other");
        assert!(streamer.stop());
    }

    #[cfg(unix)]
    #[test]
    fn restart_replaces_the_previous_process() {
        let bridge = Arc::new(ScriptBridge::new("sleep 30"));
        let mut streamer = LogStreamer::new("abc", bridge.clone());
        let (emitter, _seen) = collecting_emitter();

        streamer.start(&[], Arc::clone(&emitter), "t1").expect("first");
        streamer.start(&["*:E".to_string()], emitter, "t2").expect("second");

        assert!(streamer.is_streaming());
        let spawned = bridge.spawned.lock().expect("spawned").clone();
        assert_eq!(spawned.len(), 2);
        assert_eq!(spawned[1].last().map(String::as_str), Some("*:E"));
        assert!(streamer.stop());
    }

    #[cfg(unix)]
    #[test]
    fn stop_is_idempotent_and_silences_callbacks() {
        let script = "while true; do echo '05-02 14:33:21.123 D/Loop( 1): tick'; sleep 0.01; done";
        let bridge = Arc::new(ScriptBridge::new(script));
        let mut streamer = LogStreamer::new("abc", bridge);
        let (emitter, seen) = collecting_emitter();

        streamer.start(&[], emitter, "t").expect("start");
        assert!(wait_for(|| !seen.lock().expect("seen").is_empty()));

        assert!(streamer.stop());
        let count_after_stop = seen.lock().expect("seen").len();
        assert!(!streamer.stop());
        assert!(!streamer.is_streaming());

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(seen.lock().expect("seen").len(), count_after_stop);
    }
}
