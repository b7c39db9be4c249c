//! Running the steps of a build inside a runtime.
//!
//! A [`Builder`] owns an ordered list of [`BuildStep`]s. Starting it moves the
//! steps onto a worker thread which spawns each child process in turn. Each
//! child pipe gets a reader thread that forwards lines into one channel per
//! stream; the channels close once the last step has finished, which is how
//! consumers know a stream has ended.
//!
//! A step is finished when its process exits. Output still arriving after
//! that is accepted for [`OUTPUT_GRACE`]; a pipe held open longer, for example
//! by a background process the tool left behind, is detached from the stream.

use crate::core::{BuildPhase, Device, StreamKind};
use crate::error::{FoundryError, Result};
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A writer shared between the drain threads and whoever prints summaries.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// How long a step's pipes may keep delivering output after its process exits.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Destination of one pipe's lines. Emptied once the step stops listening.
type LineSink = Arc<Mutex<Option<mpsc::Sender<String>>>>;

pub fn shared_writer<W: Write + Send + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub phase: BuildPhase,
    pub program: String,
    pub args: Vec<String>,
    /// Defaults to the project directory.
    pub cwd: Option<PathBuf>,
}

impl BuildStep {
    pub fn new(phase: BuildPhase, program: impl Into<String>) -> Self {
        Self {
            phase,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// A step that runs `script` through `sh -c`.
    pub fn shell(phase: BuildPhase, script: impl Into<String>) -> Self {
        Self::new(phase, "sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// The step rendered as a single shell-like line, for messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A validated, ready-to-run build for one device and runtime.
#[derive(Debug, Clone)]
pub struct Builder {
    pub build_id: Uuid,
    pub build_system: String,
    pub project_dir: PathBuf,
    pub device: Device,
    pub runtime: Runtime,
    pub environment: BTreeMap<String, String>,
    pub steps: Vec<BuildStep>,
    /// Removed before the first step runs.
    pub clean_dirs: Vec<PathBuf>,
}

impl Builder {
    pub fn new(
        build_system: impl Into<String>,
        project_dir: impl Into<PathBuf>,
        device: Device,
        runtime: Runtime,
    ) -> Self {
        Self {
            build_id: Uuid::new_v4(),
            build_system: build_system.into(),
            project_dir: project_dir.into(),
            device,
            runtime,
            environment: BTreeMap::new(),
            steps: Vec::new(),
            clean_dirs: Vec::new(),
        }
    }

    /// Starts the build on a worker thread.
    ///
    /// The returned handle exposes both output streams immediately; the
    /// result is delivered through [`RunningBuild::wait`].
    pub fn start(self) -> Result<RunningBuild> {
        let (stdout_tx, stdout_rx) = mpsc::channel();
        let (stderr_tx, stderr_rx) = mpsc::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let build_id = self.build_id;

        thread::Builder::new()
            .name(format!("build-{}", build_id))
            .spawn(move || {
                let result = self.run_steps(&stdout_tx, &stderr_tx);
                // Closing the channels ends the streams before the result is observed.
                drop(stdout_tx);
                drop(stderr_tx);
                let _ = done_tx.send(result);
            })
            .map_err(|e| FoundryError::io("failed to start build worker", e))?;

        Ok(RunningBuild {
            build_id,
            stdout: Some(LogStream::new(StreamKind::Stdout, stdout_rx)),
            stderr: Some(LogStream::new(StreamKind::Stderr, stderr_rx)),
            done: done_rx,
        })
    }

    fn run_steps(&self, stdout: &mpsc::Sender<String>, stderr: &mpsc::Sender<String>) -> Result<usize> {
        for dir in &self.clean_dirs {
            remove_build_dir(dir)?;
        }

        for (index, step) in self.steps.iter().enumerate() {
            info!(
                build = %self.build_id,
                step = index + 1,
                phase = ?step.phase,
                command = %step.command_line(),
                "running build step"
            );
            self.run_step(step, stdout, stderr)?;
        }

        Ok(self.steps.len())
    }

    fn run_step(
        &self,
        step: &BuildStep,
        stdout: &mpsc::Sender<String>,
        stderr: &mpsc::Sender<String>,
    ) -> Result<()> {
        let cwd = step.cwd.as_deref().unwrap_or(&self.project_dir);
        let mut command = self
            .runtime
            .command(&step.program, &step.args, cwd, &self.environment);

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FoundryError::SubprocessSpawn {
                program: step.program.clone(),
                source,
            })?;

        let (eof_tx, eof_rx) = mpsc::channel();
        let mut sinks: Vec<LineSink> = Vec::with_capacity(2);
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            let sink = Arc::new(Mutex::new(Some(stdout.clone())));
            readers.push(forward_lines(pipe, Arc::clone(&sink), eof_tx.clone()));
            sinks.push(sink);
        }
        if let Some(pipe) = child.stderr.take() {
            let sink = Arc::new(Mutex::new(Some(stderr.clone())));
            readers.push(forward_lines(pipe, Arc::clone(&sink), eof_tx.clone()));
            sinks.push(sink);
        }
        drop(eof_tx);

        let status = child.wait();

        let deadline = Instant::now() + OUTPUT_GRACE;
        let mut open = readers.len();
        while open > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match eof_rx.recv_timeout(remaining) {
                Ok(()) => open -= 1,
                Err(_) => break,
            }
        }

        for sink in &sinks {
            sink.lock().take();
        }

        if open == 0 {
            for reader in readers {
                if reader.join().is_err() {
                    warn!(program = %step.program, "output reader panicked");
                }
            }
        } else {
            // Readers keep discarding until EOF so the holder never blocks.
            info!(
                command = %step.command_line(),
                open,
                "output still open after the step exited, detaching"
            );
        }

        let status =
            status.map_err(|e| FoundryError::io(format!("failed to wait for {}", step.program), e))?;

        debug!(command = %step.command_line(), %status, "build step finished");
        if !status.success() {
            return Err(FoundryError::subprocess_exit(step.command_line(), status));
        }
        Ok(())
    }
}

fn remove_build_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "removed build directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FoundryError::io(format!("failed to remove {}", dir.display()), e)),
    }
}

/// Reads `pipe` line by line until EOF, then signals `eof`. Invalid UTF-8 is
/// replaced rather than dropped. Reading continues after `sink` is emptied, so
/// whoever holds the pipe never blocks on a full buffer.
fn forward_lines<R: Read + Send + 'static>(
    pipe: R,
    sink: LineSink,
    eof: mpsc::Sender<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    if let Some(lines) = sink.lock().as_ref() {
                        let _ = lines.send(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "failed to read build output");
                    break;
                }
            }
        }
        let _ = eof.send(());
    })
}

/// The lines one stream of a running build produces, in order.
pub struct LogStream {
    kind: StreamKind,
    lines: mpsc::Receiver<String>,
}

impl LogStream {
    fn new(kind: StreamKind, lines: mpsc::Receiver<String>) -> Self {
        Self { kind, lines }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Blocks until the next line, or `None` once the stream has closed.
    pub fn next_line(&self) -> Option<String> {
        self.lines.recv().ok()
    }

    /// Writes every line to `writer` until the stream closes. Returns the
    /// number of lines written.
    pub fn drain_into(self, writer: SharedWriter) -> io::Result<usize> {
        let mut count = 0;
        for line in self.lines {
            let mut out = writer.lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
            count += 1;
        }
        Ok(count)
    }
}

impl Iterator for LogStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_line()
    }
}

/// Handle to a build running on its worker thread.
pub struct RunningBuild {
    build_id: Uuid,
    stdout: Option<LogStream>,
    stderr: Option<LogStream>,
    done: oneshot::Receiver<Result<usize>>,
}

impl RunningBuild {
    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub fn take_stdout(&mut self) -> Option<LogStream> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<LogStream> {
        self.stderr.take()
    }

    /// Resolves once every step has finished or one has failed. Yields the
    /// number of steps run.
    pub async fn wait(self) -> Result<usize> {
        self.done.await.map_err(|_| FoundryError::BuildAbandoned)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_joins_args() {
        let step = BuildStep::new(BuildPhase::Configure, "meson")
            .args(["setup", "_build"])
            .arg("--buildtype=debug");
        assert_eq!(step.command_line(), "meson setup _build --buildtype=debug");
        assert_eq!(step.cwd, None);
    }

    #[test]
    fn test_shell_step() {
        let step = BuildStep::shell(BuildPhase::Prebuild, "echo hi").current_dir("/tmp");
        assert_eq!(step.program, "sh");
        assert_eq!(step.args, vec!["-c", "echo hi"]);
        assert_eq!(step.cwd, Some(PathBuf::from("/tmp")));
    }

    #[tokio::test]
    async fn test_lines_are_forwarded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Builder::new("test", dir.path(), Device::local(), Runtime::host());
        builder.steps.push(BuildStep::shell(
            BuildPhase::Build,
            "printf 'a\\nb\\n'; printf 'err\\n' >&2; printf 'tail'",
        ));

        let mut running = builder.start().unwrap();
        let stdout = running.take_stdout().unwrap();
        let stderr = running.take_stderr().unwrap();
        assert!(running.take_stdout().is_none());

        assert_eq!(running.wait().await.unwrap(), 1);
        assert_eq!(stdout.collect::<Vec<_>>(), vec!["a", "b", "tail"]);
        assert_eq!(stderr.collect::<Vec<_>>(), vec!["err"]);
    }

    #[tokio::test]
    async fn test_failing_step_stops_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Builder::new("test", dir.path(), Device::local(), Runtime::host());
        builder.steps.push(BuildStep::shell(BuildPhase::Configure, "exit 3"));
        builder.steps.push(BuildStep::shell(BuildPhase::Build, "echo unreachable"));

        let mut running = builder.start().unwrap();
        let stdout = running.take_stdout().unwrap();
        let err = running.wait().await.unwrap_err();

        assert_eq!(err.to_string(), "`sh -c exit 3` exited with status 3");
        assert_eq!(stdout.count(), 0);
    }

    #[tokio::test]
    async fn test_clean_dirs_are_removed_first() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("_build");
        std::fs::create_dir_all(out.join("nested")).unwrap();

        let mut builder = Builder::new("test", dir.path(), Device::local(), Runtime::host());
        builder.clean_dirs.push(out.clone());
        builder.clean_dirs.push(dir.path().join("missing"));
        builder.steps.push(BuildStep::shell(BuildPhase::Build, "test ! -e _build"));

        builder.start().unwrap().wait().await.unwrap();
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_background_process_does_not_hold_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = Builder::new("test", dir.path(), Device::local(), Runtime::host());
        builder.steps.push(BuildStep::shell(BuildPhase::Build, "sleep 5 & echo started"));

        let started = Instant::now();
        let mut running = builder.start().unwrap();
        let stdout = running.take_stdout().unwrap();
        let stderr = running.take_stderr().unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), running.wait())
            .await
            .expect("build should finish when the shell exits");
        assert_eq!(result.unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(3));

        assert_eq!(stdout.collect::<Vec<_>>(), vec!["started"]);
        assert_eq!(stderr.count(), 0);
    }
}
