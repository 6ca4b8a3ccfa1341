use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Error;
use crate::mux::{Channel, Drained, PipeMux};
use crate::options::{duration_opt, Options};
use crate::status::{self, STATUS_KILLED};

/// No failure recorded.
pub const CODE_OK: u8 = 0;
/// The spawn itself was rejected.
pub const CODE_LAUNCH_FAILED: u8 = 1;
/// Execution timed out or the process had to be killed.
pub const CODE_TIMEOUT: u8 = 4;

/// One supervised child process.
///
/// A `Subprocess` owns the spawned OS process, the [`PipeMux`] over its
/// stdout/stderr pipes, and everything the child produced: captured report
/// and error text, the library error code, the exit status. The command line
/// and the profiling flag are fixed once the process has been launched;
/// timeouts can be adjusted at any point.
///
/// Dropping a `Subprocess` releases its resources, killing the child first
/// if it is still running.
pub struct Subprocess {
	name: String,
	command_line: String,
	child: Option<Child>,
	mux: Option<PipeMux>,
	pid: Option<u32>,
	status: Option<i32>,
	code: u8,
	read_timeout: Duration,
	execution_timeout: Option<Duration>,
	report: String,
	error: String,
	debug: bool,
	profiling: bool,
	started_at: Option<Instant>,
	execution_time: Option<Duration>,
}

impl Subprocess {
	pub fn new(command_line: &str) -> Self {
		Self {
			name: String::new(),
			command_line: command_line.to_string(),
			child: None,
			mux: None,
			pid: None,
			status: None,
			code: CODE_OK,
			read_timeout: Duration::ZERO,
			execution_timeout: None,
			report: String::new(),
			error: String::new(),
			debug: false,
			profiling: false,
			started_at: None,
			execution_time: None,
		}
	}

	pub fn with_options(command_line: &str, options: &Options) -> Result<Self, Error> {
		let mut command = Self::new(command_line);
		command.apply_options(options)?;
		Ok(command)
	}

	/// Merge an option set into this command. Changing `command` or
	/// `profiling` after launch is rejected.
	pub fn apply_options(&mut self, options: &Options) -> Result<(), Error> {
		if let Some(name) = &options.name {
			self.name = name.clone();
		}
		if let Some(command) = &options.command {
			self.set_command_line(command)?;
		}
		if let Some(check) = options.check {
			self.read_timeout = duration_opt(check).unwrap_or(Duration::ZERO);
		}
		if let Some(timeout) = options.timeout {
			self.execution_timeout = duration_opt(timeout);
		}
		if let Some(debug) = options.debug {
			self.debug = debug;
		}
		if let Some(profiling) = options.profiling {
			self.set_profiling(profiling)?;
		}
		Ok(())
	}

	pub fn set_command_line(&mut self, command_line: &str) -> Result<(), Error> {
		if self.pid.is_some() {
			return Err(Error::AlreadyLaunched("command line"));
		}
		self.command_line = command_line.to_string();
		Ok(())
	}

	pub fn set_profiling(&mut self, profiling: bool) -> Result<(), Error> {
		if self.pid.is_some() {
			return Err(Error::AlreadyLaunched("profiling"));
		}
		self.profiling = profiling;
		Ok(())
	}

	pub fn set_name(&mut self, name: &str) {
		self.name = name.to_string();
	}

	/// Max wait per poll for stream activity; zero polls without waiting.
	pub fn set_read_timeout(&mut self, timeout: Duration) {
		self.read_timeout = timeout;
	}

	/// Wall-clock budget enforced by [`wait`](Self::wait); `None` disables.
	pub fn set_execution_timeout(&mut self, timeout: Option<Duration>) {
		self.execution_timeout = timeout;
	}

	pub fn set_debug(&mut self, debug: bool) {
		self.debug = debug;
	}

	/// Spawn the configured command line with captured stdout/stderr.
	///
	/// Returns `true` when the child is up. On failure an error line and
	/// `code = 1` record what happened, the status keeps the platform error
	/// number when there is one, and `is_running()` stays false.
	pub fn launch(&mut self) -> bool {
		if self.is_running() {
			let line = format!("subprocess {}: already running", self.label());
			self.log_error(line);
			return false;
		}

		let argv = match shell_words::split(&self.command_line) {
			Ok(argv) => argv,
			Err(e) => {
				let line = format!("command {}: launch failed", self.label());
				self.log_error(line);
				self.log_error(format!("message: {}", e));
				self.raise_code(CODE_LAUNCH_FAILED);
				return false;
			}
		};
		let Some((program, args)) = argv.split_first() else {
			let line = format!("command {}: no command line configured", self.label());
			self.log_error(line);
			self.raise_code(CODE_LAUNCH_FAILED);
			return false;
		};

		if self.debug {
			self.log_report(format!("cmd: '{}'", self.command_line));
		}

		self.status = None;
		let mut command = Command::new(program);
		command
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		match command.spawn() {
			Ok(mut child) => {
				let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take())
				else {
					let line = format!("command {}: pipes unavailable", self.label());
					self.log_error(line);
					self.raise_code(CODE_LAUNCH_FAILED);
					let _ = child.start_kill();
					return false;
				};
				self.mux = Some(PipeMux::new(stdout, stderr));
				self.pid = child.id();
				self.child = Some(child);
				if self.profiling {
					self.started_at = Some(Instant::now());
				}
				debug!(pid = ?self.pid, command = %self.command_line, "launched");
				if self.debug {
					let line = format!("subprocess {}: launch ok", self.label());
					self.log_report(line);
				}
				true
			}
			Err(e) => {
				let line = format!("command {}: launch failed", self.label());
				self.log_error(line);
				self.log_error(format!("message: {}", e));
				self.raise_code(CODE_LAUNCH_FAILED);
				if let Some(errno) = e.raw_os_error() {
					self.status = Some(errno);
				}
				warn!(command = %self.command_line, error = %e, "launch failed");
				false
			}
		}
	}

	/// Poll the child once: reap an exit if there is one, and drain whatever
	/// output is ready within the read timeout.
	///
	/// Returns `Ok(true)` while the child is still running. When it has
	/// finished, the exit status is recorded, remaining buffered output is
	/// pulled in and both pipes are closed; calling `check` again after that
	/// is a no-op.
	pub async fn check(&mut self) -> Result<bool, Error> {
		if self.status.is_some() {
			return Ok(false);
		}
		let polled = match self.child.as_mut() {
			Some(child) => child.try_wait(),
			None => return Ok(false),
		};

		match polled {
			Ok(Some(exit)) => {
				self.status = Some(status::exit_code(exit));
				if self.profiling {
					self.execution_time = self.started_at.map(|t| t.elapsed());
				}
				debug!(pid = ?self.pid, status = ?self.status, "finished");
				if self.debug {
					let line = format!("prc ({}): done", self.pid.unwrap_or(0));
					self.log_report(line);
				}
				self.drain_remaining().await?;
				self.mux = None;
				Ok(false)
			}
			Ok(None) => {
				if self.debug {
					let line = format!("prc ({}): read checking ...", self.pid.unwrap_or(0));
					self.log_report(line);
				}
				self.read_streams(self.read_timeout).await?;
				Ok(true)
			}
			Err(e) => Err(Error::Wait(e)),
		}
	}

	/// Poll until the child finishes or the execution timeout elapses.
	///
	/// Elapsed time is measured against a monotonic clock sampled once at
	/// entry, never summed across iterations. On timeout the escalation runs
	/// terminate → recheck → kill and the call returns `Ok(false)`;
	/// `Ok(true)` means the child finished on its own.
	pub async fn wait(&mut self) -> Result<bool, Error> {
		let start = Instant::now();

		while self.check().await? {
			let Some(limit) = self.execution_timeout else {
				continue;
			};
			let elapsed = start.elapsed();
			if self.debug {
				self.log_report(format!("wait elapsed: {:.1}s", elapsed.as_secs_f64()));
			}
			if elapsed >= limit {
				let line = format!("subprocess {}: execution timed out", self.label());
				self.log_error(line);
				self.log_error(format!(
					"execution time '{:.0} / {:.0}' s",
					elapsed.as_secs_f64(),
					limit.as_secs_f64()
				));
				self.log_error("process will be terminated".to_string());
				self.raise_code(CODE_TIMEOUT);
				self.terminate().await?;
				if self.is_running() {
					self.kill();
				}
				return Ok(false);
			}
		}
		Ok(true)
	}

	/// Ask a running child to stop (SIGTERM), then check once so a fast exit
	/// is reaped immediately. With nothing running this only logs.
	pub async fn terminate(&mut self) -> Result<(), Error> {
		if !self.is_running() {
			let line = format!("subprocess {}: not running", self.label());
			self.log_error(line);
			return Ok(());
		}

		let line = format!("subprocess {}: terminating ...", self.label());
		self.log_error(line);
		if let Some(pid) = self.pid {
			use nix::sys::signal::{kill, Signal};
			use nix::unistd::Pid;
			if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
				warn!(pid, error = %e, "sigterm failed");
			}
		}
		debug!(pid = ?self.pid, "sigterm sent");
		self.check().await?;
		Ok(())
	}

	/// Force a running child down (SIGKILL) and pin the exit status to the
	/// kill sentinel: a real status that was never reaped stays unknown.
	/// Safe to call redundantly.
	pub fn kill(&mut self) {
		if !self.is_running() {
			let line = format!("subprocess {}: not running", self.label());
			self.log_error(line);
			return;
		}

		let line = format!("subprocess {}: killing ...", self.label());
		self.log_error(line);
		if let Some(child) = self.child.as_mut() {
			if let Err(e) = child.start_kill() {
				warn!(pid = ?self.pid, error = %e, "sigkill failed");
			}
			let _ = child.try_wait();
		}
		debug!(pid = ?self.pid, "sigkill sent");
		self.status = Some(STATUS_KILLED);
		self.raise_code(CODE_TIMEOUT);
	}

	/// Idempotent teardown: kill anything still running, close both pipes,
	/// drop the child handle.
	pub fn free_resources(&mut self) {
		if self.is_running() {
			self.kill();
		}
		self.mux = None;
		if let Some(mut child) = self.child.take() {
			let _ = child.try_wait();
		}
	}

	/// Reset captured text, error code and timing. Configuration and process
	/// identity stay as they are.
	pub fn clear_errors(&mut self) {
		self.report.clear();
		self.error.clear();
		self.code = CODE_OK;
		self.execution_time = None;
	}

	/// Raise the library error code to at least `severity`; it never goes
	/// back down.
	pub fn raise_code(&mut self, severity: u8) {
		if self.code < severity {
			self.code = severity;
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn command_line(&self) -> &str {
		&self.command_line
	}

	/// Diagnostic label: the pid once launched, plus the name or the command
	/// line.
	pub fn label(&self) -> String {
		let id = if self.name.is_empty() {
			&self.command_line
		} else {
			&self.name
		};
		match self.pid {
			Some(pid) => format!("({}) '{}'", pid, id),
			None => format!("'{}'", id),
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// The child has a process identity and no exit status has been
	/// recorded yet.
	pub fn is_running(&self) -> bool {
		self.pid.is_some() && self.status.is_none()
	}

	/// Captured stdout plus narration lines.
	pub fn report(&self) -> &str {
		&self.report
	}

	/// Captured stderr plus diagnostics.
	pub fn error(&self) -> &str {
		&self.error
	}

	/// Library error code: 0 none, 1 launch failure, ≥4 timeout/kill.
	pub fn code(&self) -> u8 {
		self.code
	}

	/// The child's recorded exit status, `None` until it is known.
	pub fn status(&self) -> Option<i32> {
		self.status
	}

	/// Single-number result: the exit status when known, otherwise the
	/// library error code.
	pub fn exit_code(&self) -> i32 {
		self.status.unwrap_or(self.code as i32)
	}

	pub fn read_timeout(&self) -> Duration {
		self.read_timeout
	}

	pub fn execution_timeout(&self) -> Option<Duration> {
		self.execution_timeout
	}

	/// Measured launch-to-exit time; requires profiling.
	pub fn execution_time(&self) -> Option<Duration> {
		self.execution_time
	}

	pub fn is_profiling(&self) -> bool {
		self.profiling
	}

	pub fn is_debug(&self) -> bool {
		self.debug
	}

	/// One bounded read cycle: wait up to `budget` for the first active
	/// channel, drain it, then give the other channel an instant poll. At
	/// most one chunk per channel keeps the cost of a single check bounded.
	async fn read_streams(&mut self, budget: Duration) -> Result<(), Error> {
		let first = {
			let Some(mux) = self.mux.as_mut() else {
				// both streams closed but the child lives on: keep the cadence
				sleep(budget).await;
				return Ok(());
			};
			mux.wait_ready(budget).await
		};
		let Some(first) = first else {
			return Ok(());
		};
		self.drain_channel(first).await?;
		self.drain_channel(first.other()).await?;
		Ok(())
	}

	/// After exit: pull everything still buffered until both channels hit
	/// end-of-stream or go quiet.
	async fn drain_remaining(&mut self) -> Result<(), Error> {
		loop {
			let next = {
				let Some(mux) = self.mux.as_mut() else {
					return Ok(());
				};
				mux.wait_ready(Duration::ZERO).await
			};
			let Some(channel) = next else {
				return Ok(());
			};
			self.drain_channel(channel).await?;
		}
	}

	async fn drain_channel(&mut self, channel: Channel) -> Result<(), Error> {
		let drained = {
			let Some(mux) = self.mux.as_mut() else {
				return Ok(());
			};
			mux.drain(channel).await?
		};
		self.absorb(channel, drained);
		Ok(())
	}

	fn absorb(&mut self, channel: Channel, drained: Drained) {
		match drained {
			Drained::Text(chunk) => match channel {
				Channel::Stdout => self.report.push_str(&chunk),
				Channel::Stderr => self.error.push_str(&chunk),
			},
			Drained::Eof => {
				if self.debug {
					self.log_report(format!("pipe {}: transmission done", channel.as_str()));
				}
				if self.mux.as_ref().map_or(true, |m| m.is_exhausted()) {
					self.mux = None;
				}
			}
			Drained::Empty => {}
		}
	}

	fn log_report(&mut self, line: String) {
		self.report.push_str(&line);
		self.report.push('\n');
	}

	fn log_error(&mut self, line: String) {
		self.error.push_str(&line);
		self.error.push('\n');
	}
}

impl Drop for Subprocess {
	fn drop(&mut self) {
		self.free_resources();
	}
}
