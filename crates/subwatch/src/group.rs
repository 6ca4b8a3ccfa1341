use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use crate::error::Error;
use crate::options::{duration_opt, Options};
use crate::subprocess::{Subprocess, CODE_OK, CODE_TIMEOUT};

/// An ordered set of supervised commands driven on a shared polling budget.
///
/// The group divides its check interval across all members, so one full
/// polling pass costs at most one interval no matter how many commands it
/// holds. Members are always visited in insertion order and only through
/// their public operations; results aggregate upwards as the highest error
/// code plus the concatenated report/error text.
pub struct SubprocessGroup {
	commands: Vec<Subprocess>,
	check_interval: Option<Duration>,
	read_timeout: Duration,
	execution_timeout: Option<Duration>,
	report: String,
	error: String,
	code: u8,
	debug: bool,
	quiet: bool,
	profiling: bool,
	started_at: Option<Instant>,
	execution_time: Option<Duration>,
}

impl SubprocessGroup {
	pub fn new() -> Self {
		Self {
			commands: Vec::new(),
			check_interval: None,
			read_timeout: Duration::ZERO,
			execution_timeout: None,
			report: String::new(),
			error: String::new(),
			code: CODE_OK,
			debug: false,
			quiet: false,
			profiling: false,
			started_at: None,
			execution_time: None,
		}
	}

	pub fn with_options(options: &Options) -> Result<Self, Error> {
		let mut group = Self::new();
		group.apply_options(options)?;
		Ok(group)
	}

	pub fn apply_options(&mut self, options: &Options) -> Result<(), Error> {
		if let Some(check) = options.check {
			self.set_check_interval(duration_opt(check));
		}
		if let Some(timeout) = options.timeout {
			self.execution_timeout = duration_opt(timeout);
		}
		if let Some(debug) = options.debug {
			self.debug = debug;
		}
		if let Some(quiet) = options.quiet {
			self.quiet = quiet;
		}
		if let Some(profiling) = options.profiling {
			self.profiling = profiling;
		}
		Ok(())
	}

	/// Append a command; the shared read budget is re-derived for the new
	/// member count.
	pub fn add(&mut self, command: Subprocess) -> &mut Subprocess {
		self.commands.push(command);
		self.distribute_read_timeout();
		let last = self.commands.len() - 1;
		&mut self.commands[last]
	}

	/// Construct a command from a command line plus options and append it.
	pub fn add_command_line(
		&mut self,
		command_line: &str,
		options: &Options,
	) -> Result<&mut Subprocess, Error> {
		let command = Subprocess::with_options(command_line, options)?;
		Ok(self.add(command))
	}

	/// Total wall-clock budget of one polling pass; `None` disables pacing.
	pub fn set_check_interval(&mut self, interval: Option<Duration>) {
		self.check_interval = interval;
		self.distribute_read_timeout();
	}

	/// Push one read timeout to every member.
	pub fn set_read_timeout(&mut self, timeout: Duration) {
		self.read_timeout = timeout;
		for command in &mut self.commands {
			command.set_read_timeout(timeout);
		}
	}

	pub fn set_execution_timeout(&mut self, timeout: Option<Duration>) {
		self.execution_timeout = timeout;
	}

	/// Divide the check interval across members: every member polls for at
	/// most `interval / count`, so a full pass stays within one interval.
	fn distribute_read_timeout(&mut self) {
		if self.commands.is_empty() {
			return;
		}
		if let Some(interval) = self.check_interval {
			let share = interval / self.commands.len() as u32;
			self.set_read_timeout(share);
		}
	}

	/// Launch every member in order. A failed launch is recorded and the
	/// remaining members still launch; returns how many came up.
	pub fn launch(&mut self) -> usize {
		if self.started_at.is_none() && (self.execution_timeout.is_some() || self.profiling) {
			self.started_at = Some(Instant::now());
		}

		let mut launched = 0;
		for idx in 0..self.commands.len() {
			if self.commands[idx].launch() {
				launched += 1;
				if self.debug && !self.quiet {
					let line = format!("command {} {}: launch ok", idx, self.commands[idx].label());
					self.log_report(line);
				}
			} else {
				let line = format!("command {} {}: launch failed", idx, self.commands[idx].label());
				let severity = self.commands[idx].code();
				self.log_error(line);
				self.raise_code(severity);
			}
		}
		debug!(launched, members = self.commands.len(), "group launched");
		launched
	}

	/// One scheduling pass in insertion order.
	///
	/// Each member's poll is bounded by its derived read timeout, so a late
	/// member never starves an earlier one. When the group execution timeout
	/// fires mid-pass the remaining members are left for the next pass.
	/// Returns how many visited members are still running.
	pub async fn check(&mut self) -> Result<usize, Error> {
		let mut running = 0;
		let mut polled = false;
		for command in &mut self.commands {
			// stop early once over budget, but only after polling someone:
			// every pass must make progress
			if polled && timed_out(self.started_at, self.execution_timeout) {
				break;
			}
			if command.is_running() {
				polled = true;
				if command.check().await? {
					running += 1;
				}
			}
		}
		Ok(running)
	}

	/// Drive passes until every member is done, pacing them to the check
	/// interval.
	///
	/// A pass that finishes early sleeps out the rest of the interval, so a
	/// handful of fast processes cannot turn supervision into a hot loop. On
	/// group timeout every running member is terminated and `Ok(false)` is
	/// returned; `Ok(true)` means all members finished on their own.
	pub async fn wait(&mut self) -> Result<bool, Error> {
		if self.started_at.is_none() && (self.execution_timeout.is_some() || self.profiling) {
			self.started_at = Some(Instant::now());
		}

		while self.any_running() {
			let pass_start = Instant::now();
			self.check().await?;
			if !self.any_running() {
				break;
			}

			if timed_out(self.started_at, self.execution_timeout) {
				let line = "group: execution timed out".to_string();
				self.log_error(line);
				if let (Some(start), Some(limit)) = (self.started_at, self.execution_timeout) {
					self.log_error(format!(
						"execution time '{:.0} / {:.0}' s",
						start.elapsed().as_secs_f64(),
						limit.as_secs_f64()
					));
				}
				self.raise_code(CODE_TIMEOUT);
				for command in &mut self.commands {
					if command.is_running() {
						command.terminate().await?;
					}
				}
				if self.profiling {
					self.execution_time = self.started_at.map(|t| t.elapsed());
				}
				debug!(code = self.code, "group timed out");
				return Ok(false);
			}

			if let Some(interval) = self.check_interval {
				let spent = pass_start.elapsed();
				if spent < interval {
					sleep(interval - spent).await;
				}
			}
		}

		if self.profiling {
			self.execution_time = self.started_at.map(|t| t.elapsed());
		}
		Ok(true)
	}

	/// Merge options first, then [`wait`](Self::wait).
	pub async fn wait_with_options(&mut self, options: &Options) -> Result<bool, Error> {
		self.apply_options(options)?;
		self.wait().await
	}

	/// Launch then wait. Members that failed to launch do not stop the ones
	/// that did from being supervised to completion; the result is `true`
	/// only when everything launched and finished without a group timeout.
	pub async fn run(&mut self) -> Result<bool, Error> {
		let launched = self.launch();
		let all = launched == self.commands.len();
		let finished = self.wait().await?;
		Ok(all && finished)
	}

	/// Merge options first, then [`run`](Self::run).
	pub async fn run_with_options(&mut self, options: &Options) -> Result<bool, Error> {
		self.apply_options(options)?;
		self.run().await
	}

	pub async fn terminate(&mut self) -> Result<(), Error> {
		for command in &mut self.commands {
			command.terminate().await?;
		}
		Ok(())
	}

	pub fn kill(&mut self) {
		for command in &mut self.commands {
			command.kill();
		}
	}

	pub fn free_resources(&mut self) {
		for command in &mut self.commands {
			command.free_resources();
		}
	}

	/// Reset aggregated text, codes and timers, on the group and on every
	/// member.
	pub fn clear_errors(&mut self) {
		for command in &mut self.commands {
			command.clear_errors();
		}
		self.report.clear();
		self.error.clear();
		self.code = CODE_OK;
		self.started_at = None;
		self.execution_time = None;
	}

	pub fn raise_code(&mut self, severity: u8) {
		if self.code < severity {
			self.code = severity;
		}
	}

	pub fn len(&self) -> usize {
		self.commands.len()
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&Subprocess> {
		self.commands.get(index)
	}

	pub fn get_mut(&mut self, index: usize) -> Option<&mut Subprocess> {
		self.commands.get_mut(index)
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Subprocess> {
		self.commands.iter()
	}

	pub fn any_running(&self) -> bool {
		self.commands.iter().any(|c| c.is_running())
	}

	/// Group narration plus every member's report, in insertion order.
	pub fn report(&self) -> String {
		let mut out = self.report.clone();
		for command in &self.commands {
			out.push_str(command.report());
		}
		out
	}

	/// Group diagnostics plus every member's error text, in insertion order.
	pub fn error(&self) -> String {
		let mut out = self.error.clone();
		for command in &self.commands {
			out.push_str(command.error());
		}
		out
	}

	/// Highest severity recorded by the group or any member.
	pub fn code(&self) -> u8 {
		self.commands.iter().map(|c| c.code()).fold(self.code, u8::max)
	}

	pub fn check_interval(&self) -> Option<Duration> {
		self.check_interval
	}

	pub fn read_timeout(&self) -> Duration {
		self.read_timeout
	}

	pub fn execution_timeout(&self) -> Option<Duration> {
		self.execution_timeout
	}

	/// Measured launch-to-done time; requires profiling.
	pub fn execution_time(&self) -> Option<Duration> {
		self.execution_time
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

impl Default for SubprocessGroup {
	fn default() -> Self {
		Self::new()
	}
}

fn timed_out(started_at: Option<Instant>, limit: Option<Duration>) -> bool {
	match (started_at, limit) {
		(Some(start), Some(limit)) => start.elapsed() >= limit,
		_ => false,
	}
}
