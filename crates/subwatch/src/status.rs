//! Exit-status mapping for the hosting OS.

use std::process::ExitStatus;

/// Status recorded when a process was killed before a real exit status could
/// be reaped.
pub const STATUS_KILLED: i32 = 4;

/// Collapse an OS exit status to the single-number convention used by this
/// crate: the exit code when the process exited on its own, the negated
/// signal number when a signal took it down.
pub fn exit_code(status: ExitStatus) -> i32 {
	#[cfg(unix)]
	{
		use std::os::unix::process::ExitStatusExt;
		if let Some(signal) = status.signal() {
			return -signal;
		}
	}
	status.code().unwrap_or(-1)
}
