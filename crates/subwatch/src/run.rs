//! Convenience front door: run one command line to completion and hand back
//! what it produced.

use crate::error::Error;
use crate::options::Options;
use crate::subprocess::Subprocess;

/// Run a command line to completion with default settings.
///
/// Returns `(report, error, code)`: captured stdout, captured stderr plus
/// diagnostics, and the exit status — or the library error code when no
/// status was ever reaped.
pub async fn run_command(command_line: &str) -> Result<(String, String, i32), Error> {
	run_command_with_options(command_line, &Options::new()).await
}

/// Same as [`run_command`] with an option set applied first.
pub async fn run_command_with_options(
	command_line: &str,
	options: &Options,
) -> Result<(String, String, i32), Error> {
	let mut command = Subprocess::with_options(command_line, options)?;
	if command.launch() {
		command.wait().await?;
	}
	command.free_resources();
	Ok((
		command.report().to_string(),
		command.error().to_string(),
		command.exit_code(),
	))
}
