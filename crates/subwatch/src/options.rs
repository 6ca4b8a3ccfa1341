use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

/// Flat configuration surface shared by [`Subprocess`](crate::Subprocess)
/// and [`SubprocessGroup`](crate::SubprocessGroup).
///
/// Durations are whole seconds; a negative value disables the timeout it
/// configures. `check` doubles as the per-poll read timeout on a single
/// command and the pass interval on a group (`read` and `readtimeout` are
/// accepted aliases). Unknown keys are rejected at construction time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
	pub name: Option<String>,
	pub command: Option<String>,
	#[serde(alias = "read", alias = "readtimeout")]
	pub check: Option<i64>,
	pub timeout: Option<i64>,
	pub debug: Option<bool>,
	pub quiet: Option<bool>,
	pub profiling: Option<bool>,
}

impl Options {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse an option set from a TOML fragment, e.g. `check = 2`.
	pub fn from_toml(text: &str) -> Result<Self, Error> {
		toml::from_str(text).map_err(|e| Error::Options(e.to_string()))
	}
}

/// Seconds-with-negative-sentinel to `Duration`: `-1` (or any negative)
/// means disabled.
pub(crate) fn duration_opt(seconds: i64) -> Option<Duration> {
	if seconds < 0 {
		None
	} else {
		Some(Duration::from_secs(seconds as u64))
	}
}
