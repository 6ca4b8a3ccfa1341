use std::io;

use crate::mux::Channel;

/// Defect-class failures surfaced by the supervision layer.
///
/// Expected outcomes of running a child — launch failure, execution timeout,
/// forced kill, non-zero exit — never show up here; those are recorded on
/// the command's error buffer and code. An `Error` means the supervisor
/// itself hit something it could not account for.
#[derive(Debug)]
pub enum Error {
	/// A captured stream produced bytes that are not valid UTF-8.
	Decode(Channel),
	/// IO fault while reading a captured stream.
	Read(Channel, io::Error),
	/// Polling the OS for the exit status failed.
	Wait(io::Error),
	/// A pre-launch-only setting was changed after launch.
	AlreadyLaunched(&'static str),
	/// Malformed option set.
	Options(String),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Decode(ch) => write!(f, "undecodable output on {}", ch.as_str()),
			Error::Read(ch, e) => write!(f, "read error on {}: {}", ch.as_str(), e),
			Error::Wait(e) => write!(f, "status poll failed: {}", e),
			Error::AlreadyLaunched(what) => {
				write!(f, "cannot change {} after launch", what)
			}
			Error::Options(e) => write!(f, "invalid options: {}", e),
		}
	}
}

impl std::error::Error for Error {}
