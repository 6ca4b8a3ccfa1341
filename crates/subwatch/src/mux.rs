use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};

use crate::error::Error;

/// One read attempt pulls at most this much from a pipe.
pub const CHUNK_SIZE: usize = 8192;

/// The two captured output channels of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
	Stdout,
	Stderr,
}

impl Channel {
	pub fn as_str(&self) -> &'static str {
		match self {
			Channel::Stdout => "stdout",
			Channel::Stderr => "stderr",
		}
	}

	pub fn other(&self) -> Channel {
		match self {
			Channel::Stdout => Channel::Stderr,
			Channel::Stderr => Channel::Stdout,
		}
	}
}

/// Outcome of draining one channel.
#[derive(Debug)]
pub enum Drained {
	/// A decoded chunk of output.
	Text(String),
	/// The channel hit end-of-stream and was unregistered.
	Eof,
	/// Nothing was pending on the channel right now.
	Empty,
}

struct Pipe<R> {
	reader: Option<R>,
	pending: Option<Vec<u8>>,
	fault: Option<io::Error>,
	partial: Vec<u8>,
}

impl<R> Pipe<R> {
	fn new(reader: R) -> Self {
		Self {
			reader: Some(reader),
			pending: None,
			fault: None,
			partial: Vec::new(),
		}
	}

	fn open(&self) -> bool {
		self.reader.is_some()
	}

	fn ready(&self) -> bool {
		self.pending.is_some() || self.fault.is_some()
	}

	fn settle(&mut self, res: io::Result<Vec<u8>>) {
		match res {
			Ok(chunk) => self.pending = Some(chunk),
			Err(e) => self.fault = Some(e),
		}
	}
}

/// Multiplexes the stdout and stderr pipes of one running process behind a
/// single bounded-wait readiness query.
///
/// `wait_ready` blocks at most its timeout and returns as soon as either
/// channel has activity; `drain` never blocks. An empty read marks a channel
/// as finished: it is unregistered and its descriptor closed. Once both
/// channels are gone the mux is exhausted and should be released.
pub struct PipeMux {
	stdout: Pipe<ChildStdout>,
	stderr: Pipe<ChildStderr>,
}

impl PipeMux {
	pub fn new(stdout: ChildStdout, stderr: ChildStderr) -> Self {
		Self {
			stdout: Pipe::new(stdout),
			stderr: Pipe::new(stderr),
		}
	}

	/// Wait up to `timeout` for activity on either channel.
	///
	/// Returns the channel with data (or end-of-stream) pending, or `None`
	/// once the timeout expires or both channels are exhausted. A zero
	/// timeout polls instantly without waiting.
	pub async fn wait_ready(&mut self, timeout: Duration) -> Option<Channel> {
		if self.stdout.ready() {
			return Some(Channel::Stdout);
		}
		if self.stderr.ready() {
			return Some(Channel::Stderr);
		}
		if !self.stdout.open() && !self.stderr.open() {
			return None;
		}

		let (channel, res) = tokio::select! {
			biased;
			res = read_chunk(self.stdout.reader.as_mut()) => (Channel::Stdout, Some(res)),
			res = read_chunk(self.stderr.reader.as_mut()) => (Channel::Stderr, Some(res)),
			_ = tokio::time::sleep(timeout) => (Channel::Stdout, None),
		};

		let res = res?;
		match channel {
			Channel::Stdout => self.stdout.settle(res),
			Channel::Stderr => self.stderr.settle(res),
		}
		Some(channel)
	}

	/// One non-blocking drain attempt on `channel`.
	///
	/// Takes the chunk stashed by `wait_ready` when there is one, otherwise
	/// gives the pipe a single instant poll. An empty successful read is
	/// end-of-stream: the channel is closed and reports `Drained::Eof` once.
	pub async fn drain(&mut self, channel: Channel) -> Result<Drained, Error> {
		match channel {
			Channel::Stdout => drain_pipe(&mut self.stdout, channel).await,
			Channel::Stderr => drain_pipe(&mut self.stderr, channel).await,
		}
	}

	/// Both channels closed and nothing left pending.
	pub fn is_exhausted(&self) -> bool {
		!self.stdout.open()
			&& !self.stderr.open()
			&& !self.stdout.ready()
			&& !self.stderr.ready()
	}
}

async fn drain_pipe<R>(pipe: &mut Pipe<R>, channel: Channel) -> Result<Drained, Error>
where
	R: AsyncRead + Unpin,
{
	if let Some(e) = pipe.fault.take() {
		pipe.reader = None;
		return Err(Error::Read(channel, e));
	}

	let chunk = match pipe.pending.take() {
		Some(chunk) => chunk,
		None => {
			let Some(reader) = pipe.reader.as_mut() else {
				return Ok(Drained::Empty);
			};
			match tokio::time::timeout(Duration::ZERO, read_chunk(Some(reader))).await {
				Ok(Ok(chunk)) => chunk,
				Ok(Err(e)) => {
					pipe.reader = None;
					return Err(Error::Read(channel, e));
				}
				Err(_) => return Ok(Drained::Empty),
			}
		}
	};

	if chunk.is_empty() {
		pipe.reader = None;
		if !pipe.partial.is_empty() {
			// the stream ended in the middle of a multi-byte sequence
			pipe.partial.clear();
			return Err(Error::Decode(channel));
		}
		return Ok(Drained::Eof);
	}

	decode(pipe, chunk, channel).map(Drained::Text)
}

/// Decode a chunk, carrying an incomplete trailing sequence over to the next
/// read so chunk boundaries cannot split a character.
fn decode<R>(pipe: &mut Pipe<R>, chunk: Vec<u8>, channel: Channel) -> Result<String, Error> {
	let mut bytes = std::mem::take(&mut pipe.partial);
	bytes.extend_from_slice(&chunk);

	match String::from_utf8(bytes) {
		Ok(text) => Ok(text),
		Err(e) => {
			let valid = e.utf8_error().valid_up_to();
			if e.utf8_error().error_len().is_some() {
				return Err(Error::Decode(channel));
			}
			let mut bytes = e.into_bytes();
			pipe.partial = bytes.split_off(valid);
			Ok(String::from_utf8(bytes).unwrap_or_default())
		}
	}
}

async fn read_chunk<R>(reader: Option<&mut R>) -> io::Result<Vec<u8>>
where
	R: AsyncRead + Unpin,
{
	match reader {
		Some(reader) => {
			let mut buf = vec![0u8; CHUNK_SIZE];
			let n = reader.read(&mut buf).await?;
			buf.truncate(n);
			Ok(buf)
		}
		// a closed channel never becomes ready; the timeout branch wins
		None => std::future::pending().await,
	}
}
