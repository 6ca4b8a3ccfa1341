//! # subwatch
//!
//! Supervised child processes for Rust CLIs and services.
//!
//! Launch a command with captured stdout/stderr, poll it without ever
//! blocking longer than a configured read timeout, and let an execution
//! timeout escalate from SIGTERM to SIGKILL when the child overstays. A
//! [`SubprocessGroup`] fans the same pattern over several commands while
//! dividing one polling budget across all of them.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use subwatch::{Options, Subprocess};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), subwatch::Error> {
//! let mut cmd = Subprocess::with_options(
//!     "sleep 2",
//!     &Options { check: Some(1), timeout: Some(5), ..Default::default() },
//! )?;
//!
//! if cmd.launch() {
//!     cmd.wait().await?;
//! }
//! println!("status {:?}, code {}", cmd.status(), cmd.code());
//! println!("{}", cmd.report());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod group;
pub mod mux;
pub mod options;
pub mod run;
pub mod status;
pub mod subprocess;

pub use error::Error;
pub use group::SubprocessGroup;
pub use mux::{Channel, Drained, PipeMux};
pub use options::Options;
pub use run::{run_command, run_command_with_options};
pub use status::STATUS_KILLED;
pub use subprocess::{Subprocess, CODE_LAUNCH_FAILED, CODE_OK, CODE_TIMEOUT};
