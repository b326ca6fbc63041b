//! Run subprocesses and consume their output.
//!
//! A [`Runner`] launches an executable and hands back a [`Session`]
//! straight away. The session exposes the child's stdout and stderr as
//! replayable async streams of bytes or lines, and its final [`RunState`]
//! as a one-shot stream. The three complete independently.
//!
//! ```no_run
//! # async fn demo() {
//! use futures::StreamExt;
//! use procrun::{OutputMode, RunState, Runner};
//!
//! let runner = Runner::for_command("git");
//! let session = runner.run(["status", "--short"], OutputMode::Capture, OutputMode::Both);
//! let mut lines = session.stdout().lines();
//! while let Some(line) = lines.next().await {
//!     println!("changed: {line}");
//! }
//! assert_eq!(session.wait_until_exit().await, RunState::Succeeded);
//! # }
//! ```

// Platform-specific compilation guard
#[cfg(not(unix))]
compile_error!("procrun requires a Unix-like operating system (exec and signal reporting).");

pub mod buffer;
pub mod cli;
pub mod error;
pub mod lines;
pub mod path;
pub mod policy;
pub mod process;
pub mod session;
pub mod state;

pub use buffer::{ByteStream, OutputBuffer};
pub use error::{Result, RunnerError};
pub use lines::{LineSplitter, LineStream};
pub use policy::{OutputMode, PipeInfo, StandardStream};
pub use process::Runner;
pub use session::{DescribeFailure, Failed, Output, Session};
pub use state::RunState;
