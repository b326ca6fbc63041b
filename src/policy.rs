//! Per-stream wiring: what the child writes into, and what the caller reads.

use std::process::Stdio;
use std::sync::Arc;

use clap::ValueEnum;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::buffer::{OutputBuffer, SharedBuffer};

const READ_CHUNK: usize = 8192;

/// How one output stream of the child is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputMode {
    /// Connect the child straight to our own stream; nothing is captured
    Forward,
    /// Collect everything for the caller; nothing is shown
    #[default]
    Capture,
    /// Collect everything and also copy each chunk to our own stream
    Both,
    /// Send the output to the null device
    Discard,
}

/// Destination for mirrored chunks
pub type Mirror = Box<dyn AsyncWrite + Send + Unpin>;

/// The parent's standard stream a child stream falls back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardStream {
    Stdout,
    Stderr,
}

impl StandardStream {
    pub fn name(self) -> &'static str {
        match self {
            StandardStream::Stdout => "stdout",
            StandardStream::Stderr => "stderr",
        }
    }

    /// Writer used to mirror captured chunks in [`OutputMode::Both`]
    pub fn writer(self) -> Mirror {
        match self {
            StandardStream::Stdout => Box::new(tokio::io::stdout()),
            StandardStream::Stderr => Box::new(tokio::io::stderr()),
        }
    }
}

/// Wiring decided for one stream before the child is spawned
#[derive(Debug)]
pub struct PipeInfo {
    mode: OutputMode,
    standard: StandardStream,
    buffer: SharedBuffer,
}

impl PipeInfo {
    /// Decide how to wire a stream for `mode`.
    ///
    /// | mode    | child writes into | caller reads        |
    /// |---------|-------------------|---------------------|
    /// | Forward | our own stream    | pre-closed, empty   |
    /// | Capture | a fresh pipe      | buffer fed by drain |
    /// | Both    | a fresh pipe      | buffer fed by drain, mirrored |
    /// | Discard | null device       | pre-closed, empty   |
    pub fn decide(mode: OutputMode, standard: StandardStream) -> Self {
        let buffer = match mode {
            OutputMode::Capture | OutputMode::Both => OutputBuffer::new(),
            OutputMode::Forward | OutputMode::Discard => OutputBuffer::empty(),
        };
        Self {
            mode,
            standard,
            buffer: Arc::new(buffer),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// The `Stdio` to hand to the child for this stream
    pub fn stdio(&self) -> Stdio {
        match self.mode {
            OutputMode::Forward => Stdio::inherit(),
            OutputMode::Capture | OutputMode::Both => Stdio::piped(),
            OutputMode::Discard => Stdio::null(),
        }
    }

    pub fn buffer(&self) -> SharedBuffer {
        Arc::clone(&self.buffer)
    }

    /// Start draining the child's end of the pipe, if this mode has one.
    ///
    /// If the pipe is missing (launch failed) the buffer is closed so its
    /// readers never wait forever.
    pub fn attach<R>(&self, reader: Option<R>) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mirror = match self.mode {
            OutputMode::Both => Some(self.standard.writer()),
            OutputMode::Capture => None,
            OutputMode::Forward | OutputMode::Discard => return None,
        };

        match reader {
            Some(reader) => Some(tokio::spawn(drain(
                reader,
                self.buffer(),
                mirror,
                self.standard.name(),
            ))),
            None => {
                self.buffer.close();
                None
            }
        }
    }
}

/// Read `reader` until end-of-file, feeding `buffer` and optionally `mirror`.
///
/// The buffer is always closed on exit, including after a read error.
pub(crate) async fn drain<R>(
    mut reader: R,
    buffer: SharedBuffer,
    mut mirror: Option<Mirror>,
    name: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let data = &chunk[..n];
                if let Some(out) = mirror.as_mut() {
                    if let Err(e) = mirror_chunk(out, data).await {
                        tracing::warn!(stream = name, error = %e, "failed to mirror output");
                    }
                }
                if let Err(e) = buffer.append(data) {
                    tracing::error!(stream = name, error = %e, "drain loop appended after close");
                    return;
                }
                tracing::trace!(stream = name, bytes = n, "appended");
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream = name, error = %e, "read failed, closing stream");
                break;
            }
        }
    }
    buffer.close();
    tracing::debug!(stream = name, "closed");
}

async fn mirror_chunk(out: &mut Mirror, data: &[u8]) -> std::io::Result<()> {
    out.write_all(data).await?;
    out.flush().await
}
