use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{Result, RunnerError};

/// Append-only byte buffer that replays its contents to every subscriber.
///
/// A single producer appends chunks and eventually closes the buffer. Any
/// number of subscribers can attach at any time; each one first receives
/// everything accumulated so far and then every later chunk, until close.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    closed: bool,
    subscribers: Vec<UnboundedSender<Vec<u8>>>,
}

impl OutputBuffer {
    /// Create an open, empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer that is already closed and holds no bytes
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Inner {
                closed: true,
                ..Inner::default()
            }),
        }
    }

    /// Append a chunk and push it to every live subscriber.
    ///
    /// Subscribers whose stream has been dropped are detached here.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RunnerError::InvariantViolation(format!(
                "append of {} bytes to a closed output buffer",
                bytes.len()
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        inner.data.extend_from_slice(bytes);
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(bytes.to_vec()).is_ok());
        Ok(())
    }

    /// Mark end-of-stream.
    ///
    /// Dropping the senders ends every subscriber's stream once it has
    /// drained what was already queued for it. Closing twice is a no-op.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> ByteStream {
        let (sender, receiver) = unbounded_channel();
        let mut inner = self.inner.lock();

        if !inner.data.is_empty() {
            // Cannot fail: the receiver is still in our hands.
            let _ = sender.send(inner.data.clone());
        }
        if !inner.closed {
            inner.subscribers.push(sender);
        }

        ByteStream { receiver }
    }

    /// Bytes accumulated so far, without waiting for close
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of subscribers still attached
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// One subscriber's view of an [`OutputBuffer`], as a stream of chunks.
///
/// Dropping the stream detaches it without affecting the producer or any
/// other subscriber.
#[derive(Debug)]
pub struct ByteStream {
    receiver: UnboundedReceiver<Vec<u8>>,
}

impl ByteStream {
    /// Receive the next chunk, or `None` once the buffer is closed
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Drain the stream to its end and return everything it delivered
    pub async fn collect_bytes(mut self) -> Vec<u8> {
        let mut all = Vec::new();
        while let Some(chunk) = self.receiver.recv().await {
            all.extend_from_slice(&chunk);
        }
        all
    }
}

impl Stream for ByteStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Shared handle to a buffer, as held by a session and its drain task
pub type SharedBuffer = Arc<OutputBuffer>;
