use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::buffer::ByteStream;

/// State machine that splits a chunked byte stream into lines
///
/// Lines can be split across any number of chunks; the splitter keeps the
/// unterminated tail between calls to [`LineSplitter::feed`].
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed.
    ///
    /// `\n` terminates a line; a `\r` right before it is dropped. Invalid
    /// UTF-8 is replaced with U+FFFD rather than failing the stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        for (index, &byte) in chunk.iter().enumerate() {
            if byte == b'\n' {
                self.pending.extend_from_slice(&chunk[start..index]);
                lines.push(decode_line(&self.pending));
                self.pending.clear();
                start = index + 1;
            }
        }
        self.pending.extend_from_slice(&chunk[start..]);

        lines
    }

    /// End of input: return the final unterminated line, if it has content
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    /// Check whether a partial line is being held back
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Line-by-line view over a [`ByteStream`]
#[derive(Debug)]
pub struct LineStream {
    bytes: ByteStream,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    finished: bool,
}

impl LineStream {
    pub fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            splitter: LineSplitter::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Receive the next line, or `None` at end of stream
    pub async fn next_line(&mut self) -> Option<String> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(line));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.bytes).poll_next(cx) {
                Poll::Ready(Some(chunk)) => this.ready.extend(this.splitter.feed(&chunk)),
                Poll::Ready(None) => {
                    this.finished = true;
                    this.ready.extend(this.splitter.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
