//! A running child process and its output.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use crate::buffer::{ByteStream, SharedBuffer};
use crate::lines::LineStream;
use crate::policy::OutputMode;
use crate::state::RunState;

/// Access to one captured output stream of a session
#[derive(Debug, Clone)]
pub struct Output {
    mode: OutputMode,
    buffer: SharedBuffer,
}

impl Output {
    pub(crate) fn new(mode: OutputMode, buffer: SharedBuffer) -> Self {
        Self { mode, buffer }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// A fresh stream of raw chunks, starting from the first byte produced
    pub fn bytes(&self) -> ByteStream {
        self.buffer.subscribe()
    }

    /// A fresh stream of lines, starting from the first line produced
    pub fn lines(&self) -> LineStream {
        LineStream::new(self.bytes())
    }

    /// Everything the stream produced, once it has closed
    pub async fn data(&self) -> Vec<u8> {
        self.bytes().collect_bytes().await
    }

    /// Everything the stream produced as (lossy) UTF-8, once it has closed
    pub async fn string(&self) -> String {
        String::from_utf8_lossy(&self.data().await).into_owned()
    }

    /// What has been captured so far, without waiting
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }

    /// Wait until the stream has been drained to its end
    pub async fn closed(&self) {
        let mut bytes = self.bytes();
        while bytes.next_chunk().await.is_some() {}
    }
}

/// Live handle to one child process
///
/// stdout, stderr and the exit state complete independently of each other;
/// waiting on any one of them never requires draining the others.
#[derive(Debug, Clone)]
pub struct Session {
    pid: Option<u32>,
    stdout: Output,
    stderr: Output,
    state: watch::Receiver<Option<RunState>>,
}

impl Session {
    pub(crate) fn new(
        pid: Option<u32>,
        stdout: Output,
        stderr: Output,
        state: watch::Receiver<Option<RunState>>,
    ) -> Self {
        Self {
            pid,
            stdout,
            stderr,
            state,
        }
    }

    /// OS process id, if the launch succeeded
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stdout(&self) -> &Output {
        &self.stdout
    }

    pub fn stderr(&self) -> &Output {
        &self.stderr
    }

    /// One-shot stream yielding the final state, then ending.
    ///
    /// The state is latched, so every call gets the same single value even
    /// after the process has long exited.
    pub fn state(&self) -> BoxStream<'static, RunState> {
        let mut receiver = self.state.clone();
        stream::once(async move { wait_for_state(&mut receiver).await }).boxed()
    }

    /// The final state, if the process has already finished
    pub fn try_state(&self) -> Option<RunState> {
        self.state.borrow().clone()
    }

    /// Wait for the process to finish and return its final state
    pub async fn wait_until_exit(&self) -> RunState {
        let mut receiver = self.state.clone();
        let state = wait_for_state(&mut receiver).await;
        tracing::debug!(%state, "termination state");
        state
    }

    /// Wait for the process to exit and for both outputs to close.
    ///
    /// A child can exit while output it wrote (or a background process it
    /// left holding the pipe) is still in flight; this waits for all of it.
    pub async fn wait_until_finished(&self) -> RunState {
        let (state, (), ()) = tokio::join!(
            self.wait_until_exit(),
            self.stdout.closed(),
            self.stderr.closed()
        );
        state
    }

    /// Wait for the process and turn a failure into an error.
    ///
    /// `make_error` is only invoked if the process did not succeed. It may
    /// return `None` to suppress the error. When the error type provides a
    /// description via [`DescribeFailure`], that description is attached.
    pub async fn throw_if_failed<E, F, Fut>(&self, make_error: F) -> Result<(), Failed<E>>
    where
        E: DescribeFailure,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<E>>,
    {
        let state = self.wait_until_exit().await;
        if state.is_success() {
            return Ok(());
        }

        let Some(error) = make_error().await else {
            tracing::debug!(%state, "failure suppressed by caller");
            return Ok(());
        };
        let description = error.describe(self).await;
        tracing::debug!(%state, %error, "raising failure");
        Err(Failed {
            error,
            state,
            description,
        })
    }

    /// Wait for the process and, if it failed, run `side_effect` in the
    /// background. Returns the final state.
    pub async fn if_failed<F, Fut>(&self, side_effect: F) -> RunState
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = self.wait_until_exit().await;
        if !state.is_success() {
            tokio::spawn(side_effect());
        }
        state
    }
}

async fn wait_for_state(receiver: &mut watch::Receiver<Option<RunState>>) -> RunState {
    if receiver.wait_for(Option::is_some).await.is_err() {
        tracing::warn!("exit notifier went away without reporting a state");
    }
    let state = receiver.borrow().clone();
    state.unwrap_or(RunState::Unknown)
}

/// Errors that can describe themselves using the session they came from,
/// e.g. by quoting its captured stderr.
#[async_trait]
pub trait DescribeFailure: StdError + Send + Sync + 'static {
    async fn describe(&self, _session: &Session) -> Option<String> {
        None
    }
}

/// A failed session, as raised by [`Session::throw_if_failed`]
#[derive(Debug)]
pub struct Failed<E> {
    pub error: E,
    pub state: RunState,
    pub description: Option<String>,
}

impl<E: fmt::Display> fmt::Display for Failed<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{description}"),
            None => write!(f, "{} ({})", self.error, self.state),
        }
    }
}

impl<E: StdError + 'static> StdError for Failed<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OutputBuffer;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error, PartialEq)]
    enum ArchiveError {
        #[error("archiving failed")]
        ArchiveFailed,
    }

    #[async_trait]
    impl DescribeFailure for ArchiveError {
        async fn describe(&self, session: &Session) -> Option<String> {
            let stderr = session.stderr().string().await;
            Some(format!("Archiving failed.\n\n{stderr}"))
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("plain failure")]
    struct PlainError;

    impl DescribeFailure for PlainError {}

    fn session_with(stderr: &[u8]) -> (Session, watch::Sender<Option<RunState>>) {
        let out = Arc::new(OutputBuffer::empty());
        let err = Arc::new(OutputBuffer::new());
        err.append(stderr).unwrap();
        err.close();
        let (tx, rx) = watch::channel(None);
        let session = Session::new(
            Some(1),
            Output::new(OutputMode::Forward, out),
            Output::new(OutputMode::Capture, err),
            rx,
        );
        (session, tx)
    }

    #[tokio::test]
    async fn test_state_is_latched_for_every_observer() {
        let (session, tx) = session_with(b"");
        let early = session.state();
        tx.send_replace(Some(RunState::Failed(2)));

        let early: Vec<_> = early.collect().await;
        let late: Vec<_> = session.state().collect().await;
        let again: Vec<_> = session.clone().state().collect().await;
        assert_eq!(early, vec![RunState::Failed(2)]);
        assert_eq!(late, vec![RunState::Failed(2)]);
        assert_eq!(again, vec![RunState::Failed(2)]);
        assert_eq!(session.try_state(), Some(RunState::Failed(2)));
    }

    #[tokio::test]
    async fn test_state_waits_for_exit() {
        let (session, tx) = session_with(b"");
        assert_eq!(session.try_state(), None);

        let waiter = tokio::spawn({
            let session = session.clone();
            async move { session.wait_until_exit().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(Some(RunState::Succeeded));
        assert_eq!(waiter.await.unwrap(), RunState::Succeeded);
    }

    #[tokio::test]
    async fn test_dropped_notifier_yields_unknown() {
        let (session, tx) = session_with(b"");
        drop(tx);
        assert_eq!(session.wait_until_exit().await, RunState::Unknown);
    }

    #[tokio::test]
    async fn test_throw_if_failed_describes_with_session() {
        let (session, tx) = session_with(b"does not contain a project\n");
        tx.send_replace(Some(RunState::Failed(65)));

        let err = session
            .throw_if_failed(|| async { Some(ArchiveError::ArchiveFailed) })
            .await
            .unwrap_err();
        assert_eq!(err.error, ArchiveError::ArchiveFailed);
        assert_eq!(err.state, RunState::Failed(65));
        assert!(err.to_string().contains("does not contain a project"));
        assert!(err.source().is_some());
    }

    #[tokio::test]
    async fn test_throw_if_failed_without_description() {
        let (session, tx) = session_with(b"");
        tx.send_replace(Some(RunState::UncaughtSignal));

        let err = session
            .throw_if_failed(|| async { Some(PlainError) })
            .await
            .unwrap_err();
        assert_eq!(err.description, None);
        assert_eq!(
            err.to_string(),
            "plain failure (terminated by uncaught signal)"
        );
    }

    #[tokio::test]
    async fn test_throw_if_failed_error_is_lazy_and_optional() {
        let (session, tx) = session_with(b"");
        tx.send_replace(Some(RunState::Succeeded));

        let called = AtomicBool::new(false);
        let result = session
            .throw_if_failed(|| async {
                called.store(true, Ordering::SeqCst);
                Some(PlainError)
            })
            .await;
        assert!(result.is_ok());
        assert!(!called.load(Ordering::SeqCst));

        let (session, tx) = session_with(b"");
        tx.send_replace(Some(RunState::Failed(1)));
        let result = session.throw_if_failed(|| async { None::<PlainError> }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_if_failed_runs_side_effect_in_background() {
        let (session, tx) = session_with(b"");
        tx.send_replace(Some(RunState::Failed(3)));

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let state = session
            .if_failed(move || async move {
                let _ = done_tx.send(());
            })
            .await;
        assert_eq!(state, RunState::Failed(3));
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_if_failed_skips_side_effect_on_success() {
        let (session, tx) = session_with(b"");
        tx.send_replace(Some(RunState::Succeeded));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        session
            .if_failed(move || async move { flag.store(true, Ordering::SeqCst) })
            .await;
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_wait_until_finished_waits_for_open_output() {
        let out = Arc::new(OutputBuffer::new());
        let (tx, rx) = watch::channel(Some(RunState::Succeeded));
        let session = Session::new(
            Some(1),
            Output::new(OutputMode::Both, Arc::clone(&out)),
            Output::new(OutputMode::Discard, Arc::new(OutputBuffer::empty())),
            rx,
        );

        let waiter = tokio::spawn({
            let session = session.clone();
            async move { session.wait_until_finished().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        out.append(b"late\n").unwrap();
        out.close();
        assert_eq!(waiter.await.unwrap(), RunState::Succeeded);
        assert_eq!(session.stdout().snapshot(), b"late\n");
        drop(tx);
    }

    #[tokio::test]
    async fn test_output_accessors() {
        let (session, _tx) = session_with(b"one\ntwo");
        assert_eq!(session.stderr().mode(), OutputMode::Capture);
        assert_eq!(session.stderr().snapshot(), b"one\ntwo");
        assert_eq!(session.stderr().data().await, b"one\ntwo");
        let lines: Vec<String> = session.stderr().lines().collect().await;
        assert_eq!(lines, vec!["one", "two"]);
        assert!(session.stdout().is_closed());
        assert!(session.stdout().bytes().next().await.is_none());
    }
}
