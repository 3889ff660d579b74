//! Streaming turn output.
//!
//! A running turn pushes text fragments into a bounded channel; the caller
//! consumes them as a [`TurnStream`]. The channel bound gives
//! consumer-driven backpressure, and dropping the stream early cancels the
//! turn through the shared token.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::runner::TurnOutcome;

/// Producer half: where a turn writes its text.
#[derive(Clone)]
pub struct FragmentSink {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Create a connected sink and receiver with room for `buffer` fragments.
pub fn fragment_channel(buffer: usize, cancel: CancellationToken) -> (FragmentSink, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (FragmentSink { tx, cancel }, rx)
}

impl FragmentSink {
    /// Deliver one fragment, waiting for channel capacity.
    ///
    /// Fails with [`EngineError::Aborted`] once the turn is cancelled or the
    /// consumer has gone away; the latter also cancels the turn.
    pub async fn send(&self, fragment: String) -> Result<(), EngineError> {
        if fragment.is_empty() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Aborted),
            sent = self.tx.send(fragment) => sent.map_err(|_| {
                self.cancel.cancel();
                EngineError::Aborted
            }),
        }
    }

    /// Deliver a complete message as whitespace-delimited fragments.
    pub async fn send_message(&self, message: &str) -> Result<(), EngineError> {
        for fragment in fragment_on_whitespace(message) {
            self.send(fragment).await?;
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// After a turn settles, stream the user-facing notice for a rejection or
/// fatal error. Completed and aborted turns emit nothing more.
pub async fn emit_outcome_notice(sink: &FragmentSink, result: &Result<TurnOutcome, EngineError>) {
    let notice = match result {
        Ok(TurnOutcome::Rejected(rejection)) => Some(rejection.user_message()),
        Err(EngineError::Aborted) | Ok(TurnOutcome::Completed(_)) => None,
        Err(e) => Some(e.user_message()),
    };
    if let Some(message) = notice {
        // consumer may already be gone
        let _ = sink.send_message(message).await;
    }
}

/// Split `text` after each run of whitespace. Concatenating the pieces
/// reproduces `text` exactly.
pub fn fragment_on_whitespace(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = c.is_whitespace() && chars.peek().is_some_and(|next| !next.is_whitespace());
        if boundary {
            pieces.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Consumer half: a lazy, finite, single-use stream of text fragments plus
/// the turn's final outcome.
pub struct TurnStream {
    rx: mpsc::Receiver<String>,
    task: Option<JoinHandle<Result<TurnOutcome, EngineError>>>,
    cancel: CancellationToken,
    exhausted: bool,
}

impl TurnStream {
    pub fn new(
        rx: mpsc::Receiver<String>,
        task: JoinHandle<Result<TurnOutcome, EngineError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            task: Some(task),
            cancel,
            exhausted: false,
        }
    }

    /// Cancel the underlying turn.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to settle. Fragments not yet consumed are discarded.
    pub async fn final_output(mut self) -> Result<TurnOutcome, EngineError> {
        while self.rx.recv().await.is_some() {}
        self.exhausted = true;
        let task = self
            .task
            .take()
            .ok_or_else(|| EngineError::Internal("turn outcome already taken".into()))?;
        task.await
            .map_err(|e| EngineError::Internal(format!("turn task failed: {e}")))?
    }
}

impl Stream for TurnStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.exhausted = true;
        }
        polled
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if !self.exhausted {
            self.cancel.cancel();
        }
    }
}
