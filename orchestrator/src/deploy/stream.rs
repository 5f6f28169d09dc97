//! Streaming protocol for long-running lifecycle operations
//!
//! An operation runs in its own task and reports through an [`Emitter`]. The
//! consumer pulls [`StreamMessage`]s from the returned [`OperationStream`];
//! dropping the stream (or calling [`OperationStream::cancel`]) cancels the
//! operation, which kills any subprocess it has in flight.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{OrchestratorError, Result};

/// Operation progress for one app
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub name: String,
    pub progress: f32,
}

#[derive(Debug)]
pub enum StreamMessage {
    Progress(Progress),
    Info(String),
    /// Terminal failure; always the last message of a stream
    Error(OrchestratorError),
}

impl StreamMessage {
    /// Completion (100%) or failure
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamMessage::Progress(p) => p.progress >= 100.0,
            StreamMessage::Info(_) => false,
            StreamMessage::Error(_) => true,
        }
    }
}

/// Receiver of subprocess output lines
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn line(&self, line: String);
}

/// Discards every line
pub struct NullSink;

#[async_trait]
impl LineSink for NullSink {
    async fn line(&self, _line: String) {}
}

/// Producer side of an operation stream
#[derive(Debug, Clone)]
pub struct Emitter {
    name: String,
    tx: Option<mpsc::Sender<StreamMessage>>,
    cancel: CancellationToken,
}

impl Emitter {
    /// An emitter nobody listens to, for operations invoked without a stream
    pub fn detached(name: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            tx: None,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast once the consumer is gone
    pub fn check_canceled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::OperationCanceled);
        }
        Ok(())
    }

    pub async fn info(&self, line: impl Into<String>) -> Result<()> {
        self.send(StreamMessage::Info(line.into())).await
    }

    /// Intermediate progress, capped below 100 so that only the terminal
    /// message reports completion
    pub async fn progress(&self, progress: f32) -> Result<()> {
        self.send(StreamMessage::Progress(Progress {
            name: self.name.clone(),
            progress: progress.clamp(0.0, 99.0),
        }))
        .await
    }

    async fn send(&self, message: StreamMessage) -> Result<()> {
        self.check_canceled()?;
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        if tx.send(message).await.is_err() {
            debug!(operation = %self.name, "stream consumer went away, canceling");
            self.cancel.cancel();
            return Err(OrchestratorError::OperationCanceled);
        }
        Ok(())
    }
}

#[async_trait]
impl LineSink for Emitter {
    async fn line(&self, line: String) {
        let _ = self.info(line).await;
    }
}

/// Consumer side of an operation: a finite stream ending with exactly one
/// terminal message
pub struct OperationStream {
    inner: ReceiverStream<StreamMessage>,
    cancel: CancellationToken,
    finished: bool,
}

impl OperationStream {
    /// Run `operation` in a new task. Success is reported as a final 100%
    /// progress message, failure as a final error message.
    pub fn spawn<F, Fut>(name: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        let emitter = Emitter {
            name: name.clone(),
            tx: Some(tx.clone()),
            cancel: cancel.clone(),
        };

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            // dropping the operation future kills its subprocesses
            let result = tokio::select! {
                biased;
                _ = task_cancel.cancelled() => Err(OrchestratorError::OperationCanceled),
                result = operation(emitter) => result,
            };
            let terminal = match result {
                Ok(()) => StreamMessage::Progress(Progress {
                    name,
                    progress: 100.0,
                }),
                Err(e) => StreamMessage::Error(e),
            };
            // fails silently when the consumer is gone
            let _ = tx.send(terminal).await;
        });

        Self {
            inner: ReceiverStream::new(rx),
            cancel,
            finished: false,
        }
    }

    /// Cancel the operation; the stream still yields its terminal error
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream, returning the failure if the operation failed
    pub async fn wait(mut self) -> Result<()> {
        use futures::StreamExt;
        while let Some(message) = self.next().await {
            if let StreamMessage::Error(e) = message {
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Stream for OperationStream {
    type Item = StreamMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(message)) => {
                if message.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(message))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OperationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
