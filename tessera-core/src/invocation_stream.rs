//! The stream returned by `ModelInvoker::invoke_streaming`
use std::future::Future as _;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt as _, stream};
use tokio::time::Sleep;

use crate::accumulator::StreamAccumulator;
use crate::invocation::{
    BackendStream, InvocationResult, StreamChunk, errors::InvocationError,
};
use crate::observability::ObservabilityRecorder;

/// A single pass stream of response chunks.
///
/// Every chunk that passes through is also accumulated; `into_result` drains what is left and
/// returns the same result shape as `ModelInvoker::invoke`. The stream ends after the first
/// error, or with `InvocationError::DeadlineExceeded` when the invoker's deadline passes.
#[pin_project::pin_project]
pub struct InvocationStream {
    #[pin]
    inner: BackendStream,
    accumulator: Option<StreamAccumulator>,
    /// Returned as-is by `into_result`, e.g. when opening the stream exhausted its retries
    settled: Option<InvocationResult>,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
    recorder: Option<Arc<ObservabilityRecorder>>,
    label: String,
    done: bool,
    /// The error the stream ended with, if any
    failure: Option<String>,
}

impl std::fmt::Debug for InvocationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationStream")
            .field("label", &self.label)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl InvocationStream {
    pub(crate) fn new(
        inner: BackendStream,
        accumulator: StreamAccumulator,
        label: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            accumulator: Some(accumulator),
            settled: None,
            deadline: None,
            recorder: None,
            label: label.into(),
            done: false,
            failure: None,
        }
    }

    /// A stream without chunks that resolves to `result`
    pub(crate) fn settled(result: InvocationResult, label: impl Into<String>) -> Self {
        Self {
            inner: stream::empty().boxed(),
            accumulator: None,
            settled: Some(result),
            deadline: None,
            recorder: None,
            label: label.into(),
            done: true,
            failure: None,
        }
    }

    pub(crate) fn with_deadline(mut self, sleep: Pin<Box<Sleep>>, deadline: Duration) -> Self {
        self.deadline = Some((sleep, deadline));
        self
    }

    pub(crate) fn with_recorder(mut self, recorder: Option<Arc<ObservabilityRecorder>>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Function name this stream is recorded under
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Drains the stream and folds it into a result, which is handed to the recorder.
    ///
    /// A stream that failed is neither folded nor recorded.
    ///
    /// # Errors
    ///
    /// Errors with the first error the stream yields, or with `InvocationError::StreamFailed` if
    /// that error was already yielded before this call
    pub async fn into_result(mut self) -> Result<InvocationResult, InvocationError> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }

        if let Some(failure) = self.failure.take() {
            return Err(InvocationError::StreamFailed(failure));
        }

        let result = match (self.settled, self.accumulator) {
            (Some(result), _) => result,
            (None, Some(accumulator)) => accumulator.finish(),
            (None, None) => InvocationResult::default(),
        };

        if let Some(recorder) = &self.recorder {
            recorder
                .record(&self.label, &result.model_id, &result)
                .await;
        }

        Ok(result)
    }
}

impl Stream for InvocationStream {
    type Item = Result<StreamChunk, InvocationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        if let Some((sleep, deadline)) = this.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                let err = InvocationError::DeadlineExceeded(*deadline);
                *this.done = true;
                *this.failure = Some(err.to_string());
                return Poll::Ready(Some(Err(err)));
            }
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(accumulator) = this.accumulator.as_mut() {
                    accumulator.push(&chunk);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                let err = InvocationError::from(err);
                *this.done = true;
                *this.failure = Some(err.to_string());
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
