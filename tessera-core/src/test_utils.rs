#![allow(clippy::missing_panics_doc)]
//! Test helpers for code built on the invoker
//!
//! `ScriptedBackend` replays a queue of scripted outcomes, in order, and records every request it
//! receives. It panics when dropped with outcomes left over. For finer grained expectations use
//! the generated `MockModelBackend` and `MockContentFetcher`.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{StreamExt as _, stream};

use crate::invocation::{
    BackendResponse, BackendStream, EncodedRequest, ModelBackend, StreamChunk,
    errors::BackendError,
};

pub use crate::invocation::{MockContentFetcher, MockModelBackend};

#[derive(Debug)]
enum Scripted {
    Converse(Result<BackendResponse, BackendError>),
    Stream(Result<Vec<Result<StreamChunk, BackendError>>, BackendError>),
}

impl Scripted {
    fn describe(&self) -> String {
        match self {
            Scripted::Converse(Ok(response)) => format!("converse => {:?}", response.text),
            Scripted::Converse(Err(err)) => format!("converse => error: {err}"),
            Scripted::Stream(Ok(chunks)) => format!("converse_stream => {} chunks", chunks.len()),
            Scripted::Stream(Err(err)) => format!("converse_stream => error: {err}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScriptedBackend {
    provider: String,
    expectations: Arc<Mutex<VecDeque<Scripted>>>,
    received: Arc<Mutex<Vec<EncodedRequest>>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new("scripted")
    }
}

impl ScriptedBackend {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next call must be `converse`, answered with `response`
    pub fn expect_converse(&self, response: Result<BackendResponse, BackendError>) {
        self.expectations
            .lock()
            .unwrap()
            .push_back(Scripted::Converse(response));
    }

    /// The next call must be `converse_stream`. `Err` fails opening the stream, errors inside the
    /// chunks are yielded mid-stream.
    pub fn expect_stream(
        &self,
        stream: Result<Vec<Result<StreamChunk, BackendError>>, BackendError>,
    ) {
        self.expectations
            .lock()
            .unwrap()
            .push_back(Scripted::Stream(stream));
    }

    pub fn expect_stream_chunks(&self, chunks: Vec<StreamChunk>) {
        self.expect_stream(Ok(chunks.into_iter().map(Ok).collect()));
    }

    /// Every request received so far, in order
    pub fn received(&self) -> Vec<EncodedRequest> {
        self.received.lock().unwrap().clone()
    }

    fn next(&self, request: &EncodedRequest, method: &str) -> Scripted {
        self.received.lock().unwrap().push(request.clone());
        self.expectations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                panic!(
                    "[ScriptedBackend] Received {method} for {}, but no expectations are set",
                    request.model_id
                )
            })
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn converse(&self, request: &EncodedRequest) -> Result<BackendResponse, BackendError> {
        match self.next(request, "converse") {
            Scripted::Converse(response) => response,
            other => panic!(
                "[ScriptedBackend] Received converse, expected {}",
                other.describe()
            ),
        }
    }

    async fn converse_stream(
        &self,
        request: &EncodedRequest,
    ) -> Result<BackendStream, BackendError> {
        match self.next(request, "converse_stream") {
            Scripted::Stream(chunks) => chunks.map(|chunks| stream::iter(chunks).boxed()),
            other => panic!(
                "[ScriptedBackend] Received converse_stream, expected {}",
                other.describe()
            ),
        }
    }

    fn provider(&self) -> String {
        self.provider.clone()
    }
}

impl Drop for ScriptedBackend {
    fn drop(&mut self) {
        // We are still cloned, so do not check assertions yet
        if Arc::strong_count(&self.expectations) > 1 {
            return;
        }
        let Ok(expectations) = self.expectations.lock() else {
            return;
        };

        if expectations.is_empty() {
            let num_received = self.received.lock().map(|r| r.len()).unwrap_or_default();
            tracing::debug!("[ScriptedBackend] All {num_received} expectations were met");
        } else if !std::thread::panicking() {
            let pending = expectations
                .iter()
                .map(Scripted::describe)
                .collect::<Vec<_>>()
                .join("\n");

            panic!("[ScriptedBackend] Not all expectations were met\n pending:\n{pending}");
        }
    }
}

/// A throttling error as a backend would report it
pub fn throttled() -> BackendError {
    BackendError::throttled(std::io::Error::other(
        "ThrottlingException: Too many requests, please wait before trying again.",
    ))
}

/// A response with the given text and usage
pub fn response(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> BackendResponse {
    BackendResponse {
        text: text.into(),
        input_tokens,
        output_tokens,
        stop_reason: Some("end_turn".into()),
        ..Default::default()
    }
}

/// A backend stream yielding `chunks`
pub fn chunk_stream(chunks: Vec<StreamChunk>) -> BackendStream {
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}
