use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use super::{
    EncodedRequest, StreamChunk,
    errors::{BackendError, FetchError},
};

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, BackendError>> + Send>>;

/// A complete, non-streamed response from a model endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendResponse {
    /// All text blocks of the response, concatenated in order
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Latency as reported by the endpoint, if it reports one
    pub latency: Option<Duration>,
    /// The model a prompt router actually dispatched to, if any
    pub invoked_model_id: Option<String>,
    pub stop_reason: Option<String>,
}

/// A model-serving endpoint. One implementation per provider.
///
/// Implementations must report rate limiting as `BackendError::Throttled` and nothing else;
/// the invoker retries those and only those.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ModelBackend: Send + Sync + std::fmt::Debug {
    async fn converse(&self, request: &EncodedRequest) -> Result<BackendResponse, BackendError>;

    /// Opens a response stream. Errors returned here (as opposed to inside the stream) happen
    /// before any content was delivered.
    async fn converse_stream(&self, request: &EncodedRequest)
    -> Result<BackendStream, BackendError>;

    /// Provider label reported in results, e.g. `Bedrock:us-east-1`
    fn provider(&self) -> String;
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Arc<T> {
    async fn converse(&self, request: &EncodedRequest) -> Result<BackendResponse, BackendError> {
        (**self).converse(request).await
    }

    async fn converse_stream(
        &self,
        request: &EncodedRequest,
    ) -> Result<BackendStream, BackendError> {
        (**self).converse_stream(request).await
    }

    fn provider(&self) -> String {
        (**self).provider()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    /// Content type as reported by the store, used as a format hint
    pub content_type: Option<String>,
}

/// Fetches remote content referenced by a prompt fragment
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, uri: &str) -> Result<FetchedContent, FetchError>;
}
