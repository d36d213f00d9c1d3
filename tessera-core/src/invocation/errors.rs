use std::path::PathBuf;
use std::time::Duration;

use derive_builder::UninitializedFieldError;
use thiserror::Error;

use super::MediaKind;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Message shown when an endpoint failure carries nothing the caller can act on.
pub const GENERIC_SERVICE_MESSAGE: &str =
    "An error occurred with the AWS service. Please check your AWS resources and permissions.";

/// Errors raised while building a request, before anything is sent.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error(
        "Invalid prompt. Each prompt must include one of: 'text', 'image', 'document', or 'video'."
    )]
    EmptyFragment,

    #[error("Invalid prompt. A prompt can only include one of 'text', 'image', 'document' or 'video', found: {0}")]
    AmbiguousFragment(String),

    #[error("An invocation request needs at least one prompt fragment")]
    NoFragments,

    #[error("Failed to read {}: {source}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not detect the format of {0}")]
    UndetectableFormat(String),

    #[error("Format `{format}` is not supported for {kind} content")]
    UnsupportedFormat { kind: MediaKind, format: String },

    #[error("{0} cannot be fetched, no content fetcher is configured")]
    NoFetcher(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("The backend cannot send this content: {0}")]
    UnsupportedByBackend(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<UninitializedFieldError> for ConstructionError {
    fn from(value: UninitializedFieldError) -> Self {
        ConstructionError::InvalidRequest(value.to_string())
    }
}

impl From<String> for ConstructionError {
    fn from(value: String) -> Self {
        ConstructionError::InvalidRequest(value)
    }
}

/// Errors from fetching remote content, e.g. an object in s3
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid remote path `{0}`. It should be 's3://bucket_name/key_name'.")]
    InvalidUri(String),

    #[error("The file {0} does not exist in the bucket. Please check the file path.")]
    ObjectNotFound(String),

    #[error("The bucket {0} does not exist. Please check the bucket name in the file path.")]
    ContainerNotFound(String),

    #[error("Failed to fetch remote content: {0}")]
    Other(#[source] BoxedError),
}

impl FetchError {
    pub fn other(err: impl Into<BoxedError>) -> Self {
        FetchError::Other(err.into())
    }
}

/// Errors a [`crate::ModelBackend`] reports to the invoker.
///
/// Only [`BackendError::Throttled`] is retried.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Throttled by the model endpoint: {0}")]
    Throttled(#[source] BoxedError),

    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: BoxedError,
    },

    #[error("{0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn throttled(err: impl Into<BoxedError>) -> Self {
        BackendError::Throttled(err.into())
    }

    /// A service error with a message that is safe to show to a user
    pub fn service(message: impl Into<String>, err: impl Into<BoxedError>) -> Self {
        BackendError::Service {
            message: message.into(),
            source: err.into(),
        }
    }

    /// A service error where the underlying cause is not fit for users
    pub fn generic(err: impl Into<BoxedError>) -> Self {
        Self::service(GENERIC_SERVICE_MESSAGE, err)
    }

    pub fn is_throttling(&self) -> bool {
        matches!(self, BackendError::Throttled(_))
    }
}

/// The error a caller of the invoker receives
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("{message}")]
    Service {
        message: String,
        #[source]
        source: BoxedError,
    },

    /// Throttled after content was already streamed; these are never retried
    #[error("Throttled by the model endpoint while streaming: {0}")]
    Throttled(#[source] BoxedError),

    #[error("Still throttled after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Invocation did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Invocation was cancelled")]
    Cancelled,

    /// The stream already yielded this error; its partial content is discarded
    #[error("Stream ended with an error: {0}")]
    StreamFailed(String),
}

impl From<BackendError> for InvocationError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Throttled(source) => InvocationError::Throttled(source),
            BackendError::Service { message, source } => {
                InvocationError::Service { message, source }
            }
            BackendError::Unsupported(msg) => {
                ConstructionError::UnsupportedByBackend(msg).into()
            }
        }
    }
}

impl InvocationError {
    pub fn is_construction(&self) -> bool {
        matches!(self, InvocationError::Construction(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_to_invocation_errors() {
        let err: InvocationError = BackendError::generic("boom").into();
        assert_eq!(err.to_string(), GENERIC_SERVICE_MESSAGE);

        let err: InvocationError = BackendError::Unsupported("video".into()).into();
        assert!(err.is_construction());

        let err: InvocationError = BackendError::throttled("slow down").into();
        assert!(matches!(err, InvocationError::Throttled(_)));
    }

    #[test]
    fn test_only_throttled_is_throttling() {
        assert!(BackendError::throttled("429").is_throttling());
        assert!(!BackendError::generic("500").is_throttling());
        assert!(!BackendError::Unsupported("video".into()).is_throttling());
    }
}
