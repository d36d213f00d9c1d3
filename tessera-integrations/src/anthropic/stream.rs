//! Server-sent events of a streamed Messages API response
use futures_util::{StreamExt as _, stream};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use tessera_core::{BackendError, BackendStream, StreamChunk, StreamMetadata};

use super::messages::{ApiError, Usage, status_error};

#[derive(Deserialize, Debug)]
pub(super) struct MessageStart {
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Default)]
pub(super) struct DeltaUsage {
    output_tokens: Option<u64>,
    input_tokens: Option<u64>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    ContentBlockStop,
    MessageDelta {
        #[serde(default)]
        usage: DeltaUsage,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Ignored,
}

/// Usage arrives in pieces: input tokens with `message_start`, output tokens with every
/// `message_delta`. It is surfaced once, when the message stops.
#[derive(Debug, Default)]
pub(super) struct UsageTracker {
    usage: Usage,
}

impl UsageTracker {
    /// Folds an event into the tracker and returns the chunk it produces, if any
    pub(super) fn apply(&mut self, event: StreamEvent) -> Option<Result<StreamChunk, BackendError>> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                None
            }
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => Some(Ok(StreamChunk::TextDelta(text))),
            StreamEvent::ContentBlockStop => Some(Ok(StreamChunk::ContentBlockStop)),
            StreamEvent::MessageDelta { usage } => {
                if let Some(output_tokens) = usage.output_tokens {
                    self.usage.output_tokens = output_tokens;
                }
                if let Some(input_tokens) = usage.input_tokens {
                    self.usage.input_tokens = input_tokens;
                }
                None
            }
            StreamEvent::MessageStop => Some(Ok(StreamChunk::Metadata(StreamMetadata {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
                invoked_model_id: None,
            }))),
            StreamEvent::Error { error } => Some(Err(error.into_backend_error(None))),
            StreamEvent::ContentBlockDelta { .. } | StreamEvent::Ignored => None,
        }
    }
}

/// Converts a failure of the event source into a backend error, reading the body of a failed
/// response
pub(super) async fn source_error(err: reqwest_eventsource::Error) -> BackendError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            status_error(status, &body)
        }
        err => {
            tracing::error!(error = %err, "Anthropic event stream failed");
            BackendError::generic(err.to_string())
        }
    }
}

/// Turns an opened event source into chunks. The source is closed after `message_stop` or the
/// first error.
pub(super) fn into_chunks(source: EventSource) -> BackendStream {
    stream::unfold(
        Some((source, UsageTracker::default())),
        |state| async move {
            let (mut source, mut tracker) = state?;
            loop {
                match source.next().await {
                    None | Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        source.close();
                        return None;
                    }
                    Some(Ok(Event::Open)) => {}
                    Some(Ok(Event::Message(message))) => {
                        let event = match serde_json::from_str::<StreamEvent>(&message.data) {
                            Ok(event) => event,
                            Err(err) => {
                                source.close();
                                let err = BackendError::generic(format!(
                                    "Failed to parse event {}: {err}",
                                    message.event
                                ));
                                return Some((Err(err), None));
                            }
                        };
                        let stop = matches!(event, StreamEvent::MessageStop);

                        match tracker.apply(event) {
                            Some(Ok(chunk)) if stop => {
                                source.close();
                                return Some((Ok(chunk), None));
                            }
                            Some(Ok(chunk)) => return Some((Ok(chunk), Some((source, tracker)))),
                            Some(Err(err)) => {
                                source.close();
                                return Some((Err(err), None));
                            }
                            None => {}
                        }
                    }
                    Some(Err(err)) => {
                        source.close();
                        return Some((Err(source_error(err).await), None));
                    }
                }
            }
        },
    )
    .boxed()
}
