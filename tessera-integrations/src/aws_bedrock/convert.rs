//! Mapping between tessera's wire types and the Converse API
use std::time::Duration;

use aws_sdk_bedrockruntime::error::{BuildError, SdkError};
use aws_sdk_bedrockruntime::operation::converse::ConverseOutput;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ConversationRole, ConverseOutput as ConverseOutputType,
    ConverseStreamOutput as ConverseStreamEvent, DocumentBlock, DocumentFormat, DocumentSource,
    ImageBlock, ImageFormat, ImageSource, InferenceConfiguration, Message, PromptRouterTrace,
    SystemContentBlock, TokenUsage, VideoBlock, VideoFormat, VideoSource,
};
use aws_smithy_types::Blob;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tessera_core::{
    BackendError, BackendResponse, EncodedRequest, InferenceConfig, Role, StreamChunk,
    StreamMetadata, WireContent, WireMessage,
};

const THROTTLING_EXCEPTION: &str = "ThrottlingException";

/// A converse call's input, shared by the streaming and non-streaming operations
#[derive(Debug)]
pub(crate) struct ConverseParts {
    pub messages: Vec<Message>,
    pub system: Option<Vec<SystemContentBlock>>,
    pub inference: InferenceConfiguration,
}

impl TryFrom<&EncodedRequest> for ConverseParts {
    type Error = BackendError;

    fn try_from(request: &EncodedRequest) -> Result<Self, Self::Error> {
        let messages = request
            .messages
            .iter()
            .map(message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConverseParts {
            messages,
            system: request
                .system
                .as_ref()
                .map(|system| vec![SystemContentBlock::Text(system.clone())]),
            inference: inference(&request.inference),
        })
    }
}

fn invalid(err: BuildError) -> BackendError {
    BackendError::Unsupported(err.to_string())
}

fn message(message: &WireMessage) -> Result<Message, BackendError> {
    let role = match message.role {
        Role::User => ConversationRole::User,
        Role::Assistant => ConversationRole::Assistant,
    };
    let content = message
        .content
        .iter()
        .map(content_block)
        .collect::<Result<Vec<_>, _>>()?;

    Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(invalid)
}

fn content_block(content: &WireContent) -> Result<ContentBlock, BackendError> {
    let block = match content {
        WireContent::Text(text) => ContentBlock::Text(text.clone()),
        WireContent::Image { format, bytes } => ContentBlock::Image(
            ImageBlock::builder()
                .format(ImageFormat::from(format.as_str()))
                .source(ImageSource::Bytes(Blob::new(bytes.clone())))
                .build()
                .map_err(invalid)?,
        ),
        WireContent::Document {
            format,
            name,
            bytes,
        } => ContentBlock::Document(
            DocumentBlock::builder()
                .format(DocumentFormat::from(format.as_str()))
                .name(name)
                .source(DocumentSource::Bytes(Blob::new(bytes.clone())))
                .build()
                .map_err(invalid)?,
        ),
        WireContent::Video { format, bytes } => ContentBlock::Video(
            VideoBlock::builder()
                .format(VideoFormat::from(format.as_str()))
                .source(VideoSource::Bytes(Blob::new(bytes.clone())))
                .build()
                .map_err(invalid)?,
        ),
    };

    Ok(block)
}

fn inference(config: &InferenceConfig) -> InferenceConfiguration {
    InferenceConfiguration::builder()
        .max_tokens(i32::try_from(config.max_tokens).unwrap_or(i32::MAX))
        .temperature(config.temperature)
        .top_p(config.top_p)
        .build()
}

fn tokens(count: i32) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

fn usage(usage: Option<&TokenUsage>) -> (u64, u64) {
    usage
        .map(|usage| (tokens(usage.input_tokens()), tokens(usage.output_tokens())))
        .unwrap_or_default()
}

fn invoked_model(trace: Option<&PromptRouterTrace>) -> Option<String> {
    trace
        .and_then(PromptRouterTrace::invoked_model_id)
        .map(str::to_string)
}

pub(crate) fn response_from_output(output: &ConverseOutput) -> BackendResponse {
    let text = match output.output() {
        Some(ConverseOutputType::Message(message)) => message
            .content()
            .iter()
            .filter_map(|block| block.as_text().ok())
            .map(String::as_str)
            .collect(),
        _ => String::new(),
    };
    let (input_tokens, output_tokens) = usage(output.usage());

    BackendResponse {
        text,
        input_tokens,
        output_tokens,
        latency: output
            .metrics()
            .map(|metrics| Duration::from_millis(u64::try_from(metrics.latency_ms()).unwrap_or(0))),
        invoked_model_id: invoked_model(output.trace().and_then(|trace| trace.prompt_router())),
        stop_reason: Some(output.stop_reason().as_str().to_string()),
    }
}

/// Maps a stream event to a chunk. Events without a counterpart yield `None`.
pub(crate) fn chunk_from_event(event: &ConverseStreamEvent) -> Option<StreamChunk> {
    match event {
        ConverseStreamEvent::ContentBlockDelta(delta) => match delta.delta() {
            Some(ContentBlockDelta::Text(text)) => Some(StreamChunk::TextDelta(text.clone())),
            _ => None,
        },
        ConverseStreamEvent::ContentBlockStop(_) => Some(StreamChunk::ContentBlockStop),
        ConverseStreamEvent::Metadata(metadata) => {
            let (input_tokens, output_tokens) = usage(metadata.usage());
            Some(StreamChunk::Metadata(StreamMetadata {
                input_tokens,
                output_tokens,
                invoked_model_id: invoked_model(
                    metadata.trace().and_then(|trace| trace.prompt_router()),
                ),
            }))
        }
        _ => None,
    }
}

/// Only `ThrottlingException` is throttling. Other service errors keep the endpoint's code and
/// message, anything else gets the generic message.
pub(crate) fn classify_error<E, R>(err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let (throttled, message) = match &err {
        SdkError::ServiceError(service) => {
            let meta = service.err();
            let message = match (meta.code(), meta.message()) {
                (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                (Some(code), None) => Some(code.to_string()),
                (None, Some(message)) => Some(message.to_string()),
                (None, None) => None,
            };
            (meta.code() == Some(THROTTLING_EXCEPTION), message)
        }
        _ => (false, None),
    };

    if throttled {
        return BackendError::throttled(err);
    }

    let err = match message {
        Some(message) => BackendError::service(message, err),
        None => BackendError::generic(err),
    };
    tracing::error!(error = %err, "Bedrock request failed");
    err
}

#[cfg(test)]
mod tests {
    use aws_sdk_bedrockruntime::operation::converse::ConverseError;
    use aws_sdk_bedrockruntime::types::{
        ContentBlockDeltaEvent, ContentBlockStopEvent, ConverseMetrics, ConverseStreamMetadataEvent,
        ConverseStreamMetrics, ConverseStreamTrace, ConverseTrace, MessageStartEvent, StopReason,
    };
    use pretty_assertions::assert_eq;
    use tessera_core::errors::GENERIC_SERVICE_MESSAGE;

    use super::*;

    fn token_usage(input: i32, output: i32) -> TokenUsage {
        TokenUsage::builder()
            .input_tokens(input)
            .output_tokens(output)
            .total_tokens(input + output)
            .build()
            .unwrap()
    }

    fn router(invoked: &str) -> PromptRouterTrace {
        PromptRouterTrace::builder().invoked_model_id(invoked).build()
    }

    #[test]
    fn test_maps_every_content_kind() {
        let request = EncodedRequest {
            model_id: "model".into(),
            messages: vec![WireMessage::user(vec![
                WireContent::Text("describe".into()),
                WireContent::Image {
                    format: "png".into(),
                    bytes: vec![1, 2, 3],
                },
                WireContent::Document {
                    format: "pdf".into(),
                    name: "report".into(),
                    bytes: vec![4],
                },
                WireContent::Video {
                    format: "three_gp".into(),
                    bytes: vec![5],
                },
            ])],
            system: Some("be brief".into()),
            inference: InferenceConfig::default(),
        };

        let parts = ConverseParts::try_from(&request).unwrap();

        let content = parts.messages[0].content();
        assert_eq!(parts.messages[0].role(), &ConversationRole::User);
        assert_eq!(content[0].as_text().unwrap(), "describe");

        let image = content[1].as_image().unwrap();
        assert_eq!(image.format(), &ImageFormat::Png);

        let document = content[2].as_document().unwrap();
        assert_eq!(document.format(), &DocumentFormat::Pdf);
        assert_eq!(document.name(), "report");

        let video = content[3].as_video().unwrap();
        assert_eq!(video.format(), &VideoFormat::ThreeGp);

        assert_eq!(
            parts.system,
            Some(vec![SystemContentBlock::Text("be brief".into())])
        );
        assert_eq!(parts.inference.max_tokens(), Some(512));
        assert_eq!(parts.inference.temperature(), Some(0.6));
        assert_eq!(parts.inference.top_p(), Some(0.5));
    }

    #[test]
    fn test_response_concatenates_text_blocks() {
        let message = Message::builder()
            .role(ConversationRole::Assistant)
            .content(ContentBlock::Text("Hello, ".into()))
            .content(ContentBlock::Text("world".into()))
            .build()
            .unwrap();
        let output = ConverseOutput::builder()
            .output(ConverseOutputType::Message(message))
            .stop_reason(StopReason::EndTurn)
            .usage(token_usage(10, 2))
            .metrics(ConverseMetrics::builder().latency_ms(250).build().unwrap())
            .trace(
                ConverseTrace::builder()
                    .prompt_router(router("anthropic.claude-3-haiku-20240307-v1:0"))
                    .build(),
            )
            .build()
            .unwrap();

        let response = response_from_output(&output);

        assert_eq!(
            response,
            BackendResponse {
                text: "Hello, world".into(),
                input_tokens: 10,
                output_tokens: 2,
                latency: Some(Duration::from_millis(250)),
                invoked_model_id: Some("anthropic.claude-3-haiku-20240307-v1:0".into()),
                stop_reason: Some("end_turn".into()),
            }
        );
    }

    #[test]
    fn test_stream_events_map_to_chunks() {
        let delta = ConverseStreamEvent::ContentBlockDelta(
            ContentBlockDeltaEvent::builder()
                .content_block_index(0)
                .delta(ContentBlockDelta::Text("Hel".into()))
                .build()
                .unwrap(),
        );
        let stop = ConverseStreamEvent::ContentBlockStop(
            ContentBlockStopEvent::builder()
                .content_block_index(0)
                .build()
                .unwrap(),
        );
        let metadata = ConverseStreamEvent::Metadata(
            ConverseStreamMetadataEvent::builder()
                .usage(token_usage(7, 3))
                .metrics(ConverseStreamMetrics::builder().latency_ms(90).build().unwrap())
                .trace(
                    ConverseStreamTrace::builder()
                        .prompt_router(router("meta.llama3-1-8b-instruct-v1:0"))
                        .build(),
                )
                .build(),
        );
        let start = ConverseStreamEvent::MessageStart(
            MessageStartEvent::builder()
                .role(ConversationRole::Assistant)
                .build()
                .unwrap(),
        );

        assert_eq!(chunk_from_event(&delta), Some(StreamChunk::text("Hel")));
        assert_eq!(chunk_from_event(&stop), Some(StreamChunk::ContentBlockStop));
        assert_eq!(
            chunk_from_event(&metadata),
            Some(StreamChunk::Metadata(StreamMetadata {
                input_tokens: 7,
                output_tokens: 3,
                invoked_model_id: Some("meta.llama3-1-8b-instruct-v1:0".into()),
            }))
        );
        assert_eq!(chunk_from_event(&start), None);
    }

    #[test]
    fn test_construction_failures_are_generic() {
        let err: SdkError<ConverseError, ()> = SdkError::construction_failure("no region");
        let classified = classify_error(err);

        assert!(!classified.is_throttling());
        assert_eq!(classified.to_string(), GENERIC_SERVICE_MESSAGE);
    }
}
