//! Request and response bodies of the Messages API
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tessera_core::{BackendError, BackendResponse, EncodedRequest, Role, WireContent};

const TEXT_DOCUMENTS: [&str; 4] = ["txt", "md", "csv", "html"];

#[derive(Serialize, Debug)]
pub(super) struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize, Debug)]
struct Message {
    role: Role,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Source,
    },
    Document {
        source: Source,
        title: String,
    },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Source {
    Base64 { media_type: String, data: String },
    Text { media_type: String, data: String },
}

impl<'a> MessagesRequest<'a> {
    pub(super) fn new(request: &'a EncodedRequest, stream: bool) -> Result<Self, BackendError> {
        let messages = request
            .messages
            .iter()
            .map(|message| {
                Ok(Message {
                    role: message.role,
                    content: message
                        .content
                        .iter()
                        .map(content_block)
                        .collect::<Result<_, BackendError>>()?,
                })
            })
            .collect::<Result<_, BackendError>>()?;

        Ok(Self {
            model: &request.model_id,
            max_tokens: request.inference.max_tokens,
            temperature: request.inference.temperature,
            top_p: request.inference.top_p,
            system: request.system.as_deref(),
            messages,
            stream,
        })
    }
}

fn content_block(content: &WireContent) -> Result<ContentBlock, BackendError> {
    match content {
        WireContent::Text(text) => Ok(ContentBlock::Text { text: text.clone() }),
        WireContent::Image { format, bytes } => Ok(ContentBlock::Image {
            source: Source::Base64 {
                media_type: format!("image/{format}"),
                data: STANDARD.encode(bytes),
            },
        }),
        WireContent::Document {
            format,
            name,
            bytes,
        } if format == "pdf" => Ok(ContentBlock::Document {
            source: Source::Base64 {
                media_type: "application/pdf".to_string(),
                data: STANDARD.encode(bytes),
            },
            title: name.clone(),
        }),
        WireContent::Document {
            format,
            name,
            bytes,
        } if TEXT_DOCUMENTS.contains(&format.as_str()) => {
            let data = String::from_utf8(bytes.clone()).map_err(|_| {
                BackendError::Unsupported(format!("Document {name} is not valid UTF-8 text"))
            })?;
            Ok(ContentBlock::Document {
                source: Source::Text {
                    media_type: "text/plain".to_string(),
                    data,
                },
                title: name.clone(),
            })
        }
        WireContent::Document { format, .. } => Err(BackendError::Unsupported(format!(
            "Anthropic does not accept {format} documents"
        ))),
        WireContent::Video { .. } => Err(BackendError::Unsupported(
            "Anthropic does not accept video content".to_string(),
        )),
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub(super) struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
pub(super) struct MessagesResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

impl From<MessagesResponse> for BackendResponse {
    fn from(response: MessagesResponse) -> Self {
        let text = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect();

        BackendResponse {
            text,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            stop_reason: response.stop_reason,
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub(super) struct ApiError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: ApiError,
}

impl ApiError {
    pub(super) fn is_rate_limit(&self) -> bool {
        self.kind == "rate_limit_error"
    }

    pub(super) fn into_backend_error(self, status: Option<StatusCode>) -> BackendError {
        let message = format!("{}: {}", self.kind, self.message);
        if self.is_rate_limit() || status == Some(StatusCode::TOO_MANY_REQUESTS) {
            BackendError::throttled(message)
        } else {
            tracing::error!(error = %message, "Anthropic request failed");
            BackendError::service(message.clone(), message)
        }
    }
}

/// Maps a failed response to a backend error
pub(super) fn status_error(status: StatusCode, body: &str) -> BackendError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) => response.error.into_backend_error(Some(status)),
        Err(_) if status == StatusCode::TOO_MANY_REQUESTS => {
            BackendError::throttled(format!("{status}: {body}"))
        }
        Err(_) => {
            tracing::error!(%status, body, "Anthropic request failed");
            BackendError::generic(format!("{status}: {body}"))
        }
    }
}
