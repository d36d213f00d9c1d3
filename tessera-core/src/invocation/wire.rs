use serde::{Deserialize, Serialize};

use super::InferenceConfig;

/// A fragment in the shape the model endpoint expects
#[derive(Clone, PartialEq, Eq)]
pub enum WireContent {
    Text(String),
    Image {
        format: String,
        bytes: Vec<u8>,
    },
    Document {
        format: String,
        name: String,
        bytes: Vec<u8>,
    },
    Video {
        format: String,
        bytes: Vec<u8>,
    },
}

impl WireContent {
    pub fn format(&self) -> Option<&str> {
        match self {
            WireContent::Text(_) => None,
            WireContent::Image { format, .. }
            | WireContent::Document { format, .. }
            | WireContent::Video { format, .. } => Some(format),
        }
    }
}

impl std::fmt::Debug for WireContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireContent::Text(text) => f
                .debug_tuple("Text")
                .field(&crate::util::debug_long_utf8(text, 100))
                .finish(),
            WireContent::Image { format, bytes } => f
                .debug_struct("Image")
                .field("format", format)
                .field("bytes", &bytes.len())
                .finish(),
            WireContent::Document {
                format,
                name,
                bytes,
            } => f
                .debug_struct("Document")
                .field("format", format)
                .field("name", name)
                .field("bytes", &bytes.len())
                .finish(),
            WireContent::Video { format, bytes } => f
                .debug_struct("Video")
                .field("format", format)
                .field("bytes", &bytes.len())
                .finish(),
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    pub role: Role,
    pub content: Vec<WireContent>,
}

impl WireMessage {
    pub fn user(content: Vec<WireContent>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

/// Everything a backend needs to make one call
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedRequest {
    pub model_id: String,
    pub messages: Vec<WireMessage>,
    pub system: Option<String>,
    pub inference: InferenceConfig,
}
