use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::ConstructionError;

/// One piece of a prompt. A request is an ordered list of these.
#[derive(Clone, Debug, PartialEq, Eq, strum_macros::EnumIs)]
pub enum PromptFragment {
    Text(String),
    Media(MediaFragment),
}

impl PromptFragment {
    pub fn text(text: impl Into<String>) -> Self {
        PromptFragment::Text(text.into())
    }

    pub fn image(source: impl Into<ContentSource>) -> Self {
        PromptFragment::Media(MediaFragment::new(MediaKind::Image, source))
    }

    pub fn document(source: impl Into<ContentSource>) -> Self {
        PromptFragment::Media(MediaFragment::new(MediaKind::Document, source))
    }

    pub fn video(source: impl Into<ContentSource>) -> Self {
        PromptFragment::Media(MediaFragment::new(MediaKind::Video, source))
    }

    /// Sets the name of a media fragment. Does nothing for text.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if let PromptFragment::Media(media) = &mut self {
            media.name = Some(name.into());
        }
        self
    }

    /// Sets an explicit format tag on a media fragment, skipping detection. Does nothing for text.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        if let PromptFragment::Media(media) = &mut self {
            media.format = Some(format.into());
        }
        self
    }
}

impl From<&str> for PromptFragment {
    fn from(value: &str) -> Self {
        PromptFragment::text(value)
    }
}

impl From<String> for PromptFragment {
    fn from(value: String) -> Self {
        PromptFragment::Text(value)
    }
}

impl From<MediaFragment> for PromptFragment {
    fn from(value: MediaFragment) -> Self {
        PromptFragment::Media(value)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
    Video,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFragment {
    pub kind: MediaKind,
    pub source: ContentSource,
    /// Only used for documents; the endpoint wants every document named
    pub name: Option<String>,
    /// Explicit format tag; detected from the content when absent
    pub format: Option<String>,
}

impl MediaFragment {
    pub fn new(kind: MediaKind, source: impl Into<ContentSource>) -> Self {
        Self {
            kind,
            source: source.into(),
            name: None,
            format: None,
        }
    }
}

/// Where the bytes of a media fragment come from
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ContentSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    /// A remote uri, fetched through a `ContentFetcher`
    Remote(String),
}

impl ContentSource {
    /// Human readable description used in errors and logs
    pub fn describe(&self) -> String {
        match self {
            ContentSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            ContentSource::Path(path) => path.display().to_string(),
            ContentSource::Remote(uri) => uri.clone(),
        }
    }
}

impl std::fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ContentSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ContentSource::Remote(uri) => f.debug_tuple("Remote").field(uri).finish(),
        }
    }
}

impl From<String> for ContentSource {
    fn from(value: String) -> Self {
        if value.starts_with("s3://") {
            ContentSource::Remote(value)
        } else {
            ContentSource::Path(PathBuf::from(value))
        }
    }
}

impl From<&str> for ContentSource {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl From<PathBuf> for ContentSource {
    fn from(value: PathBuf) -> Self {
        ContentSource::Path(value)
    }
}

impl From<&std::path::Path> for ContentSource {
    fn from(value: &std::path::Path) -> Self {
        ContentSource::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for ContentSource {
    fn from(value: Vec<u8>) -> Self {
        ContentSource::Bytes(value)
    }
}

impl From<&[u8]> for ContentSource {
    fn from(value: &[u8]) -> Self {
        ContentSource::Bytes(value.to_vec())
    }
}

/// Loosely typed fragment, as found in json payloads: `{"text": "..."}`, `{"image": "path"}`,
/// `{"document": "s3://bucket/key", "name": "report"}` and so on.
///
/// Convert with `PromptFragment::try_from`; exactly one payload key must be set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawFragment {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<ContentSource>,
    #[serde(default)]
    pub document: Option<ContentSource>,
    #[serde(default)]
    pub video: Option<ContentSource>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl TryFrom<RawFragment> for PromptFragment {
    type Error = ConstructionError;

    fn try_from(raw: RawFragment) -> Result<Self, Self::Error> {
        let present = [
            ("text", raw.text.is_some()),
            ("image", raw.image.is_some()),
            ("document", raw.document.is_some()),
            ("video", raw.video.is_some()),
        ]
        .into_iter()
        .filter_map(|(key, set)| set.then_some(key))
        .collect::<Vec<_>>();

        if present.is_empty() {
            return Err(ConstructionError::EmptyFragment);
        }
        if present.len() > 1 {
            return Err(ConstructionError::AmbiguousFragment(present.join(", ")));
        }

        let RawFragment {
            text,
            image,
            document,
            video,
            name,
            format,
        } = raw;

        if let Some(text) = text {
            return Ok(PromptFragment::Text(text));
        }

        let (kind, source) = match (image, document, video) {
            (Some(source), _, _) => (MediaKind::Image, source),
            (_, Some(source), _) => (MediaKind::Document, source),
            (_, _, Some(source)) => (MediaKind::Video, source),
            _ => return Err(ConstructionError::EmptyFragment),
        };

        Ok(PromptFragment::Media(MediaFragment {
            kind,
            source,
            name,
            format,
        }))
    }
}
