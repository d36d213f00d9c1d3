//! Turns prompt fragments into wire content
//!
//! Media is read fully into memory. Local paths are read from disk, remote uris go through the
//! configured `ContentFetcher` and raw bytes are used as-is. The format tag is taken from the
//! caller when given, otherwise detected from the bytes, the file extension or the content type
//! reported by the store, in that order.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::invocation::{
    ContentFetcher, ContentSource, EncodedRequest, InvocationRequest, MediaFragment, MediaKind,
    PromptFragment, WireContent, WireMessage, errors::ConstructionError,
};

const IMAGE_FORMATS: &[&str] = &["png", "jpeg", "gif", "webp"];
const DOCUMENT_FORMATS: &[&str] = &[
    "pdf", "csv", "doc", "docx", "xls", "xlsx", "html", "txt", "md",
];
const VIDEO_FORMATS: &[&str] = &[
    "mkv", "mov", "mp4", "webm", "flv", "mpeg", "mpg", "wmv", "three_gp",
];

const DEFAULT_DOCUMENT_NAME: &str = "document";

/// `document`, then `document-2`, `document-3` and so on, skipping anything taken
fn free_document_name(taken: &HashSet<String>) -> String {
    if !taken.contains(DEFAULT_DOCUMENT_NAME) {
        return DEFAULT_DOCUMENT_NAME.to_string();
    }

    (2..)
        .map(|n| format!("{DEFAULT_DOCUMENT_NAME}-{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string())
}

/// Stores often report this for anything they know nothing about
const OPAQUE_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// Normalizes a format tag or MIME type to the short tag the endpoint expects
///
/// ```
/// # use tessera_core::encoding::normalize_format;
/// assert_eq!(normalize_format("text/plain"), "txt");
/// assert_eq!(normalize_format("image/JPG"), "jpeg");
/// assert_eq!(normalize_format("txt"), "txt");
/// ```
pub fn normalize_format(format: &str) -> String {
    let format = format.trim().to_lowercase();
    let format = format.split(';').next().unwrap_or_default().trim();
    let subtype = format.rsplit('/').next().unwrap_or(format);

    match subtype {
        "plain" => "txt",
        "jpg" => "jpeg",
        "htm" => "html",
        "markdown" | "x-markdown" => "md",
        "msword" => "doc",
        "vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "vnd.ms-excel" => "xls",
        "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "quicktime" => "mov",
        "x-matroska" => "mkv",
        "x-flv" => "flv",
        "x-ms-wmv" => "wmv",
        "3gpp" | "3gp" => "three_gp",
        other => other,
    }
    .to_string()
}

pub fn supported_formats(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Image => IMAGE_FORMATS,
        MediaKind::Document => DOCUMENT_FORMATS,
        MediaKind::Video => VIDEO_FORMATS,
    }
}

/// Detects the format of some content.
///
/// `location` is a file path or remote uri used for extension based detection, `content_type`
/// a hint from the store the bytes came from.
pub fn detect_format(
    bytes: &[u8],
    location: Option<&str>,
    content_type: Option<&str>,
) -> Option<String> {
    if let Some(kind) = infer::get(bytes) {
        return Some(normalize_format(kind.mime_type()));
    }

    if let Some(mime) = location.and_then(|location| mime_guess::from_path(location).first_raw()) {
        return Some(normalize_format(mime));
    }

    if let Some(content_type) = content_type
        .map(str::trim)
        .filter(|content_type| !content_type.is_empty())
        .filter(|content_type| !OPAQUE_CONTENT_TYPES.contains(content_type))
    {
        return Some(normalize_format(content_type));
    }

    std::str::from_utf8(bytes).is_ok().then(|| "txt".to_string())
}

/// Encodes prompt fragments into wire content
#[derive(Clone, Debug, Default)]
pub struct ContentEncoder {
    fetcher: Option<Arc<dyn ContentFetcher>>,
}

impl ContentEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote sources are fetched with `fetcher`; without one they are a construction error
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl ContentFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    #[must_use]
    pub fn with_shared_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Encodes a whole request into a single user message.
    ///
    /// Nothing is returned unless every fragment encodes.
    ///
    /// # Errors
    ///
    /// Errors if any fragment cannot be read, fetched or has an unsupported format
    #[tracing::instrument(skip_all, err)]
    pub async fn encode(
        &self,
        request: &InvocationRequest,
        default_model_id: &str,
    ) -> Result<EncodedRequest, ConstructionError> {
        if request.fragments().is_empty() {
            return Err(ConstructionError::NoFragments);
        }

        let mut content = Vec::with_capacity(request.fragments().len());
        // Caller names are kept as given, generated names go around them
        let mut document_names = request
            .fragments()
            .iter()
            .filter_map(|fragment| match fragment {
                PromptFragment::Media(MediaFragment {
                    kind: MediaKind::Document,
                    name: Some(name),
                    ..
                }) => Some(name.clone()),
                _ => None,
            })
            .collect::<HashSet<_>>();

        for fragment in request.fragments() {
            let mut encoded = self.encode_fragment(fragment).await?;

            if let (
                WireContent::Document { name, .. },
                PromptFragment::Media(MediaFragment { name: None, .. }),
            ) = (&mut encoded, fragment)
            {
                *name = free_document_name(&document_names);
                document_names.insert(name.clone());
            }

            content.push(encoded);
        }

        let model_id = request.model_id().unwrap_or(default_model_id).to_string();
        tracing::debug!(model_id, fragments = content.len(), "Encoded request");

        Ok(EncodedRequest {
            model_id,
            messages: vec![WireMessage::user(content)],
            system: request.system().map(str::to_string),
            inference: *request.inference(),
        })
    }

    /// Encodes a single fragment
    ///
    /// # Errors
    ///
    /// Errors if the content cannot be read or fetched, or its format is undetectable or not
    /// supported for its kind
    pub async fn encode_fragment(
        &self,
        fragment: &PromptFragment,
    ) -> Result<WireContent, ConstructionError> {
        match fragment {
            PromptFragment::Text(text) => Ok(WireContent::Text(text.clone())),
            PromptFragment::Media(media) => self.encode_media(media).await,
        }
    }

    async fn encode_media(&self, media: &MediaFragment) -> Result<WireContent, ConstructionError> {
        let (bytes, content_type) = self.read_source(&media.source).await?;

        let format = match &media.format {
            Some(explicit) => normalize_format(explicit),
            None => {
                let location = match &media.source {
                    ContentSource::Path(path) => path.to_str(),
                    ContentSource::Remote(uri) => Some(uri.as_str()),
                    ContentSource::Bytes(_) => None,
                };
                detect_format(&bytes, location, content_type.as_deref()).ok_or_else(|| {
                    ConstructionError::UndetectableFormat(media.source.describe())
                })?
            }
        };

        if !supported_formats(media.kind).contains(&format.as_str()) {
            return Err(ConstructionError::UnsupportedFormat {
                kind: media.kind,
                format,
            });
        }

        Ok(match media.kind {
            MediaKind::Image => WireContent::Image { format, bytes },
            MediaKind::Video => WireContent::Video { format, bytes },
            MediaKind::Document => WireContent::Document {
                format,
                name: media
                    .name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string()),
                bytes,
            },
        })
    }

    async fn read_source(
        &self,
        source: &ContentSource,
    ) -> Result<(Vec<u8>, Option<String>), ConstructionError> {
        match source {
            ContentSource::Bytes(bytes) => Ok((bytes.clone(), None)),
            ContentSource::Path(path) => read_local(path).await.map(|bytes| (bytes, None)),
            ContentSource::Remote(uri) => {
                let fetcher = self
                    .fetcher
                    .as_ref()
                    .ok_or_else(|| ConstructionError::NoFetcher(uri.clone()))?;
                let fetched = fetcher.fetch(uri).await?;
                Ok((fetched.bytes, fetched.content_type))
            }
        }
    }
}

async fn read_local(path: &Path) -> Result<Vec<u8>, ConstructionError> {
    fs_err::tokio::read(path)
        .await
        .map_err(|source| ConstructionError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{FetchedContent, MockContentFetcher, errors::FetchError};
    use pretty_assertions::assert_eq;
    use temp_dir::TempDir;
    use test_case::test_case;

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];
    const PDF: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";

    fn request(fragments: Vec<PromptFragment>) -> InvocationRequest {
        InvocationRequest::builder()
            .fragments(fragments)
            .build()
            .unwrap()
    }

    #[test_case("text/plain", "txt" ; "plain is txt")]
    #[test_case("TXT", "txt" ; "already normalized")]
    #[test_case("image/jpg", "jpeg" ; "jpg")]
    #[test_case("image/png", "png" ; "png")]
    #[test_case("text/csv; charset=utf-8", "csv" ; "mime parameters")]
    #[test_case("application/vnd.openxmlformats-officedocument.wordprocessingml.document", "docx" ; "docx")]
    #[test_case("application/vnd.ms-excel", "xls" ; "xls")]
    #[test_case("text/markdown", "md" ; "markdown")]
    #[test_case("video/quicktime", "mov" ; "quicktime")]
    #[test_case("video/3gpp", "three_gp" ; "three gp")]
    fn test_normalize_format(input: &str, expected: &str) {
        assert_eq!(normalize_format(input), expected);
        // Normalizing is idempotent
        assert_eq!(normalize_format(&normalize_format(input)), expected);
    }

    #[test]
    fn test_detect_format_order() {
        // Magic numbers win over the extension
        assert_eq!(detect_format(PNG, Some("cat.gif"), None).as_deref(), Some("png"));
        // Extension wins over the store's content type
        assert_eq!(
            detect_format(b"a,b\n1,2\n", Some("s3://bucket/data.csv"), Some("text/plain"))
                .as_deref(),
            Some("csv")
        );
        // Content type when nothing else is known
        assert_eq!(
            detect_format(b"# Title", Some("s3://bucket/README"), Some("text/markdown"))
                .as_deref(),
            Some("md")
        );
        // Opaque content types are ignored, utf8 falls back to txt
        assert_eq!(
            detect_format(b"hello", None, Some("binary/octet-stream")).as_deref(),
            Some("txt")
        );
        assert_eq!(detect_format(&[0x00, 0x9f, 0x92, 0x96], None, None), None);
    }

    #[tokio::test]
    async fn test_text_passes_through() {
        let encoder = ContentEncoder::new();
        let encoded = encoder
            .encode_fragment(&PromptFragment::text("hello"))
            .await
            .unwrap();
        assert_eq!(encoded, WireContent::Text("hello".into()));
    }

    #[tokio::test]
    async fn test_image_bytes_are_sniffed_deterministically() {
        let encoder = ContentEncoder::new();
        let fragment = PromptFragment::image(PNG);

        let first = encoder.encode_fragment(&fragment).await.unwrap();
        let second = encoder.encode_fragment(&fragment).await.unwrap();

        assert_eq!(first.format(), Some("png"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_explicit_format_is_normalized() {
        let encoder = ContentEncoder::new();
        let fragment = PromptFragment::document(b"just some notes".as_slice())
            .with_format("text/plain")
            .with_name("notes");

        let encoded = encoder.encode_fragment(&fragment).await.unwrap();
        assert_eq!(
            encoded,
            WireContent::Document {
                format: "txt".into(),
                name: "notes".into(),
                bytes: b"just some notes".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn test_reads_local_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("report.pdf");
        std::fs::write(&path, PDF).unwrap();

        let encoded = ContentEncoder::new()
            .encode_fragment(&PromptFragment::document(path))
            .await
            .unwrap();

        let WireContent::Document { format, name, bytes } = encoded else {
            panic!("expected a document");
        };
        assert_eq!(format, "pdf");
        assert_eq!(name, "document");
        assert_eq!(bytes, PDF);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_a_construction_error() {
        let dir = TempDir::new().unwrap();
        let err = ContentEncoder::new()
            .encode_fragment(&PromptFragment::image(dir.child("missing.png")))
            .await
            .unwrap_err();

        assert!(matches!(err, ConstructionError::UnreadableFile { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_format_is_rejected() {
        let err = ContentEncoder::new()
            .encode_fragment(&PromptFragment::image(PDF))
            .await
            .unwrap_err();

        let ConstructionError::UnsupportedFormat { kind, format } = err else {
            panic!("expected an unsupported format error");
        };
        assert_eq!(kind, MediaKind::Image);
        assert_eq!(format, "pdf");
    }

    #[tokio::test]
    async fn test_undetectable_format_is_rejected() {
        let err = ContentEncoder::new()
            .encode_fragment(&PromptFragment::document(vec![0x00, 0x9f, 0x92, 0x96]))
            .await
            .unwrap_err();

        assert!(matches!(err, ConstructionError::UndetectableFormat(_)));
    }

    #[tokio::test]
    async fn test_remote_without_fetcher() {
        let err = ContentEncoder::new()
            .encode_fragment(&PromptFragment::document("s3://bucket/report.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(err, ConstructionError::NoFetcher(_)));
    }

    #[tokio::test]
    async fn test_remote_content_uses_fetcher_and_hint() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|uri| uri == "s3://bucket/notes")
            .times(1)
            .returning(|_| {
                Ok(FetchedContent {
                    bytes: b"a,b\n1,2\n".to_vec(),
                    content_type: Some("text/csv".into()),
                })
            });

        let encoded = ContentEncoder::new()
            .with_fetcher(fetcher)
            .encode_fragment(&PromptFragment::document("s3://bucket/notes"))
            .await
            .unwrap();

        assert_eq!(encoded.format(), Some("csv"));
    }

    #[tokio::test]
    async fn test_fetch_errors_are_construction_errors() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|uri| Err(FetchError::ObjectNotFound(uri.to_string())));

        let err = ContentEncoder::new()
            .with_fetcher(fetcher)
            .encode_fragment(&PromptFragment::image("s3://bucket/cat.png"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConstructionError::Fetch(FetchError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unnamed_documents_get_unique_names() {
        let request = request(vec![
            PromptFragment::text("Compare these"),
            PromptFragment::document(b"first".as_slice()).with_format("txt"),
            PromptFragment::document(b"named".as_slice())
                .with_format("txt")
                .with_name("named"),
            PromptFragment::document(b"second".as_slice()).with_format("txt"),
        ]);

        let encoded = ContentEncoder::new()
            .encode(&request, "default-model")
            .await
            .unwrap();

        let names = encoded.messages[0]
            .content
            .iter()
            .filter_map(|content| match content {
                WireContent::Document { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();

        assert_eq!(names, ["document", "named", "document-2"]);
        assert_eq!(encoded.model_id, "default-model");
        assert_eq!(encoded.messages.len(), 1);
    }

    fn document_names(encoded: &EncodedRequest) -> Vec<&str> {
        encoded.messages[0]
            .content
            .iter()
            .filter_map(|content| match content {
                WireContent::Document { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test_case(&[None, Some("document")], &["document-2", "document"]; "caller name later in the request")]
    #[test_case(&[Some("document"), None], &["document", "document-2"]; "caller name first")]
    #[test_case(&[None, Some("document-2"), None], &["document", "document-2", "document-3"]; "caller name matching a generated one")]
    #[test_case(&[Some("document"), Some("document-2"), None, None], &["document", "document-2", "document-3", "document-4"]; "several taken")]
    #[tokio::test]
    async fn test_generated_document_names_avoid_caller_names(
        names: &[Option<&str>],
        expected: &[&str],
    ) {
        let fragments = names.iter().map(|name| {
            let document = PromptFragment::document(b"notes".as_slice()).with_format("txt");
            match name {
                Some(name) => document.with_name(*name),
                None => document,
            }
        });
        let request = request(fragments.collect());

        let encoded = ContentEncoder::new()
            .encode(&request, "default-model")
            .await
            .unwrap();

        assert_eq!(document_names(&encoded), expected);
    }

    #[tokio::test]
    async fn test_request_model_overrides_default() {
        let request = InvocationRequest::builder()
            .fragment("hi")
            .model_id("override")
            .system("be brief")
            .build()
            .unwrap();

        let encoded = ContentEncoder::new()
            .encode(&request, "default-model")
            .await
            .unwrap();

        assert_eq!(encoded.model_id, "override");
        assert_eq!(encoded.system.as_deref(), Some("be brief"));
    }
}
