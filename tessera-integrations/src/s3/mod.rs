//! Fetches prompt content stored in s3.
//!
//! Register an [`S3ContentFetcher`] with the `ContentEncoder` to use `s3://bucket/key`
//! locations in image, document and video fragments.
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata as _, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use derive_builder::Builder;
use tessera_core::{ContentFetcher, FetchError, FetchedContent};
use tokio::runtime::Handle;

const SCHEME: &str = "s3://";
const NO_SUCH_BUCKET: &str = "NoSuchBucket";

/// Splits `s3://bucket/key` into bucket and key
///
/// # Errors
///
/// Errors if the scheme, the bucket or the key is missing
///
/// ```
/// # use tessera_integrations::s3::parse_s3_uri;
/// assert_eq!(
///     parse_s3_uri("s3://reports/2024/q1.pdf").unwrap(),
///     ("reports", "2024/q1.pdf")
/// );
/// assert!(parse_s3_uri("s3://reports").is_err());
/// ```
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str), FetchError> {
    let invalid = || FetchError::InvalidUri(uri.to_string());

    let path = uri.strip_prefix(SCHEME).ok_or_else(invalid)?;
    let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;

    if bucket.is_empty() || key.is_empty() {
        return Err(invalid());
    }

    Ok((bucket, key))
}

/// Reads objects from s3.
///
/// By default the client is configured from the environment.
#[derive(Debug, Clone, Builder)]
#[builder(setter(strip_option))]
pub struct S3ContentFetcher {
    #[builder(default = self.default_client(), setter(custom))]
    client: Arc<Client>,
}

impl S3ContentFetcher {
    pub fn builder() -> S3ContentFetcherBuilder {
        S3ContentFetcherBuilder::default()
    }

    /// A fetcher using the given client
    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl S3ContentFetcherBuilder {
    #[allow(clippy::unused_self)]
    fn default_config(&self) -> aws_config::SdkConfig {
        tokio::task::block_in_place(|| {
            Handle::current().block_on(async { aws_config::from_env().load().await })
        })
    }

    fn default_client(&self) -> Arc<Client> {
        Arc::new(Client::new(&self.default_config()))
    }

    /// Set the s3 client
    pub fn client(&mut self, client: Client) -> &mut Self {
        self.client = Some(Arc::new(client));
        self
    }
}

fn fetch_error<R>(err: SdkError<GetObjectError, R>, bucket: &str, key: &str) -> FetchError
where
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match err.as_service_error() {
        Some(service) if service.is_no_such_key() => FetchError::ObjectNotFound(key.to_string()),
        Some(service) if service.code() == Some(NO_SUCH_BUCKET) => {
            FetchError::ContainerNotFound(bucket.to_string())
        }
        _ => FetchError::other(err),
    }
}

#[async_trait]
impl ContentFetcher for S3ContentFetcher {
    #[tracing::instrument(skip(self), err)]
    async fn fetch(&self, uri: &str) -> Result<FetchedContent, FetchError> {
        let (bucket, key) = parse_s3_uri(uri)?;

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| fetch_error(err, bucket, key))?;

        let content_type = output.content_type().map(str::to_string);
        let bytes = output
            .body
            .collect()
            .await
            .map_err(FetchError::other)?
            .into_bytes()
            .to_vec();

        tracing::debug!(
            bucket,
            key,
            bytes = bytes.len(),
            content_type = content_type.as_deref(),
            "Fetched object"
        );

        Ok(FetchedContent {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use aws_credential_types::Credentials;
    use aws_sdk_s3::config::Region;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use tessera_core::{ContentEncoder, InvocationRequest, PromptFragment, WireContent};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher(server: &MockServer) -> S3ContentFetcher {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::from_keys("akid", "secret", None))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .build();

        S3ContentFetcher::builder()
            .client(Client::from_conf(config))
            .build()
            .unwrap()
    }

    fn s3_error(code: &str, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(404)
            .insert_header("content-type", "application/xml")
            .set_body_string(format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>{code}</Code><Message>{message}</Message><RequestId>4442587FB7D0A2F9</RequestId></Error>"#
            ))
    }

    #[test_case("s3://bucket/key.png", Ok(("bucket", "key.png")); "simple")]
    #[test_case("s3://bucket/a/b/c.pdf", Ok(("bucket", "a/b/c.pdf")); "nested key")]
    #[test_case("bucket/key.png", Err(()); "no scheme")]
    #[test_case("s3://bucket", Err(()); "no key")]
    #[test_case("s3://bucket/", Err(()); "empty key")]
    #[test_case("s3:///key.png", Err(()); "empty bucket")]
    fn test_parse_s3_uri(uri: &str, expected: Result<(&str, &str), ()>) {
        match (parse_s3_uri(uri), expected) {
            (Ok(parsed), Ok(expected)) => assert_eq!(parsed, expected),
            (Err(FetchError::InvalidUri(invalid)), Err(())) => assert_eq!(invalid, uri),
            (parsed, expected) => panic!("{uri}: expected {expected:?}, got {parsed:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_fetches_object_with_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reports/2024/q1.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetched = fetcher(&server)
            .fetch("s3://reports/2024/q1.pdf")
            .await
            .unwrap();

        assert_eq!(fetched.bytes, b"%PDF-1.7");
        assert_eq!(fetched.content_type.as_deref(), Some("application/pdf"));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_key_is_object_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(s3_error("NoSuchKey", "The specified key does not exist."))
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .fetch("s3://reports/missing.pdf")
            .await
            .unwrap_err();

        assert!(
            matches!(&err, FetchError::ObjectNotFound(key) if key == "missing.pdf"),
            "{err:?}"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_bucket_is_container_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(s3_error("NoSuchBucket", "The specified bucket does not exist"))
            .mount(&server)
            .await;

        let err = fetcher(&server)
            .fetch("s3://nope/file.pdf")
            .await
            .unwrap_err();

        assert!(
            matches!(&err, FetchError::ContainerNotFound(bucket) if bucket == "nope"),
            "{err:?}"
        );
        assert_eq!(
            err.to_string(),
            "The bucket nope does not exist. Please check the bucket name in the file path."
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_encoder_uses_content_type_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes/readme"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/csv")
                    .set_body_bytes(b"a,b\n1,2\n".to_vec()),
            )
            .mount(&server)
            .await;

        let request = InvocationRequest::builder()
            .fragment(PromptFragment::document("s3://notes/readme"))
            .build()
            .unwrap();
        let encoded = ContentEncoder::new()
            .with_fetcher(fetcher(&server))
            .encode(&request, "model")
            .await
            .unwrap();

        assert_eq!(
            encoded.messages[0].content[0],
            WireContent::Document {
                format: "csv".into(),
                name: "document".into(),
                bytes: b"a,b\n1,2\n".to_vec(),
            }
        );
    }
}
