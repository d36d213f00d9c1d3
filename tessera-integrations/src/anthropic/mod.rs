//! A backend for the Anthropic Messages API.
//!
//! Sends the same encoded requests as the Bedrock backend directly to Anthropic. Images and PDF
//! documents are sent base64 encoded, text documents as plain text. Video is not supported.
use async_trait::async_trait;
use derive_builder::Builder;
use futures_util::StreamExt as _;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret as _, SecretString};
use tessera_core::{BackendError, BackendResponse, BackendStream, EncodedRequest, ModelBackend};

mod messages;
mod stream;

use self::messages::{MessagesRequest, MessagesResponse, status_error};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug, Builder)]
#[builder(setter(into, strip_option))]
pub struct AnthropicConfig {
    #[builder(default = ANTHROPIC_API_BASE.to_string())]
    api_base: String,
    /// Defaults to `ANTHROPIC_API_KEY`
    #[builder(default = self.default_api_key())]
    api_key: SecretString,
    #[builder(default = ANTHROPIC_VERSION.to_string())]
    version: String,
}

impl AnthropicConfig {
    pub fn builder() -> AnthropicConfigBuilder {
        AnthropicConfigBuilder::default()
    }

    pub fn with_api_base(&mut self, api_base: &str) -> &mut Self {
        self.api_base = api_base.to_string();

        self
    }

    pub fn with_api_key(&mut self, api_key: impl Into<SecretString>) -> &mut Self {
        self.api_key = api_key.into();

        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.api_base.trim_end_matches('/'))
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let api_key = self.api_key.expose_secret();
        if api_key.is_empty() {
            return Err(BackendError::service(
                "API key for Anthropic is required",
                "ANTHROPIC_API_KEY is not set",
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).map_err(BackendError::generic)?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.version).map_err(BackendError::generic)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }
}

impl AnthropicConfigBuilder {
    #[allow(clippy::unused_self)]
    fn default_api_key(&self) -> SecretString {
        std::env::var("ANTHROPIC_API_KEY")
            .unwrap_or_default()
            .into()
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_base: ANTHROPIC_API_BASE.to_string(),
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .unwrap_or_default()
                .into(),
            version: ANTHROPIC_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Builder, Clone)]
#[builder(setter(into, strip_option))]
pub struct Anthropic {
    #[builder(default, setter(custom))]
    http: reqwest::Client,

    #[builder(default)]
    config: AnthropicConfig,
}

impl Anthropic {
    pub fn builder() -> AnthropicBuilder {
        AnthropicBuilder::default()
    }
}

impl AnthropicBuilder {
    /// Sets the http client used for requests
    pub fn client(&mut self, client: reqwest::Client) -> &mut Self {
        self.http = Some(client);
        self
    }

    /// Sets the api key, overriding `ANTHROPIC_API_KEY`
    pub fn api_key(&mut self, api_key: impl Into<SecretString>) -> &mut Self {
        self.config
            .get_or_insert_with(AnthropicConfig::default)
            .with_api_key(api_key);
        self
    }

    /// Sets the api base url, e.g. to go through a proxy
    pub fn api_base(&mut self, api_base: &str) -> &mut Self {
        self.config
            .get_or_insert_with(AnthropicConfig::default)
            .with_api_base(api_base);
        self
    }
}

#[async_trait]
impl ModelBackend for Anthropic {
    #[tracing::instrument(skip_all, fields(model_id = request.model_id.as_str()))]
    async fn converse(&self, request: &EncodedRequest) -> Result<BackendResponse, BackendError> {
        let body = MessagesRequest::new(request, false)?;

        let response = self
            .http
            .post(self.config.messages_url())
            .headers(self.config.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(BackendError::generic)?;

        let status = response.status();
        let text = response.text().await.map_err(BackendError::generic)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let response: MessagesResponse =
            serde_json::from_str(&text).map_err(BackendError::generic)?;
        tracing::debug!(
            response = %tessera_core::util::debug_long_utf8(&text, 200),
            "Received messages response"
        );

        Ok(response.into())
    }

    #[tracing::instrument(skip_all, fields(model_id = request.model_id.as_str()))]
    async fn converse_stream(
        &self,
        request: &EncodedRequest,
    ) -> Result<BackendStream, BackendError> {
        let body = MessagesRequest::new(request, true)?;

        let builder = self
            .http
            .post(self.config.messages_url())
            .headers(self.config.headers()?)
            .json(&body);
        let mut source =
            EventSource::new(builder).map_err(|err| BackendError::generic(format!("{err:?}")))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        // Failures to open the stream are reported here, so they can be retried
        match source.next().await {
            Some(Ok(Event::Open)) => Ok(stream::into_chunks(source)),
            Some(Ok(Event::Message(message))) => {
                source.close();
                Err(BackendError::generic(format!(
                    "Unexpected {} event before the stream opened",
                    message.event
                )))
            }
            Some(Err(err)) => {
                source.close();
                Err(stream::source_error(err).await)
            }
            None => Err(BackendError::generic("Event stream closed before opening")),
        }
    }

    fn provider(&self) -> String {
        "Anthropic".to_string()
    }
}
