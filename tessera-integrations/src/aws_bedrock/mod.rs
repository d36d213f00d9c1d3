//! An integration with the AWS Bedrock service.
//!
//! [`AwsBedrock`] implements [`ModelBackend`] over the Converse and ConverseStream APIs, which
//! accept text, image, document and video content for every model that supports them.
//! [`BedrockImageGenerator`] generates images and [`BedrockEmbedder`] embeds text and images,
//! both through `InvokeModel`.
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client;
use derive_builder::Builder;
use futures_util::{StreamExt as _, stream};
use tessera_core::{
    BackendError, BackendResponse, BackendStream, EncodedRequest, ModelBackend,
};
use tokio::runtime::Handle;

mod convert;
mod embeddings;
mod image_generation;
mod invoke_model;

pub use embeddings::{
    BedrockEmbedder, BedrockEmbedderBuilder, EmbeddingError, EmbeddingInput, EmbeddingModelFamily,
    EmbeddingOptions, EmbeddingOptionsBuilder, Embeddings,
};
pub use image_generation::{
    BedrockImageGenerator, BedrockImageGeneratorBuilder, GeneratedImage, ImageGenerationError,
    ImageGenerationOptions, ImageGenerationOptionsBuilder, ImageModelFamily,
};

use self::convert::ConverseParts;

/// An integration with the AWS Bedrock service.
///
/// By default, the aws sdk will be configured from the environment. If you have the aws cli
/// properly configured with a region set, it should work out of the box. The default client
/// does not retry on its own; throttling is retried by the `ModelInvoker`.
///
/// Otherwise, you can use the builder for customization.
#[derive(Debug, Clone, Builder)]
#[builder(setter(strip_option))]
pub struct AwsBedrock {
    #[builder(default = self.default_client(), setter(custom))]
    /// The bedrock runtime client
    client: Arc<Client>,

    #[builder(default, setter(into))]
    /// Region reported in the provider label, defaults to the client's region
    region: Option<String>,
}

impl AwsBedrock {
    pub fn builder() -> AwsBedrockBuilder {
        AwsBedrockBuilder::default()
    }

    /// Region the client talks to, if known
    pub fn region(&self) -> Option<String> {
        self.region.clone().or_else(|| {
            self.client
                .config()
                .region()
                .map(std::string::ToString::to_string)
        })
    }
}

impl AwsBedrockBuilder {
    #[allow(clippy::unused_self)]
    fn default_config(&self) -> aws_config::SdkConfig {
        tokio::task::block_in_place(|| {
            Handle::current().block_on(async {
                aws_config::from_env()
                    .retry_config(aws_config::retry::RetryConfig::disabled())
                    .load()
                    .await
            })
        })
    }

    fn default_client(&self) -> Arc<Client> {
        Arc::new(Client::new(&self.default_config()))
    }

    /// Set the aws bedrock runtime client
    pub fn client(&mut self, client: Client) -> &mut Self {
        self.client = Some(Arc::new(client));
        self
    }
}

#[async_trait]
impl ModelBackend for AwsBedrock {
    #[tracing::instrument(skip_all, fields(model_id = request.model_id.as_str()))]
    async fn converse(&self, request: &EncodedRequest) -> Result<BackendResponse, BackendError> {
        let parts = ConverseParts::try_from(request)?;

        let output = self
            .client
            .converse()
            .model_id(&request.model_id)
            .set_messages(Some(parts.messages))
            .set_system(parts.system)
            .inference_config(parts.inference)
            .send()
            .await
            .map_err(convert::classify_error)?;

        let response = convert::response_from_output(&output);
        tracing::debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            stop_reason = response.stop_reason.as_deref(),
            "Received converse response"
        );

        Ok(response)
    }

    #[tracing::instrument(skip_all, fields(model_id = request.model_id.as_str()))]
    async fn converse_stream(
        &self,
        request: &EncodedRequest,
    ) -> Result<BackendStream, BackendError> {
        let parts = ConverseParts::try_from(request)?;

        let output = self
            .client
            .converse_stream()
            .model_id(&request.model_id)
            .set_messages(Some(parts.messages))
            .set_system(parts.system)
            .inference_config(parts.inference)
            .send()
            .await
            .map_err(convert::classify_error)?;

        let chunks = stream::unfold(Some(output.stream), |receiver| async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(Some(event)) => {
                        if let Some(chunk) = convert::chunk_from_event(&event) {
                            return Some((Ok(chunk), Some(receiver)));
                        }
                    }
                    Ok(None) => return None,
                    Err(err) => return Some((Err(convert::classify_error(err)), None)),
                }
            }
        });

        Ok(chunks.boxed())
    }

    fn provider(&self) -> String {
        format!(
            "Bedrock:{}",
            self.region().unwrap_or_else(|| "unknown".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use aws_credential_types::Credentials;
    use aws_sdk_bedrockruntime::config::{Region, retry::RetryConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tessera_core::{
        ContentEncoder, InvocationRequest, PromptFragment, errors::GENERIC_SERVICE_MESSAGE,
    };
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const MODEL: &str = "test-model";

    fn client(server: &MockServer) -> Client {
        let config = aws_sdk_bedrockruntime::Config::builder()
            .behavior_version_latest()
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::from_keys("akid", "secret", None))
            .endpoint_url(server.uri())
            .retry_config(RetryConfig::disabled())
            .build();
        Client::from_conf(config)
    }

    fn bedrock(server: &MockServer) -> AwsBedrock {
        AwsBedrock::builder().client(client(server)).build().unwrap()
    }

    async fn encoded(request: &InvocationRequest) -> EncodedRequest {
        ContentEncoder::new().encode(request, MODEL).await.unwrap()
    }

    fn converse_body(text: &str) -> serde_json::Value {
        json!({
            "output": {
                "message": {
                    "role": "assistant",
                    "content": [{"text": text}]
                }
            },
            "stopReason": "end_turn",
            "usage": {"inputTokens": 10, "outputTokens": 2, "totalTokens": 12},
            "metrics": {"latencyMs": 120}
        })
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_converse_sends_content_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/model/{MODEL}/converse")))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(converse_body("hi")))
            .expect(1)
            .mount(&server)
            .await;

        let request = InvocationRequest::builder()
            .fragment("hello")
            .fragment(PromptFragment::document(b"%PDF-1.7 fake".to_vec()).with_format("pdf"))
            .system("be brief")
            .build()
            .unwrap();

        let response = bedrock(&server)
            .converse(&encoded(&request).await)
            .await
            .unwrap();

        assert_eq!(response.text, "hi");
        assert_eq!(response.input_tokens, 10);
        assert_eq!(response.output_tokens, 2);
        assert_eq!(response.latency, Some(std::time::Duration::from_millis(120)));
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.invoked_model_id, None);

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = received[0].body_json().unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
        assert_eq!(
            body["messages"][0]["content"][1]["document"]["name"],
            "document"
        );
        assert_eq!(
            body["messages"][0]["content"][1]["document"]["format"],
            "pdf"
        );
        assert_eq!(body["system"][0]["text"], "be brief");
        assert_eq!(body["inferenceConfig"]["maxTokens"], 512);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_converse_reads_prompt_router_trace() {
        let server = MockServer::start().await;
        let mut body = converse_body("routed");
        body["trace"] = json!({
            "promptRouter": {
                "invokedModelId": "arn:aws:bedrock:us-east-1:123456789012:inference-profile/us.anthropic.claude-3-haiku-20240307-v1:0"
            }
        });
        Mock::given(method("POST"))
            .and(path(format!("/model/{MODEL}/converse")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let response = bedrock(&server)
            .converse(&encoded(&InvocationRequest::from_text("hello")).await)
            .await
            .unwrap();

        assert_eq!(
            response.invoked_model_id.as_deref(),
            Some(
                "arn:aws:bedrock:us-east-1:123456789012:inference-profile/us.anthropic.claude-3-haiku-20240307-v1:0"
            )
        );
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_throttling_exception_is_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("x-amzn-errortype", "ThrottlingException")
                    .set_body_json(
                        json!({"message": "Too many requests, please wait before trying again."}),
                    ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = bedrock(&server)
            .converse(&encoded(&InvocationRequest::from_text("hello")).await)
            .await
            .unwrap_err();

        assert!(err.is_throttling(), "{err:?}");
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_service_errors_carry_code_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .insert_header("x-amzn-errortype", "ValidationException")
                    .set_body_json(json!({"message": "The provided model identifier is invalid."})),
            )
            .mount(&server)
            .await;

        let err = bedrock(&server)
            .converse(&encoded(&InvocationRequest::from_text("hello")).await)
            .await
            .unwrap_err();

        assert!(!err.is_throttling());
        assert_eq!(
            err.to_string(),
            "ValidationException: The provided model identifier is invalid."
        );
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_transport_errors_get_generic_message() {
        let server = MockServer::start().await;
        let bedrock = bedrock(&server);
        drop(server);

        let err = bedrock
            .converse(&encoded(&InvocationRequest::from_text("hello")).await)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), GENERIC_SERVICE_MESSAGE);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_provider_uses_region() {
        let server = MockServer::start().await;
        assert_eq!(bedrock(&server).provider(), "Bedrock:us-east-1");

        let relabelled = AwsBedrock::builder()
            .client(client(&server))
            .region("eu-west-1")
            .build()
            .unwrap();
        assert_eq!(relabelled.provider(), "Bedrock:eu-west-1");
    }
}
