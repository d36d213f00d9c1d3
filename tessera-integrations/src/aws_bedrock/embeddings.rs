//! Embeddings with Bedrock's `InvokeModel`.
//!
//! Like image generation, every supported model belongs to a family with its own request body and
//! response shape, resolved once when the embedder is built.
use std::sync::Arc;

use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::Blob;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use derive_builder::{Builder, UninitializedFieldError};
use serde::{Deserialize, Serialize};
use tessera_core::BackendError;
use tessera_core::RetryConfig;
use tessera_core::retry::{RetryOutcome, retry_throttled};
use thiserror::Error;

use super::invoke_model::{BedrockPrompt, client_from_env};

const FLOAT: [&str; 1] = ["float"];

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Unsupported embedding model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid embedding request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Still throttled after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Model returned no embedding: {0}")]
    NoEmbedding(String),

    #[error("Failed to parse the model response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<UninitializedFieldError> for EmbeddingError {
    fn from(value: UninitializedFieldError) -> Self {
        EmbeddingError::InvalidRequest(value.to_string())
    }
}

impl From<String> for EmbeddingError {
    fn from(value: String) -> Self {
        EmbeddingError::InvalidRequest(value)
    }
}

/// Model families that share an `InvokeModel` api
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum EmbeddingModelFamily {
    /// Titan Text Embeddings v1, text only and no options
    TitanTextV1,
    /// Titan Text Embeddings v2, with dimensions and normalization
    TitanTextV2,
    /// Titan Multimodal Embeddings, text and or an image
    TitanMultimodal,
    /// Cohere Embed English and Multilingual v3, several texts per call
    Cohere,
}

impl EmbeddingModelFamily {
    /// Resolves the family of a model id, ignoring any cross-region prefix
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id
            .split_once('.')
            .filter(|(prefix, _)| ["us", "eu", "apac", "au", "global"].contains(prefix))
            .map_or(model_id, |(_, rest)| rest);

        if id.starts_with("amazon.titan-embed-text-v1") {
            Some(EmbeddingModelFamily::TitanTextV1)
        } else if id.starts_with("amazon.titan-embed-text-v2") {
            Some(EmbeddingModelFamily::TitanTextV2)
        } else if id.starts_with("amazon.titan-embed-image-v1") {
            Some(EmbeddingModelFamily::TitanMultimodal)
        } else if id.starts_with("cohere.embed-english-v3")
            || id.starts_with("cohere.embed-multilingual-v3")
        {
            Some(EmbeddingModelFamily::Cohere)
        } else {
            None
        }
    }

    /// Checks the input has what the family accepts, and nothing else
    fn validate(self, input: &EmbeddingInput) -> Result<(), EmbeddingError> {
        let invalid = |msg: &str| -> Result<(), EmbeddingError> {
            Err(EmbeddingError::InvalidRequest(msg.to_string()))
        };

        if input.texts.iter().any(|text| text.trim().is_empty()) {
            return invalid("Input text cannot be empty.");
        }

        match self {
            EmbeddingModelFamily::TitanTextV1 | EmbeddingModelFamily::TitanTextV2 => {
                if input.image.is_some() {
                    return invalid("Text embedding models do not accept images.");
                }
                if input.texts.len() != 1 {
                    return invalid("Titan text embeddings take exactly one text.");
                }
            }
            EmbeddingModelFamily::TitanMultimodal => {
                if input.texts.len() > 1 {
                    return invalid("Titan multimodal embeddings take at most one text.");
                }
                if input.texts.is_empty() && input.image.is_none() {
                    return invalid("Either a text or an image is required.");
                }
            }
            EmbeddingModelFamily::Cohere => {
                if input.image.is_some() {
                    return invalid("Cohere embedding models do not accept images.");
                }
                if input.texts.is_empty() {
                    return invalid("At least one text is required.");
                }
            }
        }
        Ok(())
    }

    fn request_body(
        self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Vec<u8>, serde_json::Error> {
        let first_text = input.texts.first().map(String::as_str);

        match self {
            EmbeddingModelFamily::TitanTextV1 => serde_json::to_vec(&TitanTextRequest {
                input_text: first_text.unwrap_or_default(),
                dimensions: None,
                normalize: None,
                embedding_types: None,
            }),
            EmbeddingModelFamily::TitanTextV2 => serde_json::to_vec(&TitanTextRequest {
                input_text: first_text.unwrap_or_default(),
                dimensions: Some(options.dimensions),
                normalize: Some(options.normalize),
                embedding_types: Some(FLOAT),
            }),
            EmbeddingModelFamily::TitanMultimodal => serde_json::to_vec(&TitanMultimodalRequest {
                input_text: first_text,
                input_image: input.image.as_ref().map(|image| STANDARD.encode(image)),
                embedding_config: TitanEmbeddingConfig {
                    output_embedding_length: options.dimensions,
                },
            }),
            EmbeddingModelFamily::Cohere => serde_json::to_vec(&CohereRequest {
                texts: &input.texts,
                input_type: &options.input_type,
                truncate: &options.truncate,
                embedding_types: FLOAT,
            }),
        }
    }

    /// Returns one vector per input text, or a single vector for Titan, and the token count
    /// when the model reports one
    fn parse_response(self, body: &[u8]) -> Result<(Vec<Vec<f32>>, Option<u64>), EmbeddingError> {
        match self {
            EmbeddingModelFamily::TitanTextV1
            | EmbeddingModelFamily::TitanTextV2
            | EmbeddingModelFamily::TitanMultimodal => {
                let response: TitanResponse = serde_json::from_slice(body)?;
                let embedding = response.embedding.ok_or_else(|| {
                    EmbeddingError::NoEmbedding(
                        response
                            .message
                            .unwrap_or_else(|| "Unknown error".to_string()),
                    )
                })?;
                Ok((vec![embedding], response.input_text_token_count))
            }
            EmbeddingModelFamily::Cohere => {
                let response: CohereResponse = serde_json::from_slice(body)?;
                let vectors = match response.embeddings {
                    CohereEmbeddings::Floats(vectors) | CohereEmbeddings::ByType { float: vectors } => {
                        vectors
                    }
                };
                if vectors.is_empty() {
                    return Err(EmbeddingError::NoEmbedding("Unknown error".to_string()));
                }
                Ok((vectors, None))
            }
        }
    }
}

/// What to embed: one or more texts, an image, or a text and an image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
    /// Raw image bytes, multimodal models only
    pub image: Option<Vec<u8>>,
}

impl EmbeddingInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
            image: None,
        }
    }

    pub fn texts(texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            image: None,
        }
    }

    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            texts: Vec::new(),
            image: Some(bytes.into()),
        }
    }

    /// Adds a text to guide an image embedding
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.texts.push(text.into());
        self
    }
}

impl From<&str> for EmbeddingInput {
    fn from(value: &str) -> Self {
        EmbeddingInput::text(value)
    }
}

impl From<String> for EmbeddingInput {
    fn from(value: String) -> Self {
        EmbeddingInput::text(value)
    }
}

/// Options for a single call. Families ignore the options they do not support.
#[derive(Debug, Clone, Builder, PartialEq)]
#[builder(setter(into))]
pub struct EmbeddingOptions {
    /// Titan v2 and multimodal only
    #[builder(default = "1024")]
    pub dimensions: u32,
    /// Titan v2 only
    #[builder(default = "true")]
    pub normalize: bool,
    /// Cohere only, e.g. `search_query`, `search_document`, `classification` or `clustering`
    #[builder(default = "\"search_query\".to_string()")]
    pub input_type: String,
    /// Cohere only, one of `NONE`, `START` or `END`
    #[builder(default = "\"NONE\".to_string()")]
    pub truncate: String,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            dimensions: 1024,
            normalize: true,
            input_type: "search_query".to_string(),
            truncate: "NONE".to_string(),
        }
    }
}

impl EmbeddingOptions {
    pub fn builder() -> EmbeddingOptionsBuilder {
        EmbeddingOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    /// One vector per input text for Cohere, a single vector for the Titan models
    pub vectors: Vec<Vec<f32>>,
    /// Only reported by the Titan models
    pub input_tokens: Option<u64>,
    pub family: EmbeddingModelFamily,
    pub model_id: String,
}

/// Embeds text and images with a Bedrock embedding model.
///
/// ```no_run
/// # use tessera_integrations::aws_bedrock::*;
/// # async fn run() -> Result<(), EmbeddingError> {
/// let embedder = BedrockEmbedder::builder()
///     .model_id("amazon.titan-embed-text-v2:0")
///     .build()?;
///
/// let vector = embedder.embed_text("A lighthouse at dusk").await?;
/// println!("{} dimensions", vector.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(
    setter(strip_option),
    build_fn(error = "EmbeddingError", validate = "Self::validate")
)]
pub struct BedrockEmbedder {
    #[builder(setter(into))]
    /// The model id or arn of the model to use
    model_id: String,

    #[builder(setter(skip), default = "self.resolve_family()?")]
    family: EmbeddingModelFamily,

    #[builder(default = client_from_env(), setter(custom))]
    client: Arc<dyn BedrockPrompt>,

    #[builder(default)]
    retry: RetryConfig,
}

impl BedrockEmbedder {
    pub fn builder() -> BedrockEmbedderBuilder {
        BedrockEmbedderBuilder::default()
    }

    pub fn family(&self) -> EmbeddingModelFamily {
        self.family
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Embeds a single text with the default options
    ///
    /// # Errors
    ///
    /// See [`BedrockEmbedder::embed`]
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let embeddings = self
            .embed(&EmbeddingInput::text(text), &EmbeddingOptions::default())
            .await?;
        embeddings
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::NoEmbedding("Unknown error".to_string()))
    }

    /// Embeds `input`
    ///
    /// # Errors
    ///
    /// Errors if the input does not fit the model, the endpoint fails or stays throttled, or the
    /// response carries no embedding
    #[tracing::instrument(skip_all, fields(model_id = self.model_id.as_str()), err)]
    pub async fn embed(
        &self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Embeddings, EmbeddingError> {
        self.family.validate(input)?;

        let body = self.family.request_body(input, options)?;
        let client = &self.client;
        let model_id = self.model_id.as_str();
        let outcome = retry_throttled(&self.retry, || {
            let blob = Blob::new(body.clone());
            async move { client.prompt_u8(model_id, blob).await }
        })
        .await;

        let response = match outcome {
            RetryOutcome::Succeeded(response) => response,
            RetryOutcome::Failed(err) => return Err(err.into()),
            RetryOutcome::Exhausted { attempts } => {
                return Err(EmbeddingError::RetriesExhausted { attempts });
            }
        };

        let (vectors, input_tokens) = self.family.parse_response(&response)?;
        tracing::debug!(
            vectors = vectors.len(),
            input_tokens,
            family = %self.family,
            "Embedded input"
        );

        Ok(Embeddings {
            vectors,
            input_tokens,
            family: self.family,
            model_id: self.model_id.clone(),
        })
    }
}

impl BedrockEmbedderBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.model_id {
            Some(model_id) if EmbeddingModelFamily::from_model_id(model_id).is_none() => {
                Err(format!("Unsupported embedding model: {model_id}"))
            }
            _ => Ok(()),
        }
    }

    fn resolve_family(&self) -> Result<EmbeddingModelFamily, EmbeddingError> {
        let model_id = self
            .model_id
            .as_deref()
            .ok_or_else(|| UninitializedFieldError::new("model_id"))?;
        EmbeddingModelFamily::from_model_id(model_id)
            .ok_or_else(|| EmbeddingError::UnsupportedModel(model_id.to_string()))
    }

    /// Set the aws bedrock runtime client
    pub fn client(&mut self, client: Client) -> &mut Self {
        self.client = Some(Arc::new(client));
        self
    }

    #[cfg(test)]
    #[allow(private_bounds)]
    pub fn test_client(&mut self, client: impl BedrockPrompt + 'static) -> &mut Self {
        self.client = Some(Arc::new(client));
        self
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanTextRequest<'a> {
    input_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    normalize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_types: Option<[&'a str; 1]>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanEmbeddingConfig {
    output_embedding_length: u32,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanMultimodalRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    input_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_image: Option<String>,
    embedding_config: TitanEmbeddingConfig,
}

#[derive(Serialize, Debug)]
struct CohereRequest<'a> {
    texts: &'a [String],
    input_type: &'a str,
    truncate: &'a str,
    embedding_types: [&'a str; 1],
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanResponse {
    embedding: Option<Vec<f32>>,
    input_text_token_count: Option<u64>,
    message: Option<String>,
}

/// Cohere answers with a plain list, or keyed by type when types were requested
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CohereEmbeddings {
    Floats(Vec<Vec<f32>>),
    ByType { float: Vec<Vec<f32>> },
}

#[derive(Deserialize, Debug)]
struct CohereResponse {
    embeddings: CohereEmbeddings,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;
    use tessera_core::ExhaustionPolicy;

    use super::*;
    use crate::aws_bedrock::invoke_model::MockBedrockPrompt;

    fn body(family: EmbeddingModelFamily, input: &EmbeddingInput) -> serde_json::Value {
        let bytes = family
            .request_body(input, &EmbeddingOptions::default())
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn embedder(model_id: &str, client: MockBedrockPrompt) -> BedrockEmbedder {
        BedrockEmbedder::builder()
            .model_id(model_id)
            .test_client(client)
            .build()
            .unwrap()
    }

    #[test_case("amazon.titan-embed-text-v1", Some(EmbeddingModelFamily::TitanTextV1); "titan v1")]
    #[test_case("amazon.titan-embed-text-v2:0", Some(EmbeddingModelFamily::TitanTextV2); "titan v2")]
    #[test_case("amazon.titan-embed-image-v1", Some(EmbeddingModelFamily::TitanMultimodal); "titan image")]
    #[test_case("cohere.embed-english-v3", Some(EmbeddingModelFamily::Cohere); "cohere english")]
    #[test_case("cohere.embed-multilingual-v3", Some(EmbeddingModelFamily::Cohere); "cohere multilingual")]
    #[test_case("us.cohere.embed-english-v3", Some(EmbeddingModelFamily::Cohere); "prefixed")]
    #[test_case("amazon.titan-image-generator-v1", None; "image generator")]
    #[test_case("anthropic.claude-3-haiku-20240307-v1:0", None; "text model")]
    fn test_resolves_family(model_id: &str, expected: Option<EmbeddingModelFamily>) {
        assert_eq!(EmbeddingModelFamily::from_model_id(model_id), expected);
    }

    #[test]
    fn test_unknown_model_fails_to_build() {
        let err = BedrockEmbedder::builder()
            .model_id("amazon.titan-image-generator-v1")
            .test_client(MockBedrockPrompt::new())
            .build()
            .unwrap_err();

        assert!(
            err.to_string().contains("amazon.titan-image-generator-v1"),
            "{err}"
        );
    }

    #[test]
    fn test_request_bodies() {
        assert_eq!(
            body(EmbeddingModelFamily::TitanTextV1, &"hello".into()),
            json!({"inputText": "hello"})
        );
        assert_eq!(
            body(EmbeddingModelFamily::TitanTextV2, &"hello".into()),
            json!({
                "inputText": "hello",
                "dimensions": 1024,
                "normalize": true,
                "embeddingTypes": ["float"]
            })
        );
        assert_eq!(
            body(
                EmbeddingModelFamily::TitanMultimodal,
                &EmbeddingInput::image(b"png".to_vec()).with_text("a cat")
            ),
            json!({
                "inputText": "a cat",
                "inputImage": STANDARD.encode(b"png"),
                "embeddingConfig": {"outputEmbeddingLength": 1024}
            })
        );
        assert_eq!(
            body(
                EmbeddingModelFamily::Cohere,
                &EmbeddingInput::texts(["first", "second"])
            ),
            json!({
                "texts": ["first", "second"],
                "input_type": "search_query",
                "truncate": "NONE",
                "embedding_types": ["float"]
            })
        );
    }

    #[test]
    fn test_options_reach_the_body() {
        let options = EmbeddingOptions::builder()
            .dimensions(256_u32)
            .normalize(false)
            .input_type("search_document")
            .build()
            .unwrap();

        let titan: serde_json::Value = serde_json::from_slice(
            &EmbeddingModelFamily::TitanTextV2
                .request_body(&"hello".into(), &options)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(titan["dimensions"], 256);
        assert_eq!(titan["normalize"], false);

        let cohere: serde_json::Value = serde_json::from_slice(
            &EmbeddingModelFamily::Cohere
                .request_body(&"hello".into(), &options)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(cohere["input_type"], "search_document");
    }

    #[test]
    fn test_parses_responses() {
        let titan = serde_json::to_vec(&json!({
            "embedding": [0.5, -0.25],
            "inputTextTokenCount": 3
        }))
        .unwrap();
        assert_eq!(
            EmbeddingModelFamily::TitanTextV2
                .parse_response(&titan)
                .unwrap(),
            (vec![vec![0.5, -0.25]], Some(3))
        );

        let cohere_plain = serde_json::to_vec(&json!({
            "id": "abc",
            "response_type": "embeddings_floats",
            "embeddings": [[0.5], [1.0]],
            "texts": ["first", "second"]
        }))
        .unwrap();
        assert_eq!(
            EmbeddingModelFamily::Cohere
                .parse_response(&cohere_plain)
                .unwrap(),
            (vec![vec![0.5], vec![1.0]], None)
        );

        let cohere_by_type = serde_json::to_vec(&json!({
            "response_type": "embeddings_by_type",
            "embeddings": {"float": [[0.25]]}
        }))
        .unwrap();
        assert_eq!(
            EmbeddingModelFamily::Cohere
                .parse_response(&cohere_by_type)
                .unwrap()
                .0,
            vec![vec![0.25]]
        );
    }

    #[test]
    fn test_missing_embedding_reports_message() {
        let body = serde_json::to_vec(&json!({"message": "Malformed input request"})).unwrap();

        let err = EmbeddingModelFamily::TitanTextV1
            .parse_response(&body)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Model returned no embedding: Malformed input request"
        );
    }

    #[test_case(EmbeddingModelFamily::TitanTextV1, EmbeddingInput::image(b"png".to_vec()); "image for text model")]
    #[test_case(EmbeddingModelFamily::TitanTextV2, EmbeddingInput::texts(["a", "b"]); "two texts for titan")]
    #[test_case(EmbeddingModelFamily::TitanMultimodal, EmbeddingInput::default(); "nothing for multimodal")]
    #[test_case(EmbeddingModelFamily::Cohere, EmbeddingInput::texts(Vec::<String>::new()); "no texts for cohere")]
    #[test_case(EmbeddingModelFamily::Cohere, EmbeddingInput::text("  "); "blank text")]
    fn test_rejects_input_the_family_cannot_take(
        family: EmbeddingModelFamily,
        input: EmbeddingInput,
    ) {
        assert!(matches!(
            family.validate(&input),
            Err(EmbeddingError::InvalidRequest(_))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_embed_text() {
        let mut client = MockBedrockPrompt::new();
        client
            .expect_prompt_u8()
            .once()
            .withf(|model_id, blob| {
                let body: serde_json::Value = serde_json::from_slice(blob.as_ref()).unwrap();
                model_id == "amazon.titan-embed-text-v2:0" && body["inputText"] == "A lighthouse"
            })
            .returning(|_, _| {
                Ok(serde_json::to_vec(&json!({
                    "embedding": [0.1, 0.2, 0.3],
                    "inputTextTokenCount": 2
                }))
                .unwrap())
            });

        let embedder = embedder("amazon.titan-embed-text-v2:0", client);
        assert_eq!(embedder.family(), EmbeddingModelFamily::TitanTextV2);

        let vector = embedder.embed_text("A lighthouse").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[test_log::test(tokio::test)]
    async fn test_embed_batch_with_cohere() {
        let mut client = MockBedrockPrompt::new();
        client.expect_prompt_u8().once().returning(|_, _| {
            Ok(serde_json::to_vec(&json!({
                "embeddings": {"float": [[1.0], [2.0]]}
            }))
            .unwrap())
        });

        let embeddings = embedder("cohere.embed-english-v3", client)
            .embed(
                &EmbeddingInput::texts(["first", "second"]),
                &EmbeddingOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(embeddings.vectors, vec![vec![1.0], vec![2.0]]);
        assert_eq!(embeddings.input_tokens, None);
        assert_eq!(embeddings.family, EmbeddingModelFamily::Cohere);
        assert_eq!(embeddings.model_id, "cohere.embed-english-v3");
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_input_never_calls_the_model() {
        let embedder = embedder("amazon.titan-embed-text-v1", MockBedrockPrompt::new());

        let err = embedder
            .embed(
                &EmbeddingInput::image(b"png".to_vec()),
                &EmbeddingOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EmbeddingError::InvalidRequest(_)), "{err:?}");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_throttling_is_retried_until_exhausted() {
        let mut client = MockBedrockPrompt::new();
        client
            .expect_prompt_u8()
            .times(3)
            .returning(|_, _| Err(BackendError::throttled("ThrottlingException")));

        let embedder = BedrockEmbedder::builder()
            .model_id("amazon.titan-embed-image-v1")
            .test_client(client)
            .retry(RetryConfig {
                base_delay: Duration::from_secs(1),
                max_attempts: 3,
                on_exhausted: ExhaustionPolicy::Fail,
            })
            .build()
            .unwrap();

        let err = embedder.embed_text("A lighthouse").await.unwrap_err();

        assert!(
            matches!(err, EmbeddingError::RetriesExhausted { attempts: 3 }),
            "{err:?}"
        );
    }
}
