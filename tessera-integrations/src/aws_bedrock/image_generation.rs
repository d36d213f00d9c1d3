//! Image generation with Bedrock's `InvokeModel`.
//!
//! Every supported model belongs to a family that shares a request body and a response shape.
//! The family is resolved once, when the generator is built.
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

#[derive(Error, Debug)]
pub enum ImageGenerationError {
    #[error("Unsupported image generation model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid image generation request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Still throttled after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Model invocation failed: {0}")]
    NoImage(String),

    #[error("Failed to parse the model response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl From<UninitializedFieldError> for ImageGenerationError {
    fn from(value: UninitializedFieldError) -> Self {
        ImageGenerationError::InvalidRequest(value.to_string())
    }
}

impl From<String> for ImageGenerationError {
    fn from(value: String) -> Self {
        ImageGenerationError::InvalidRequest(value)
    }
}

/// Model families that share an `InvokeModel` api
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ImageModelFamily {
    /// Stable Image Core, Stable Image Ultra and Stable Diffusion 3 Large
    StableImage,
    StableDiffusionXl,
    /// Titan Image Generator v1 and v2
    Titan,
}

impl ImageModelFamily {
    /// Resolves the family of a model id, ignoring any cross-region prefix
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        const STABLE_IMAGE: [&str; 3] = [
            "stability.stable-image-core",
            "stability.stable-image-ultra",
            "stability.sd3-large",
        ];

        let id = model_id
            .split_once('.')
            .filter(|(prefix, _)| ["us", "eu", "apac", "au", "global"].contains(prefix))
            .map_or(model_id, |(_, rest)| rest);

        if STABLE_IMAGE.iter().any(|family| id.starts_with(family)) {
            Some(ImageModelFamily::StableImage)
        } else if id.starts_with("stability.stable-diffusion-xl") {
            Some(ImageModelFamily::StableDiffusionXl)
        } else if id.starts_with("amazon.titan-image-generator-v1")
            || id.starts_with("amazon.titan-image-generator-v2")
        {
            Some(ImageModelFamily::Titan)
        } else {
            None
        }
    }

    fn request_body(
        self,
        prompt: &str,
        options: &ImageGenerationOptions,
    ) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ImageModelFamily::StableImage => serde_json::to_vec(&StableImageRequest {
                prompt,
                aspect_ratio: &options.aspect_ratio,
                mode: "text-to-image",
                output_format: &options.output_format,
                seed: options.seed,
                negative_prompt: &options.negative_prompt,
            }),
            ImageModelFamily::StableDiffusionXl => serde_json::to_vec(&SdxlRequest {
                text_prompts: vec![SdxlTextPrompt {
                    text: prompt,
                    weight: 1.0,
                }],
                cfg_scale: options.cfg_scale,
                clip_guidance_preset: "FAST_BLUE",
                sampler: "DDIM",
                samples: 1,
                seed: options.seed,
                steps: 30,
                style_preset: "photographic",
                height: options.height.unwrap_or(512),
                width: options.width.unwrap_or(512),
            }),
            ImageModelFamily::Titan => serde_json::to_vec(&TitanImageRequest {
                task_type: "TEXT_IMAGE",
                text_to_image_params: TitanTextToImage {
                    text: prompt,
                    negative_text: (!options.negative_prompt.is_empty())
                        .then_some(options.negative_prompt.as_str()),
                },
                image_generation_config: TitanImageConfig {
                    quality: "premium",
                    number_of_images: 1,
                    height: options.height.unwrap_or(1024),
                    width: options.width.unwrap_or(1024),
                    cfg_scale: options.cfg_scale,
                    seed: options.seed,
                },
            }),
        }
    }

    /// Returns the first image, still base64 encoded, and its seed if reported
    fn parse_response(self, body: &[u8]) -> Result<(String, Option<u64>), ImageGenerationError> {
        match self {
            ImageModelFamily::StableImage | ImageModelFamily::Titan => {
                let response: ImagesResponse = serde_json::from_slice(body)?;
                let seed = response.seeds.first().copied();
                let image = response.images.into_iter().next().ok_or_else(|| {
                    ImageGenerationError::NoImage(
                        response
                            .finish_reasons
                            .into_iter()
                            .flatten()
                            .next()
                            .or(response.error)
                            .unwrap_or_else(|| "Unknown error".to_string()),
                    )
                })?;
                Ok((image, seed))
            }
            ImageModelFamily::StableDiffusionXl => {
                let response: ArtifactsResponse = serde_json::from_slice(body)?;
                let artifact = response.artifacts.into_iter().next().ok_or_else(|| {
                    ImageGenerationError::NoImage("Unknown error".to_string())
                })?;
                let image = artifact.base64.filter(|image| !image.is_empty()).ok_or_else(|| {
                    ImageGenerationError::NoImage(
                        artifact
                            .finish_reason
                            .unwrap_or_else(|| "No base64-encoded image found".to_string()),
                    )
                })?;
                Ok((image, artifact.seed))
            }
        }
    }
}

/// Options for a single generation. Families ignore the options they do not support.
#[derive(Debug, Clone, Builder, PartialEq)]
#[builder(setter(into, strip_option))]
pub struct ImageGenerationOptions {
    /// What the image should not contain
    #[builder(default)]
    pub negative_prompt: String,
    #[builder(default)]
    pub seed: u32,
    /// Stable image only
    #[builder(default = "\"1:1\".to_string()")]
    pub aspect_ratio: String,
    /// Stable image only
    #[builder(default = "\"png\".to_string()")]
    pub output_format: String,
    /// Defaults to 512 for SDXL and 1024 for Titan
    #[builder(default)]
    pub width: Option<u32>,
    /// Defaults to 512 for SDXL and 1024 for Titan
    #[builder(default)]
    pub height: Option<u32>,
    #[builder(default = "7.0")]
    pub cfg_scale: f32,
}

impl Default for ImageGenerationOptions {
    fn default() -> Self {
        Self {
            negative_prompt: String::new(),
            seed: 0,
            aspect_ratio: "1:1".to_string(),
            output_format: "png".to_string(),
            width: None,
            height: None,
            cfg_scale: 7.0,
        }
    }
}

impl ImageGenerationOptions {
    pub fn builder() -> ImageGenerationOptionsBuilder {
        ImageGenerationOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Decoded image bytes, in the requested output format
    pub bytes: Vec<u8>,
    pub seed: Option<u64>,
    pub family: ImageModelFamily,
    pub model_id: String,
}

/// Generates images with a Bedrock image model.
///
/// Throttled calls are retried with the same backoff as text invocations.
///
/// ```no_run
/// # use tessera_integrations::aws_bedrock::*;
/// # async fn run() -> Result<(), ImageGenerationError> {
/// let generator = BedrockImageGenerator::builder()
///     .model_id("stability.stable-image-core-v1:0")
///     .build()?;
///
/// let image = generator
///     .generate("A lighthouse at dusk", &ImageGenerationOptions::default())
///     .await?;
/// std::fs::write("lighthouse.png", &image.bytes).ok();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(
    setter(strip_option),
    build_fn(error = "ImageGenerationError", validate = "Self::validate")
)]
pub struct BedrockImageGenerator {
    #[builder(setter(into))]
    /// The model id or arn of the model to use
    model_id: String,

    #[builder(setter(skip), default = "self.resolve_family()?")]
    family: ImageModelFamily,

    #[builder(default = client_from_env(), setter(custom))]
    client: Arc<dyn BedrockPrompt>,

    #[builder(default)]
    retry: RetryConfig,
}

impl BedrockImageGenerator {
    pub fn builder() -> BedrockImageGeneratorBuilder {
        BedrockImageGeneratorBuilder::default()
    }

    pub fn family(&self) -> ImageModelFamily {
        self.family
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Generates one image from `prompt`
    ///
    /// # Errors
    ///
    /// Errors if the prompt is empty, the endpoint fails or stays throttled, or the response
    /// carries no image
    #[tracing::instrument(skip_all, fields(model_id = self.model_id.as_str()), err)]
    pub async fn generate(
        &self,
        prompt: &str,
        options: &ImageGenerationOptions,
    ) -> Result<GeneratedImage, ImageGenerationError> {
        if prompt.trim().is_empty() {
            return Err(ImageGenerationError::InvalidRequest(
                "Input prompt cannot be empty.".to_string(),
            ));
        }

        let body = self.family.request_body(prompt, options)?;
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
                return Err(ImageGenerationError::RetriesExhausted { attempts });
            }
        };

        let (image, seed) = self.family.parse_response(&response)?;
        let bytes = STANDARD.decode(image)?;
        tracing::debug!(bytes = bytes.len(), seed, family = %self.family, "Generated image");

        Ok(GeneratedImage {
            bytes,
            seed,
            family: self.family,
            model_id: self.model_id.clone(),
        })
    }
}

impl BedrockImageGeneratorBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.model_id {
            Some(model_id) if ImageModelFamily::from_model_id(model_id).is_none() => {
                Err(format!("Unsupported image generation model: {model_id}"))
            }
            _ => Ok(()),
        }
    }

    fn resolve_family(&self) -> Result<ImageModelFamily, ImageGenerationError> {
        let model_id = self
            .model_id
            .as_deref()
            .ok_or_else(|| UninitializedFieldError::new("model_id"))?;
        ImageModelFamily::from_model_id(model_id)
            .ok_or_else(|| ImageGenerationError::UnsupportedModel(model_id.to_string()))
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
struct StableImageRequest<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    mode: &'a str,
    output_format: &'a str,
    seed: u32,
    negative_prompt: &'a str,
}

#[derive(Serialize, Debug)]
struct SdxlTextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Serialize, Debug)]
struct SdxlRequest<'a> {
    text_prompts: Vec<SdxlTextPrompt<'a>>,
    cfg_scale: f32,
    clip_guidance_preset: &'a str,
    sampler: &'a str,
    samples: u32,
    seed: u32,
    steps: u32,
    style_preset: &'a str,
    height: u32,
    width: u32,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanTextToImage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_text: Option<&'a str>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanImageConfig<'a> {
    quality: &'a str,
    number_of_images: u32,
    height: u32,
    width: u32,
    cfg_scale: f32,
    seed: u32,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TitanImageRequest<'a> {
    task_type: &'a str,
    text_to_image_params: TitanTextToImage<'a>,
    image_generation_config: TitanImageConfig<'a>,
}

/// Stable image and Titan responses
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ImagesResponse {
    images: Vec<String>,
    seeds: Vec<u64>,
    finish_reasons: Vec<Option<String>>,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    base64: Option<String>,
    seed: Option<u64>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}
