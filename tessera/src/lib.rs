// show feature flags in the generated documentation
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
//! # Tessera
//!
//! Tessera invokes foundation models on AWS Bedrock (and the Anthropic API) with typed,
//! multimodal prompts, and tells you what every call cost.
//!
//! A prompt is a list of fragments: text, images, documents and video, from bytes, local files or
//! s3. The [`ModelInvoker`] encodes them for the endpoint, retries throttling with exponential
//! backoff, prices the usage against a pricing catalog, and records every invocation into a
//! metrics file through an [`ObservabilityRecorder`]. Streamed and non-streamed invocations
//! return the same [`InvocationResult`].
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tessera::{ContentEncoder, InvocationRequest, ModelInvoker, ObservabilityRecorder, PromptFragment};
//! # use tessera::integrations::{aws_bedrock::AwsBedrock, s3::S3ContentFetcher};
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let recorder = Arc::new(ObservabilityRecorder::new("metrics.jsonl").await);
//!
//! let invoker = ModelInvoker::builder()
//!     .backend(AwsBedrock::builder().build()?)
//!     .default_model_id("anthropic.claude-3-haiku-20240307-v1:0")
//!     .encoder(ContentEncoder::new().with_fetcher(S3ContentFetcher::builder().build()?))
//!     .recorder(recorder)
//!     .build()?;
//!
//! let request = InvocationRequest::builder()
//!     .fragment("Summarize this report in three sentences")
//!     .fragment(PromptFragment::document("s3://reports/2024/q1.pdf"))
//!     .label("summarize_report")
//!     .build()?;
//!
//! let result = invoker.invoke(&request).await?;
//! println!("{} ({} tokens, ${:.5})", result.text, result.total_tokens(), result.total_cost);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! Bedrock, s3 and metrics are enabled by default.
#![doc = document_features::document_features!()]

#[doc(inline)]
pub use tessera_core::*;

/// Model backends and content fetchers for external services.
pub mod integrations {
    #[doc(inline)]
    pub use tessera_integrations::*;
}
