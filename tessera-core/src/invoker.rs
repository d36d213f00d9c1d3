//! Invokes a model through a `ModelBackend`
//!
//! The invoker encodes a request, calls the backend with bounded retries on throttling, prices
//! the usage and hands the normalized result to the observability recorder.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accumulator::StreamAccumulator;
use crate::encoding::ContentEncoder;
use crate::invocation::{
    BackendResponse, EncodedRequest, InvocationRequest, InvocationResult, ModelBackend,
    errors::{ConstructionError, InvocationError},
    resolve_invoked_model,
};
use crate::invocation_stream::InvocationStream;
use crate::observability::ObservabilityRecorder;
use crate::pricing::{PriceOverride, Pricing, PricingCatalog};
use crate::retry::{ExhaustionPolicy, RetryConfig, RetryOutcome, retry_throttled};
use crate::util::debug_long_utf8;

/// Function name recorded for `invoke` unless the request carries a label
pub const INVOKE_LABEL: &str = "invoke";
/// Function name recorded for streamed invocations unless the request carries a label
pub const INVOKE_STREAM_LABEL: &str = "invoke_stream";

/// Invokes models on a single backend.
///
/// ```no_run
/// # use tessera_core::{ModelInvoker, InvocationRequest, ModelBackend};
/// # async fn run(backend: impl ModelBackend + 'static) -> anyhow::Result<()> {
/// let invoker = ModelInvoker::builder()
///     .backend(backend)
///     .default_model_id("anthropic.claude-3-haiku-20240307-v1:0")
///     .build()?;
///
/// let result = invoker.invoke(&InvocationRequest::from_text("Hello")).await?;
/// println!("{} ({} dollars)", result.text, result.total_cost);
/// # Ok(())
/// # }
/// ```
#[derive(Builder, Clone, Debug)]
#[builder(setter(into, strip_option), build_fn(error = "ConstructionError"))]
pub struct ModelInvoker {
    #[builder(setter(custom))]
    backend: Arc<dyn ModelBackend>,
    /// Used when a request does not name a model
    default_model_id: String,
    #[builder(default)]
    encoder: ContentEncoder,
    #[builder(default = "PricingCatalog::bundled()")]
    catalog: Arc<PricingCatalog>,
    /// Wins over the catalog, per price
    #[builder(default)]
    price_override: PriceOverride,
    #[builder(default)]
    retry: RetryConfig,
    /// Bounds a whole invocation, backoff included
    #[builder(default)]
    deadline: Option<Duration>,
    #[builder(default, setter(custom))]
    recorder: Option<Arc<ObservabilityRecorder>>,
}

impl ModelInvokerBuilder {
    pub fn backend(&mut self, backend: impl ModelBackend + 'static) -> &mut Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(&mut self, backend: Arc<dyn ModelBackend>) -> &mut Self {
        self.backend = Some(backend);
        self
    }

    pub fn recorder(&mut self, recorder: Arc<ObservabilityRecorder>) -> &mut Self {
        self.recorder = Some(Some(recorder));
        self
    }
}

impl ModelInvoker {
    pub fn builder() -> ModelInvokerBuilder {
        ModelInvokerBuilder::default()
    }

    pub fn default_model_id(&self) -> &str {
        &self.default_model_id
    }

    pub fn provider(&self) -> String {
        self.backend.provider()
    }

    pub fn pricing(&self) -> Pricing {
        Pricing::new(Arc::clone(&self.catalog), self.price_override)
    }

    /// Encodes a request without sending it
    ///
    /// # Errors
    ///
    /// Errors if any fragment cannot be encoded
    pub async fn encode(
        &self,
        request: &InvocationRequest,
    ) -> Result<EncodedRequest, ConstructionError> {
        self.encoder.encode(request, &self.default_model_id).await
    }

    /// Invokes the model and waits for the complete response.
    ///
    /// Throttling is retried with exponential backoff. When every attempt is throttled the
    /// configured `ExhaustionPolicy` decides between a degraded result and an error.
    ///
    /// # Errors
    ///
    /// Errors if the request cannot be encoded, the backend fails with anything but throttling,
    /// the deadline passes, or retries are exhausted with `ExhaustionPolicy::Fail`
    #[tracing::instrument(skip_all, err)]
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvocationError> {
        self.within_deadline(self.invoke_unbounded(request)).await
    }

    /// Like `invoke`, but stops as soon as `cancel` is cancelled
    ///
    /// # Errors
    ///
    /// See `invoke`; additionally `InvocationError::Cancelled`
    pub async fn invoke_cancellable(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, InvocationError> {
        tokio::select! {
            result = self.invoke(request) => result,
            () = cancel.cancelled() => Err(InvocationError::Cancelled),
        }
    }

    /// Opens a response stream.
    ///
    /// Throttling while opening the stream is retried like `invoke`. Once chunks flow, errors
    /// end the stream and are not retried.
    ///
    /// # Errors
    ///
    /// Errors if the request cannot be encoded or the stream cannot be opened
    #[tracing::instrument(skip_all, err)]
    pub async fn invoke_streaming(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationStream, InvocationError> {
        let Some(deadline) = self.deadline else {
            return self.open_stream(request).await;
        };

        let expires_at = Instant::now() + deadline;
        let stream = tokio::time::timeout_at(expires_at, self.open_stream(request))
            .await
            .map_err(|_| InvocationError::DeadlineExceeded(deadline))??;

        Ok(stream.with_deadline(Box::pin(tokio::time::sleep_until(expires_at)), deadline))
    }

    /// Streams the response and folds it into a result
    ///
    /// # Errors
    ///
    /// Errors if the stream cannot be opened or yields an error
    pub async fn invoke_stream_parsed(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvocationError> {
        self.invoke_streaming(request).await?.into_result().await
    }

    /// Like `invoke_stream_parsed`, but stops as soon as `cancel` is cancelled
    ///
    /// # Errors
    ///
    /// See `invoke_stream_parsed`; additionally `InvocationError::Cancelled`
    pub async fn invoke_stream_parsed_cancellable(
        &self,
        request: &InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<InvocationResult, InvocationError> {
        tokio::select! {
            result = self.invoke_stream_parsed(request) => result,
            () = cancel.cancelled() => Err(InvocationError::Cancelled),
        }
    }

    async fn within_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, InvocationError>>,
    ) -> Result<T, InvocationError> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| InvocationError::DeadlineExceeded(deadline))?,
            None => fut.await,
        }
    }

    async fn invoke_unbounded(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, InvocationError> {
        let encoded = self.encode(request).await?;
        let label = request.label().unwrap_or(INVOKE_LABEL);
        let provider = self.backend.provider();

        tracing::debug!(
            model_id = encoded.model_id.as_str(),
            provider = provider.as_str(),
            label,
            "Invoking model"
        );

        let backend = &self.backend;
        let encoded_ref = &encoded;
        let outcome = retry_throttled(&self.retry, move || async move {
            let started = Instant::now();
            backend
                .converse(encoded_ref)
                .await
                .map(|response| (response, started.elapsed()))
        })
        .await;

        let result = match outcome {
            RetryOutcome::Succeeded((response, elapsed)) => {
                self.to_result(&encoded.model_id, provider, response, elapsed)
            }
            RetryOutcome::Failed(err) => return Err(err.into()),
            RetryOutcome::Exhausted { attempts } => {
                self.exhausted(&encoded.model_id, provider, attempts)?
            }
        };

        tracing::debug!(
            text = %debug_long_utf8(&result.text, 100),
            input_tokens = result.input_tokens,
            output_tokens = result.output_tokens,
            total_cost = result.total_cost,
            "Invocation finished"
        );

        self.record(label, &result).await;
        Ok(result)
    }

    async fn open_stream(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationStream, InvocationError> {
        let encoded = self.encode(request).await?;
        let label = request.label().unwrap_or(INVOKE_STREAM_LABEL);
        let provider = self.backend.provider();

        tracing::debug!(
            model_id = encoded.model_id.as_str(),
            provider = provider.as_str(),
            label,
            "Opening model stream"
        );

        let backend = &self.backend;
        let encoded_ref = &encoded;
        let outcome = retry_throttled(&self.retry, move || async move {
            let started = Instant::now();
            backend
                .converse_stream(encoded_ref)
                .await
                .map(|stream| (stream, started))
        })
        .await;

        let stream = match outcome {
            RetryOutcome::Succeeded((inner, started)) => InvocationStream::new(
                inner,
                StreamAccumulator::new(started, encoded.model_id, provider, self.pricing()),
                label,
            ),
            RetryOutcome::Failed(err) => return Err(err.into()),
            RetryOutcome::Exhausted { attempts } => InvocationStream::settled(
                self.exhausted(&encoded.model_id, provider, attempts)?,
                label,
            ),
        };

        Ok(stream.with_recorder(self.recorder.clone()))
    }

    fn to_result(
        &self,
        model_id: &str,
        provider: String,
        response: BackendResponse,
        elapsed: Duration,
    ) -> InvocationResult {
        let (model_id, priced_as) =
            resolve_invoked_model(model_id, response.invoked_model_id.as_deref());
        let cost =
            self.pricing()
                .cost(&priced_as, response.input_tokens, response.output_tokens);

        if let Some(latency) = response.latency {
            tracing::debug!(
                latency_ms = latency.as_millis(),
                stop_reason = response.stop_reason.as_deref(),
                "Endpoint reported latency"
            );
        }

        InvocationResult {
            text: response.text,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            time_to_first_token: None,
            time_to_last_token: elapsed,
            time_per_output_token: None,
            input_cost: cost.input,
            output_cost: cost.output,
            total_cost: cost.total,
            model_id,
            provider,
            degraded: false,
        }
    }

    fn exhausted(
        &self,
        model_id: &str,
        provider: String,
        attempts: u32,
    ) -> Result<InvocationResult, InvocationError> {
        match self.retry.on_exhausted {
            ExhaustionPolicy::Degrade => {
                tracing::warn!(
                    attempts,
                    model_id,
                    "Still throttled after all attempts, returning an empty result"
                );
                Ok(InvocationResult::degraded(model_id, provider, Duration::ZERO))
            }
            ExhaustionPolicy::Fail => Err(InvocationError::RetriesExhausted { attempts }),
        }
    }

    async fn record(&self, label: &str, result: &InvocationResult) {
        if let Some(recorder) = &self.recorder {
            recorder.record(label, &result.model_id, result).await;
        }
    }
}
