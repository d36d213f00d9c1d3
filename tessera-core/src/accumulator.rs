//! Folds a chunk stream into an `InvocationResult`
//!
//! Chunks must be pushed in arrival order. The first text delta fixes the time to first token,
//! the last content block stop (or the metadata chunk, when the endpoint sends no block stops)
//! fixes the time to last token. Usage and cost come from the metadata chunk; a stream without
//! one yields zero usage and zero cost.
use std::time::Duration;

use futures_util::{Stream, StreamExt as _};
use tokio::time::Instant;

use crate::invocation::{InvocationResult, StreamChunk, StreamMetadata, resolve_invoked_model};
use crate::pricing::Pricing;

#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    started_at: Instant,
    model_id: String,
    provider: String,
    pricing: Pricing,

    text: String,
    time_to_first_token: Option<Duration>,
    last_text: Option<Duration>,
    last_block_stop: Option<Duration>,
    metadata: Option<(StreamMetadata, Duration)>,
}

impl StreamAccumulator {
    pub fn new(
        started_at: Instant,
        model_id: impl Into<String>,
        provider: impl Into<String>,
        pricing: Pricing,
    ) -> Self {
        Self {
            started_at,
            model_id: model_id.into(),
            provider: provider.into(),
            pricing,
            text: String::new(),
            time_to_first_token: None,
            last_text: None,
            last_block_stop: None,
            metadata: None,
        }
    }

    /// Pushes a chunk that arrived just now
    pub fn push(&mut self, chunk: &StreamChunk) {
        let elapsed = self.started_at.elapsed();
        self.push_at(chunk, elapsed);
    }

    /// Pushes a chunk that arrived `elapsed` after the stream started
    pub fn push_at(&mut self, chunk: &StreamChunk, elapsed: Duration) {
        match chunk {
            StreamChunk::TextDelta(delta) => {
                self.time_to_first_token.get_or_insert(elapsed);
                self.last_text = Some(elapsed);
                self.text.push_str(delta);
            }
            StreamChunk::ContentBlockStop => {
                self.last_block_stop = Some(elapsed);
            }
            StreamChunk::Metadata(metadata) => {
                if self.metadata.is_some() {
                    tracing::warn!("Received more than one metadata chunk, keeping the last");
                }
                self.metadata = Some((metadata.clone(), elapsed));
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> InvocationResult {
        let metadata_arrival = self.metadata.as_ref().map(|(_, arrival)| *arrival);
        let time_to_last_token = self
            .last_block_stop
            .or(metadata_arrival)
            .or(self.last_text)
            .unwrap_or_else(|| self.started_at.elapsed());

        let (model_id, priced_as) = resolve_invoked_model(
            &self.model_id,
            self.metadata
                .as_ref()
                .and_then(|(metadata, _)| metadata.invoked_model_id.as_deref()),
        );

        let (input_tokens, output_tokens) = self
            .metadata
            .as_ref()
            .map_or((0, 0), |(metadata, _)| {
                (metadata.input_tokens, metadata.output_tokens)
            });

        let time_per_output_token = match (self.time_to_first_token, &self.metadata) {
            (Some(first), Some(_)) if output_tokens > 0 => {
                let intervals = u32::try_from(output_tokens.saturating_sub(1).max(1))
                    .unwrap_or(u32::MAX);
                Some(time_to_last_token.saturating_sub(first) / intervals)
            }
            _ => None,
        };

        let cost = self.pricing.cost(&priced_as, input_tokens, output_tokens);

        InvocationResult {
            text: self.text,
            input_tokens,
            output_tokens,
            time_to_first_token: self.time_to_first_token,
            time_to_last_token,
            time_per_output_token,
            input_cost: cost.input,
            output_cost: cost.output,
            total_cost: cost.total,
            model_id,
            provider: self.provider,
            degraded: false,
        }
    }

    /// Drives `stream` to completion, stamping every chunk as it arrives.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields
    pub async fn accumulate<S, E>(mut self, stream: S) -> Result<InvocationResult, E>
    where
        S: Stream<Item = Result<StreamChunk, E>>,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            self.push(&chunk?);
        }
        Ok(self.finish())
    }
}
