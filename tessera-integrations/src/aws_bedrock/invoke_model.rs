//! Raw `InvokeModel` calls, shared by the image and embedding models
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::Blob;
use tessera_core::BackendError;
use tokio::runtime::Handle;

#[cfg(test)]
use mockall::automock;

use super::convert::classify_error;

/// Sends a json body to a model and returns the json it answers with
#[cfg_attr(test, automock)]
#[async_trait]
pub(super) trait BedrockPrompt: std::fmt::Debug + Send + Sync {
    async fn prompt_u8(&self, model_id: &str, blob: Blob) -> Result<Vec<u8>, BackendError>;
}

#[async_trait]
impl BedrockPrompt for Client {
    async fn prompt_u8(&self, model_id: &str, blob: Blob) -> Result<Vec<u8>, BackendError> {
        let response = self
            .invoke_model()
            .body(blob)
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .send()
            .await
            .map_err(classify_error)?;

        Ok(response.body.into_inner())
    }
}

/// A client configured from the environment, with the sdk's own retries disabled
pub(super) fn client_from_env() -> Arc<dyn BedrockPrompt> {
    let config = tokio::task::block_in_place(|| {
        Handle::current().block_on(async {
            aws_config::from_env()
                .retry_config(aws_config::retry::RetryConfig::disabled())
                .load()
                .await
        })
    });
    Arc::new(Client::new(&config))
}
