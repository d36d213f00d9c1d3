use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{duration_secs, option_duration_secs};

/// The normalized outcome of an invocation, identical in shape for the synchronous and the
/// streaming path.
///
/// `total_cost` is always `input_cost + output_cost`. `time_to_first_token` is only known when
/// the response was streamed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(with = "option_duration_secs")]
    pub time_to_first_token: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub time_to_last_token: Duration,
    #[serde(with = "option_duration_secs")]
    pub time_per_output_token: Option<Duration>,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub model_id: String,
    pub provider: String,
    /// Set when retries were exhausted and an empty result was returned instead of an error
    #[serde(default)]
    pub degraded: bool,
}

impl InvocationResult {
    /// Empty text, zero usage, zero cost
    pub fn degraded(
        model_id: impl Into<String>,
        provider: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            provider: provider.into(),
            time_to_last_token: elapsed,
            degraded: true,
            ..Default::default()
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Resolves the model a result is reported and priced under.
///
/// When a prompt router dispatched the call, the endpoint reports the model it actually invoked,
/// usually as an arn. The result is then reported as `prompt-router:<model>` and priced as
/// `<model>`. Returns `(reported, priced)`.
///
/// ```
/// # use tessera_core::resolve_invoked_model;
/// let (reported, priced) = resolve_invoked_model(
///     "arn:aws:bedrock:us-east-1:123456789012:default-prompt-router/anthropic.claude:1",
///     Some("arn:aws:bedrock:us-east-1::foundation-model/anthropic.claude-3-haiku-20240307-v1:0"),
/// );
/// assert_eq!(reported, "prompt-router:anthropic.claude-3-haiku-20240307-v1:0");
/// assert_eq!(priced, "anthropic.claude-3-haiku-20240307-v1:0");
/// ```
pub fn resolve_invoked_model(requested: &str, invoked: Option<&str>) -> (String, String) {
    match invoked.filter(|invoked| !invoked.is_empty()) {
        Some(invoked) => {
            let model = invoked.rsplit('/').next().unwrap_or(invoked);
            (format!("prompt-router:{model}"), model.to_string())
        }
        None => (requested.to_string(), requested.to_string()),
    }
}

/// Token usage priced per 1000 tokens
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

impl Cost {
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(
        input_tokens: u64,
        output_tokens: u64,
        input_per_1k: f64,
        output_per_1k: f64,
    ) -> Self {
        let input = input_tokens as f64 / 1000.0 * input_per_1k;
        let output = output_tokens as f64 / 1000.0 * output_per_1k;
        Self {
            input,
            output,
            total: input + output,
        }
    }
}
