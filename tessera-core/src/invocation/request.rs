use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::{PromptFragment, errors::ConstructionError};

/// Generation parameters sent along with every call
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.6,
            top_p: 0.5,
        }
    }
}

/// A single call to a model. Immutable once built.
///
/// ```
/// # use tessera_core::{InvocationRequest, PromptFragment};
/// let request = InvocationRequest::builder()
///     .fragments(vec![PromptFragment::text("Summarize this")])
///     .system("Be brief")
///     .build()
///     .unwrap();
///
/// assert_eq!(request.fragments().len(), 1);
/// ```
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(
    setter(into, strip_option),
    build_fn(error = "ConstructionError", validate = "Self::validate")
)]
pub struct InvocationRequest {
    fragments: Vec<PromptFragment>,
    #[builder(default)]
    system: Option<String>,
    #[builder(default)]
    inference: InferenceConfig,
    /// Overrides the default model of the invoker
    #[builder(default)]
    model_id: Option<String>,
    /// Function name reported to the observability recorder
    #[builder(default)]
    label: Option<String>,
}

impl InvocationRequest {
    pub fn builder() -> InvocationRequestBuilder {
        InvocationRequestBuilder::default()
    }

    /// Shorthand for a request with a single text fragment and default parameters
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![PromptFragment::Text(text.into())],
            system: None,
            inference: InferenceConfig::default(),
            model_id: None,
            label: None,
        }
    }

    pub fn fragments(&self) -> &[PromptFragment] {
        &self.fragments
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn inference(&self) -> &InferenceConfig {
        &self.inference
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl InvocationRequestBuilder {
    /// Adds a single fragment
    pub fn fragment(&mut self, fragment: impl Into<PromptFragment>) -> &mut Self {
        self.fragments
            .get_or_insert_with(Vec::new)
            .push(fragment.into());
        self
    }

    fn validate(&self) -> Result<(), ConstructionError> {
        match &self.fragments {
            Some(fragments) if !fragments.is_empty() => Ok(()),
            _ => Err(ConstructionError::NoFragments),
        }
    }
}
