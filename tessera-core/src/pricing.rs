//! Per-model token prices
//!
//! A catalog maps model ids to prices per 1000 input and output tokens. A bundled catalog is
//! compiled into the crate; an external one can be loaded from disk. Pricing is best effort:
//! unknown models cost nothing and an unreadable catalog is treated as empty.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::invocation::Cost;

const BUNDLED_PRICING: &str = include_str!("../resources/pricing.json");

/// Cross-region inference profiles prefix the foundation model id
const REGION_PREFIXES: [&str; 5] = ["us.", "eu.", "apac.", "au.", "global."];

lazy_static::lazy_static! {
    static ref BUNDLED: Arc<PricingCatalog> = Arc::new(
        PricingCatalog::from_json(BUNDLED_PRICING).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Bundled pricing catalog is malformed, all prices are 0");
            PricingCatalog::default()
        }),
    );
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Caller supplied prices. Each one, when set, wins over the catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub input_per_1k: Option<f64>,
    pub output_per_1k: Option<f64>,
}

impl PriceOverride {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k: Some(input_per_1k),
            output_per_1k: Some(output_per_1k),
        }
    }

    pub fn apply(&self, price: ModelPrice) -> ModelPrice {
        ModelPrice {
            input_per_1k: self.input_per_1k.unwrap_or(price.input_per_1k),
            output_per_1k: self.output_per_1k.unwrap_or(price.output_per_1k),
        }
    }
}

#[derive(Deserialize)]
struct PricingFile {
    #[serde(default)]
    version: Option<String>,
    models: Vec<PricingEntry>,
}

#[derive(Deserialize)]
struct PricingEntry {
    model_name: String,
    input_price_per_k_tokens: f64,
    output_price_per_k_tokens: f64,
}

/// Read-only after construction; share it behind an `Arc`
#[derive(Clone, Debug, Default)]
pub struct PricingCatalog {
    version: Option<String>,
    prices: HashMap<String, ModelPrice>,
}

impl PricingCatalog {
    /// The catalog bundled with this crate, parsed once
    pub fn bundled() -> Arc<PricingCatalog> {
        Arc::clone(&BUNDLED)
    }

    /// Parses a pricing table
    ///
    /// # Errors
    ///
    /// Errors if the json is malformed
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: PricingFile = serde_json::from_str(json)?;

        let prices = file
            .models
            .into_iter()
            .map(|entry| {
                (
                    entry.model_name,
                    ModelPrice {
                        input_per_1k: entry.input_price_per_k_tokens,
                        output_per_1k: entry.output_price_per_k_tokens,
                    },
                )
            })
            .collect();

        Ok(Self {
            version: file.version,
            prices,
        })
    }

    /// Loads a pricing table from disk. A missing or malformed file yields an empty catalog.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let json = match fs_err::tokio::read_to_string(path).await {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "Could not read pricing catalog, all prices are 0");
                return Self::default();
            }
        };

        Self::from_json(&json).unwrap_or_else(|err| {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Malformed pricing catalog, all prices are 0"
            );
            Self::default()
        })
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn get(&self, model: &str) -> Option<ModelPrice> {
        if let Some(price) = self.prices.get(model) {
            return Some(*price);
        }

        REGION_PREFIXES
            .iter()
            .find_map(|prefix| model.strip_prefix(prefix))
            .and_then(|stripped| self.prices.get(stripped))
            .copied()
    }

    /// Price for a model, zero if it is not in the catalog
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.get(model).unwrap_or_default()
    }
}

/// The catalog combined with caller overrides
#[derive(Clone, Debug)]
pub struct Pricing {
    catalog: Arc<PricingCatalog>,
    overrides: PriceOverride,
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(PricingCatalog::bundled(), PriceOverride::default())
    }
}

impl Pricing {
    pub fn new(catalog: Arc<PricingCatalog>, overrides: PriceOverride) -> Self {
        Self { catalog, overrides }
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.overrides.apply(self.catalog.price_for(model))
    }

    pub fn cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Cost {
        let price = self.price_for(model);
        Cost::compute(
            input_tokens,
            output_tokens,
            price.input_per_1k,
            price.output_per_1k,
        )
    }
}
