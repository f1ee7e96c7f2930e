//! Built-in pricing table for the supported models.
//!
//! Prices are per 1 million tokens. Each model carries an input, output,
//! and cached-input rate. Custom pricing can be added at runtime from
//! TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M uncached input tokens.
    pub input_per_m: f64,
    /// Price per 1M output tokens.
    pub output_per_m: f64,
    /// Price per 1M cache-hit input tokens.
    pub cached_input_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64, cached_input_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cached_input_per_m,
        }
    }

    /// Compute raw (unrounded) cost for the given token counts.
    ///
    /// Cached tokens are a subset of input tokens, so cached count is
    /// deducted from the input count before the uncached rate applies.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32, cached_input_tokens: u32) -> f64 {
        let billable_input = input_tokens.saturating_sub(cached_input_tokens);
        (billable_input as f64 / 1_000_000.0) * self.input_per_m
            + (cached_input_tokens as f64 / 1_000_000.0) * self.cached_input_per_m
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_m
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
    fallback: ModelPricing,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    ///
    /// Unknown models fall back to the `deepseek-chat` rates rather than
    /// pricing at zero, so misreported model ids never hide spend.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        prices.insert("deepseek-chat".into(), ModelPricing::new(1.0, 2.0, 0.1));
        prices.insert("deepseek-reasoner".into(), ModelPricing::new(4.0, 16.0, 0.4));

        Self {
            prices: RwLock::new(prices),
            fallback: ModelPricing::new(1.0, 2.0, 0.1),
        }
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap();
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap();
        prices.insert(model.into(), pricing);
    }

    /// Resolve pricing for a model, falling back to default rates when the
    /// model is unknown.
    pub fn resolve(&self, model: &str) -> ModelPricing {
        self.get(model).unwrap_or(self.fallback)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap();
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
