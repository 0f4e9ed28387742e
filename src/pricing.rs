//! LLM model pricing and cost calculation.
//!
//! Provides a built-in price table, a registry for custom per-model
//! overrides, and the lookup used by [`crate::session::Session::wrap`].
//! Prices are expressed in USD per million tokens.
//!
//! Resolution order for a model name:
//! 1. Custom pricing registered on the registry
//! 2. The built-in table
//! 3. Fuzzy match: strip trailing `-segment`s (date stamps, `-latest`, ...)
//!    and retry custom then built-in until something matches
//!
//! # Example
//!
//! ```rust
//! use agentbudget::pricing::PricingRegistry;
//!
//! let registry = PricingRegistry::new();
//! // dated variant resolves to the base model price
//! let dated = registry.calculate_llm_cost("gpt-4o-2099-01-01", 1000, 500).unwrap();
//! let base = registry.calculate_llm_cost("gpt-4o", 1000, 500).unwrap();
//! assert_eq!(dated, base);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pricing for a single LLM model, expressed in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per 1 000 000 input (prompt) tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per 1 000 000 output (completion) tokens in USD.
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    /// Creates pricing from per-million rates.
    pub const fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_million: input,
            output_cost_per_million: output,
        }
    }

    /// Cost of a call with the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million;
        input_cost + output_cost
    }
}

/// Built-in list prices.
const BUILTIN_PRICING: &[(&str, ModelPricing)] = &[
    // OpenAI
    ("gpt-4o", ModelPricing::per_million(2.50, 10.00)),
    ("gpt-4o-2024-11-20", ModelPricing::per_million(2.50, 10.00)),
    ("gpt-4o-2024-08-06", ModelPricing::per_million(2.50, 10.00)),
    ("gpt-4o-mini", ModelPricing::per_million(0.15, 0.60)),
    ("gpt-4o-mini-2024-07-18", ModelPricing::per_million(0.15, 0.60)),
    ("gpt-4.1", ModelPricing::per_million(2.00, 8.00)),
    ("gpt-4.1-mini", ModelPricing::per_million(0.40, 1.60)),
    ("gpt-4.1-nano", ModelPricing::per_million(0.10, 0.40)),
    ("gpt-4-turbo", ModelPricing::per_million(10.00, 30.00)),
    ("gpt-4-turbo-2024-04-09", ModelPricing::per_million(10.00, 30.00)),
    ("gpt-4", ModelPricing::per_million(30.00, 60.00)),
    ("gpt-3.5-turbo", ModelPricing::per_million(0.50, 1.50)),
    ("o1", ModelPricing::per_million(15.00, 60.00)),
    ("o1-mini", ModelPricing::per_million(3.00, 12.00)),
    ("o1-preview", ModelPricing::per_million(15.00, 60.00)),
    ("o3", ModelPricing::per_million(2.00, 8.00)),
    ("o3-mini", ModelPricing::per_million(1.10, 4.40)),
    ("o3-pro", ModelPricing::per_million(20.00, 80.00)),
    ("o4-mini", ModelPricing::per_million(1.10, 4.40)),
    // Anthropic
    ("claude-opus-4-6", ModelPricing::per_million(5.00, 25.00)),
    ("claude-opus-4-5", ModelPricing::per_million(5.00, 25.00)),
    ("claude-sonnet-4-5-20250929", ModelPricing::per_million(3.00, 15.00)),
    ("claude-sonnet-4", ModelPricing::per_million(3.00, 15.00)),
    ("claude-haiku-4-5-20251001", ModelPricing::per_million(1.00, 5.00)),
    ("claude-opus-4-20250514", ModelPricing::per_million(15.00, 75.00)),
    ("claude-3-5-sonnet-20241022", ModelPricing::per_million(3.00, 15.00)),
    ("claude-3-5-sonnet-20240620", ModelPricing::per_million(3.00, 15.00)),
    ("claude-3-5-haiku-20241022", ModelPricing::per_million(0.80, 4.00)),
    ("claude-3-opus-20240229", ModelPricing::per_million(15.00, 75.00)),
    ("claude-3-sonnet-20240229", ModelPricing::per_million(3.00, 15.00)),
    ("claude-3-haiku-20240307", ModelPricing::per_million(0.25, 1.25)),
    // Google Gemini
    ("gemini-2.5-pro", ModelPricing::per_million(1.25, 10.00)),
    ("gemini-2.5-flash", ModelPricing::per_million(0.30, 2.50)),
    ("gemini-2.5-flash-lite", ModelPricing::per_million(0.10, 0.40)),
    ("gemini-2.0-flash", ModelPricing::per_million(0.10, 0.40)),
    ("gemini-2.0-flash-lite", ModelPricing::per_million(0.075, 0.30)),
    ("gemini-1.5-pro", ModelPricing::per_million(1.25, 5.00)),
    ("gemini-1.5-pro-latest", ModelPricing::per_million(1.25, 5.00)),
    ("gemini-1.5-flash", ModelPricing::per_million(0.075, 0.30)),
    ("gemini-1.5-flash-latest", ModelPricing::per_million(0.075, 0.30)),
    ("gemini-1.0-pro", ModelPricing::per_million(0.50, 1.50)),
    // Mistral
    ("mistral-large-latest", ModelPricing::per_million(0.50, 1.50)),
    ("mistral-small-latest", ModelPricing::per_million(0.03, 0.11)),
    ("mistral-medium-latest", ModelPricing::per_million(0.40, 2.00)),
    ("codestral-latest", ModelPricing::per_million(0.30, 0.90)),
    ("open-mistral-nemo", ModelPricing::per_million(0.02, 0.04)),
    // Cohere
    ("command-r-plus", ModelPricing::per_million(2.50, 10.00)),
    ("command-r", ModelPricing::per_million(0.15, 0.60)),
    ("command-light", ModelPricing::per_million(0.30, 0.60)),
    ("command", ModelPricing::per_million(1.00, 2.00)),
];

static DEFAULT_PRICING: Lazy<HashMap<&'static str, ModelPricing>> =
    Lazy::new(|| BUILTIN_PRICING.iter().copied().collect());

static GLOBAL_REGISTRY: Lazy<Arc<PricingRegistry>> = Lazy::new(|| Arc::new(PricingRegistry::new()));

/// Returns the built-in price table.
pub fn default_pricing() -> &'static HashMap<&'static str, ModelPricing> {
    &DEFAULT_PRICING
}

/// Model price lookup with runtime overrides.
///
/// Overrides are guarded by an `RwLock`, so registration and lookup can
/// happen from any thread. Sessions hold an `Arc<PricingRegistry>`; the
/// process-wide instance from [`PricingRegistry::global`] is the default.
#[derive(Debug, Default)]
pub struct PricingRegistry {
    custom: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingRegistry {
    /// Creates a registry with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with overrides.
    pub fn with_pricing(custom: HashMap<String, ModelPricing>) -> Self {
        Self {
            custom: RwLock::new(custom),
        }
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<PricingRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    fn custom(&self) -> RwLockReadGuard<'_, HashMap<String, ModelPricing>> {
        self.custom.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers (or replaces) pricing for a model name, in USD per million tokens.
    pub fn register_model(
        &self,
        model: impl Into<String>,
        input_price_per_million: f64,
        output_price_per_million: f64,
    ) {
        let model = model.into();
        debug!(model = %model, "Registered custom model pricing");
        self.custom
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                model,
                ModelPricing::per_million(input_price_per_million, output_price_per_million),
            );
    }

    /// Registers pricing for several models at once.
    pub fn register_models<I, S>(&self, models: I)
    where
        I: IntoIterator<Item = (S, ModelPricing)>,
        S: Into<String>,
    {
        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        for (model, pricing) in models {
            custom.insert(model.into(), pricing);
        }
    }

    /// Looks up pricing for a model, falling back to fuzzy suffix matching.
    pub fn get_model_pricing(&self, model: &str) -> Option<ModelPricing> {
        let custom = self.custom();
        if let Some(p) = custom.get(model) {
            return Some(*p);
        }
        if let Some(p) = DEFAULT_PRICING.get(model) {
            return Some(*p);
        }
        fuzzy_match(&custom, model)
    }

    /// Cost of an LLM call in USD, or `None` when the model is unknown.
    pub fn calculate_llm_cost(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Option<f64> {
        self.get_model_pricing(model)
            .map(|p| p.cost(input_tokens, output_tokens))
    }
}

/// Tries progressively shorter prefixes of `model`, stripping one trailing
/// hyphen-delimited segment at a time.
fn fuzzy_match(custom: &HashMap<String, ModelPricing>, model: &str) -> Option<ModelPricing> {
    let mut prefix = model;
    while let Some((head, _)) = prefix.rsplit_once('-') {
        if let Some(p) = custom.get(head) {
            return Some(*p);
        }
        if let Some(p) = DEFAULT_PRICING.get(head) {
            return Some(*p);
        }
        prefix = head;
    }
    None
}
