//! Top-level factory for budget-enforced sessions.
//!
//! [`AgentBudget`] carries the settings (dollar cap, soft limit, loop
//! thresholds, callbacks) and stamps out independent [`Session`]s.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{
    validate_soft_limit_fraction, CircuitBreaker, LoopDetectorConfig, DEFAULT_SOFT_LIMIT_FRACTION,
};
use crate::config::BudgetConfig;
use crate::error::{BudgetError, Result};
use crate::ledger::Ledger;
use crate::pricing::PricingRegistry;
use crate::report::SessionReport;
use crate::session::{ReportCallback, Session, SessionBuilder, SessionCallbacks};
use crate::webhook::WebhookEmitter;

/// A budget amount as written by a user: `"$5.00"` or `5.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BudgetValue {
    Amount(f64),
    Text(String),
}

impl fmt::Display for BudgetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetValue::Amount(n) => write!(f, "{}", n),
            BudgetValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for BudgetValue {
    fn from(value: f64) -> Self {
        BudgetValue::Amount(value)
    }
}

impl From<u32> for BudgetValue {
    fn from(value: u32) -> Self {
        BudgetValue::Amount(f64::from(value))
    }
}

impl From<i32> for BudgetValue {
    fn from(value: i32) -> Self {
        BudgetValue::Amount(f64::from(value))
    }
}

impl From<&str> for BudgetValue {
    fn from(value: &str) -> Self {
        BudgetValue::Text(value.to_string())
    }
}

impl From<String> for BudgetValue {
    fn from(value: String) -> Self {
        BudgetValue::Text(value)
    }
}

/// Parses a budget into dollars.
///
/// Accepts `"$5.00"`, `"$5"`, `"5.00"`, `"5"` (surrounding whitespace and a
/// space after `$` are tolerated) and plain numbers. Zero, negative,
/// non-finite or unparsable values are rejected with
/// [`BudgetError::InvalidBudget`] carrying the raw input.
pub fn parse_budget(value: impl Into<BudgetValue>) -> Result<f64> {
    let value = value.into();
    let amount = match &value {
        BudgetValue::Amount(n) => *n,
        BudgetValue::Text(s) => {
            let cleaned = s.trim().trim_start_matches('$').trim();
            cleaned
                .parse::<f64>()
                .map_err(|_| BudgetError::InvalidBudget(s.clone()))?
        }
    };

    if !amount.is_finite() || amount <= 0.0 {
        return Err(BudgetError::InvalidBudget(value.to_string()));
    }
    Ok(amount)
}

/// Creates budget-enforced agent sessions.
#[derive(Clone)]
pub struct AgentBudget {
    max_spend: f64,
    soft_limit: f64,
    loop_config: LoopDetectorConfig,
    callbacks: SessionCallbacks,
    webhook: Option<Arc<WebhookEmitter>>,
    pricing: Option<Arc<PricingRegistry>>,
}

impl fmt::Debug for AgentBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBudget")
            .field("max_spend", &self.max_spend)
            .field("soft_limit", &self.soft_limit)
            .field("loop_config", &self.loop_config)
            .field("callbacks", &self.callbacks)
            .field("webhook", &self.webhook.as_ref().map(|w| w.url().to_string()))
            .finish()
    }
}

impl AgentBudget {
    /// Creates a factory with default soft limit and loop thresholds.
    pub fn new(max_spend: impl Into<BudgetValue>) -> Result<Self> {
        Ok(Self {
            max_spend: parse_budget(max_spend)?,
            soft_limit: DEFAULT_SOFT_LIMIT_FRACTION,
            loop_config: LoopDetectorConfig::default(),
            callbacks: SessionCallbacks::default(),
            webhook: None,
            pricing: None,
        })
    }

    /// Creates a factory from loaded configuration.
    ///
    /// Custom model prices in the config are registered in a private pricing
    /// registry so they do not leak into other budgets.
    pub fn from_config(config: &BudgetConfig) -> Result<Self> {
        config.validate()?;
        let mut budget = Self::new(config.max_spend.clone())?
            .with_soft_limit(config.soft_limit)?
            .with_loop_config(LoopDetectorConfig::new(
                config.max_repeated_calls,
                config.loop_window_seconds,
            ));

        if !config.pricing.is_empty() {
            budget = budget.with_pricing(Arc::new(PricingRegistry::with_pricing(
                config.pricing.clone(),
            )));
        }

        if let Some(url) = &config.webhook_url {
            let emitter = WebhookEmitter::with_timeout(url.clone(), config.webhook_timeout())?;
            budget = budget.with_webhook_emitter(emitter);
        }
        Ok(budget)
    }

    /// Fraction of the budget (0, 1] at which the soft-limit warning fires.
    ///
    /// Values outside that range, NaN included, are a [`BudgetError::Config`].
    pub fn with_soft_limit(mut self, fraction: f64) -> Result<Self> {
        validate_soft_limit_fraction(fraction)?;
        self.soft_limit = fraction;
        Ok(self)
    }

    pub fn with_loop_config(mut self, config: LoopDetectorConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn on_soft_limit<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionReport) + Send + Sync + 'static,
    {
        self.callbacks.on_soft_limit = Some(Arc::new(f));
        self
    }

    pub fn on_hard_limit<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionReport) + Send + Sync + 'static,
    {
        self.callbacks.on_hard_limit = Some(Arc::new(f));
        self
    }

    pub fn on_loop_detected<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionReport) + Send + Sync + 'static,
    {
        self.callbacks.on_loop_detected = Some(Arc::new(f));
        self
    }

    /// Streams soft-limit, hard-limit and loop events to a webhook URL.
    pub fn with_webhook(self, url: impl Into<String>) -> Result<Self> {
        Ok(self.with_webhook_emitter(WebhookEmitter::new(url)?))
    }

    pub fn with_webhook_emitter(mut self, emitter: WebhookEmitter) -> Self {
        self.webhook = Some(Arc::new(emitter));
        self
    }

    /// Prices LLM calls with `pricing` instead of the global registry.
    pub fn with_pricing(mut self, pricing: Arc<PricingRegistry>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn max_spend(&self) -> f64 {
        self.max_spend
    }

    pub fn soft_limit(&self) -> f64 {
        self.soft_limit
    }

    pub fn loop_config(&self) -> &LoopDetectorConfig {
        &self.loop_config
    }

    /// Creates a new session with its own ledger and circuit breaker.
    pub fn session(&self, session_id: Option<&str>) -> Session {
        let breaker = CircuitBreaker::new(self.soft_limit, self.loop_config);
        let mut builder = SessionBuilder::new(Ledger::new(self.max_spend))
            .circuit_breaker(breaker)
            .callbacks(self.session_callbacks());
        if let Some(id) = session_id {
            builder = builder.session_id(id);
        }
        if let Some(pricing) = &self.pricing {
            builder = builder.pricing(Arc::clone(pricing));
        }
        builder.build()
    }

    fn session_callbacks(&self) -> SessionCallbacks {
        let Some(webhook) = &self.webhook else {
            return self.callbacks.clone();
        };
        SessionCallbacks {
            on_soft_limit: chain(
                self.callbacks.on_soft_limit.clone(),
                webhook.callback("soft_limit"),
            ),
            on_hard_limit: chain(
                self.callbacks.on_hard_limit.clone(),
                webhook.callback("hard_limit"),
            ),
            on_loop_detected: chain(
                self.callbacks.on_loop_detected.clone(),
                webhook.callback("loop_detected"),
            ),
        }
    }
}

/// Runs the user callback first, then the webhook forwarder.
fn chain(user: Option<ReportCallback>, forward: ReportCallback) -> Option<ReportCallback> {
    match user {
        Some(user) => Some(Arc::new(move |report: &SessionReport| {
            user(report);
            forward(report);
        })),
        None => Some(forward),
    }
}
