//! Core data types: cost categories and cost events.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category of a cost event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostType {
    /// A metered LLM call priced from token usage.
    Llm,
    /// Any other billed action with an explicit cost.
    Tool,
}

impl CostType {
    /// Wire name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Llm => "llm",
            CostType::Tool => "tool",
        }
    }
}

/// A single costed action within a session.
///
/// Events are built once when they are recorded and never mutated afterwards.
/// Optional fields are omitted from the serialized form when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    /// Cost in currency units (USD). Never negative.
    pub cost: f64,
    pub cost_type: CostType,
    /// Unix timestamp in seconds (fractional) at creation.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl CostEvent {
    /// Creates an LLM event for a priced model call.
    pub fn llm(cost: f64, model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            cost,
            cost_type: CostType::Llm,
            timestamp: unix_timestamp(),
            model: Some(model.into()),
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            tool_name: None,
            metadata: None,
        }
    }

    /// Creates a tool event with an explicit cost.
    pub fn tool(cost: f64, tool_name: Option<String>, metadata: Option<Map<String, Value>>) -> Self {
        Self {
            cost,
            cost_type: CostType::Tool,
            timestamp: unix_timestamp(),
            model: None,
            input_tokens: None,
            output_tokens: None,
            tool_name,
            metadata,
        }
    }

    /// The name used to group this event in breakdowns and to key loop
    /// detection: the model for LLM events, the tool name for tool events.
    pub fn discriminator(&self) -> Option<&str> {
        match self.cost_type {
            CostType::Llm => self.model.as_deref(),
            CostType::Tool => self.tool_name.as_deref(),
        }
    }
}

/// Generates a unique session ID of the form `sess_<12 hex chars>`.
pub fn generate_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("sess_{}", &hex[..12])
}

/// Rounds a currency amount to 6 decimal places for display.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Current wall-clock time as fractional Unix seconds.
pub(crate) fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
