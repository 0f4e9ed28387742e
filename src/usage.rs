//! Token usage extraction from LLM responses.
//!
//! Providers disagree on field names: OpenAI reports
//! `usage.prompt_tokens` / `usage.completion_tokens`, Anthropic reports
//! `usage.input_tokens` / `usage.output_tokens`. Each naming scheme is a
//! [`UsageConvention`]; extraction looks for a `usage` object and then asks
//! the conventions in order, field by field.
//!
//! Typed SDK responses can skip the probing entirely by implementing
//! [`MeteredResponse`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Model and token counts pulled out of one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LlmUsage {
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
        }
    }
}

/// One provider's naming scheme for token counts inside a `usage` object.
pub trait UsageConvention: Send + Sync {
    /// Short provider name, for logs.
    fn name(&self) -> &'static str;

    /// Input (prompt) tokens, if this convention's field is present.
    fn input_tokens(&self, usage: &Map<String, Value>) -> Option<u64>;

    /// Output (completion) tokens, if this convention's field is present.
    fn output_tokens(&self, usage: &Map<String, Value>) -> Option<u64>;
}

/// `prompt_tokens` / `completion_tokens`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiConvention;

impl UsageConvention for OpenAiConvention {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn input_tokens(&self, usage: &Map<String, Value>) -> Option<u64> {
        usage.get("prompt_tokens").and_then(Value::as_u64)
    }

    fn output_tokens(&self, usage: &Map<String, Value>) -> Option<u64> {
        usage.get("completion_tokens").and_then(Value::as_u64)
    }
}

/// `input_tokens` / `output_tokens`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicConvention;

impl UsageConvention for AnthropicConvention {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn input_tokens(&self, usage: &Map<String, Value>) -> Option<u64> {
        usage.get("input_tokens").and_then(Value::as_u64)
    }

    fn output_tokens(&self, usage: &Map<String, Value>) -> Option<u64> {
        usage.get("output_tokens").and_then(Value::as_u64)
    }
}

/// Conventions in the order they are tried.
pub static CONVENTIONS: &[&dyn UsageConvention] = &[&OpenAiConvention, &AnthropicConvention];

/// Extracts model and token usage from a JSON response.
///
/// Returns `None` unless the value has a string `model`, a `usage` object,
/// and both token counts resolve under some convention. Each count falls
/// back independently, so a mixed-convention `usage` still resolves.
pub fn extract_usage(response: &Value) -> Option<LlmUsage> {
    let model = response.get("model")?.as_str()?;
    let usage = response.get("usage")?.as_object()?;

    let input_tokens = CONVENTIONS.iter().find_map(|c| c.input_tokens(usage))?;
    let output_tokens = CONVENTIONS.iter().find_map(|c| c.output_tokens(usage))?;

    Some(LlmUsage::new(model, input_tokens, output_tokens))
}

/// Names the convention whose fields a `usage` object carries, if any.
pub fn detect_convention(usage: &Map<String, Value>) -> Option<&'static str> {
    CONVENTIONS
        .iter()
        .find(|c| c.input_tokens(usage).is_some() || c.output_tokens(usage).is_some())
        .map(|c| c.name())
}

/// A response that can report the model and tokens it consumed.
///
/// Returning `None` means "nothing to charge"; it is never an error.
pub trait MeteredResponse {
    fn llm_usage(&self) -> Option<LlmUsage>;

    /// Name of the provider convention the usage was read with, for logs.
    fn convention(&self) -> Option<&'static str> {
        None
    }
}

impl MeteredResponse for Value {
    fn llm_usage(&self) -> Option<LlmUsage> {
        extract_usage(self)
    }

    fn convention(&self) -> Option<&'static str> {
        self.get("usage")
            .and_then(Value::as_object)
            .and_then(detect_convention)
    }
}

impl MeteredResponse for LlmUsage {
    fn llm_usage(&self) -> Option<LlmUsage> {
        Some(self.clone())
    }
}

impl<T: MeteredResponse> MeteredResponse for Option<T> {
    fn llm_usage(&self) -> Option<LlmUsage> {
        self.as_ref().and_then(MeteredResponse::llm_usage)
    }

    fn convention(&self) -> Option<&'static str> {
        self.as_ref().and_then(MeteredResponse::convention)
    }
}

impl<T: MeteredResponse + ?Sized> MeteredResponse for &T {
    fn llm_usage(&self) -> Option<LlmUsage> {
        (**self).llm_usage()
    }

    fn convention(&self) -> Option<&'static str> {
        (**self).convention()
    }
}

impl<T: MeteredResponse + ?Sized> MeteredResponse for Box<T> {
    fn llm_usage(&self) -> Option<LlmUsage> {
        (**self).llm_usage()
    }

    fn convention(&self) -> Option<&'static str> {
        (**self).convention()
    }
}
