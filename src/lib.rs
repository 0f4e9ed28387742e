//! AgentBudget - dollar budgets and runaway-loop protection for AI agents
//!
//! A [`Session`] charges LLM responses and tool calls against a hard dollar
//! cap, warns once at a soft limit, and stops an agent that keeps calling
//! the same thing. [`AgentBudget`] is the entry point.

pub mod budget;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod global;
pub mod ledger;
pub mod pricing;
pub mod report;
pub mod session;
pub mod types;
pub mod usage;
pub mod webhook;

pub use budget::{parse_budget, AgentBudget, BudgetValue};
pub use circuit_breaker::{CircuitBreaker, LoopDetector, LoopDetectorConfig};
pub use config::BudgetConfig;
pub use error::{BudgetError, Result};
pub use ledger::{Breakdown, Ledger, LedgerSnapshot};
pub use pricing::{ModelPricing, PricingRegistry};
pub use report::{SessionReport, TerminationCause};
pub use session::{ReportCallback, Session, SessionBuilder, SessionCallbacks};
pub use types::{CostEvent, CostType};
pub use usage::{extract_usage, LlmUsage, MeteredResponse};
pub use webhook::{NotificationSink, WebhookEmitter};
