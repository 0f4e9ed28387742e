//! Budget ledger: the running balance and event history of one session.
//!
//! The ledger is the only place where spend is committed. Every read and
//! every check-and-commit happens under a single `Mutex`, so concurrent
//! callers can never push the total past the budget.
//!
//! # Example
//!
//! ```rust
//! use agentbudget::ledger::Ledger;
//! use agentbudget::types::CostEvent;
//!
//! let ledger = Ledger::new(0.10);
//! ledger.record(CostEvent::tool(0.04, None, None)).unwrap();
//! ledger.record(CostEvent::tool(0.04, None, None)).unwrap();
//! assert!(ledger.record(CostEvent::tool(0.04, None, None)).is_err());
//! assert_eq!(ledger.events().len(), 2);
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BudgetError, Result};
use crate::types::{round6, CostEvent, CostType};

/// Aggregated LLM spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmBreakdown {
    pub total: f64,
    pub calls: u64,
    pub by_model: BTreeMap<String, f64>,
}

/// Aggregated tool spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolBreakdown {
    pub total: f64,
    pub calls: u64,
    pub by_tool: BTreeMap<String, f64>,
}

/// Spend grouped by cost type and discriminator, rounded to 6 decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub llm: LlmBreakdown,
    pub tools: ToolBreakdown,
}

/// Internal mutable state guarded by the ledger mutex.
#[derive(Debug, Default)]
struct LedgerState {
    spent: f64,
    events: Vec<CostEvent>,
}

/// Thread-safe running balance tracker for a budget session.
#[derive(Debug)]
pub struct Ledger {
    budget: f64,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Creates an empty ledger with a fixed budget.
    ///
    /// The budget is not validated here; user-facing constructors go through
    /// [`crate::budget::parse_budget`]. Child sessions may legitimately get a
    /// zero budget when the parent is fully spent.
    pub fn new(budget: f64) -> Self {
        Self {
            budget,
            state: Mutex::new(LedgerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // Nothing inside the critical sections can panic, so a poisoned lock
        // still guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured budget.
    pub fn budget(&self) -> f64 {
        self.budget
    }

    /// Total committed spend.
    pub fn spent(&self) -> f64 {
        self.state().spent
    }

    /// Budget minus committed spend.
    pub fn remaining(&self) -> f64 {
        self.budget - self.state().spent
    }

    /// Returns a snapshot of the event history.
    pub fn events(&self) -> Vec<CostEvent> {
        self.state().events.clone()
    }

    /// Number of recorded events.
    pub fn event_count(&self) -> usize {
        self.state().events.len()
    }

    /// Records a cost event, returning the new total.
    ///
    /// Fails with [`BudgetError::BudgetExhausted`] carrying the attempted total
    /// if the event would push spend past the budget; in that case nothing is
    /// recorded. A cost landing exactly on the budget is accepted.
    pub fn record(&self, event: CostEvent) -> Result<f64> {
        if !event.cost.is_finite() || event.cost < 0.0 {
            return Err(BudgetError::InvalidCost(event.cost));
        }

        let mut state = self.state();
        let new_total = state.spent + event.cost;
        if new_total > self.budget {
            warn!(
                cost = event.cost,
                spent = state.spent,
                budget = self.budget,
                "Rejected cost event: budget would be exceeded"
            );
            return Err(BudgetError::BudgetExhausted {
                budget: self.budget,
                spent: new_total,
            });
        }

        debug!(
            cost = event.cost,
            cost_type = event.cost_type.as_str(),
            spent = new_total,
            budget = self.budget,
            "Recorded cost event"
        );
        state.spent = new_total;
        state.events.push(event);
        Ok(new_total)
    }

    /// Checks whether a cost would exceed the budget without recording it.
    pub fn would_exceed(&self, cost: f64) -> bool {
        self.state().spent + cost > self.budget
    }

    /// Returns a cost breakdown by type and model/tool.
    pub fn breakdown(&self) -> Breakdown {
        tally(&self.state().events)
    }

    /// Spend, breakdown and events read under one lock, so they always agree.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state();
        LedgerSnapshot {
            spent: state.spent,
            breakdown: tally(&state.events),
            events: state.events.clone(),
        }
    }
}

/// Consistent view of a ledger at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub spent: f64,
    pub breakdown: Breakdown,
    pub events: Vec<CostEvent>,
}

fn tally(events: &[CostEvent]) -> Breakdown {
    let mut breakdown = Breakdown::default();

    for event in events {
        match event.cost_type {
            CostType::Llm => {
                breakdown.llm.total += event.cost;
                breakdown.llm.calls += 1;
                if let Some(model) = &event.model {
                    *breakdown.llm.by_model.entry(model.clone()).or_insert(0.0) += event.cost;
                }
            }
            CostType::Tool => {
                breakdown.tools.total += event.cost;
                breakdown.tools.calls += 1;
                if let Some(tool) = &event.tool_name {
                    *breakdown.tools.by_tool.entry(tool.clone()).or_insert(0.0) += event.cost;
                }
            }
        }
    }

    breakdown.llm.total = round6(breakdown.llm.total);
    breakdown.llm.by_model.values_mut().for_each(|v| *v = round6(*v));
    breakdown.tools.total = round6(breakdown.tools.total);
    breakdown.tools.by_tool.values_mut().for_each(|v| *v = round6(*v));
    breakdown
}
