//! Session report snapshot.
//!
//! The report is the boundary format handed to callbacks, webhooks and the
//! CLI. Field names and rounding are stable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::Breakdown;
use crate::types::CostEvent;

/// Why a session ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    BudgetExhausted,
    LoopDetected,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::BudgetExhausted => "budget_exhausted",
            TerminationCause::LoopDetected => "loop_detected",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cost report for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub budget: f64,
    /// Rounded to 6 decimal places.
    pub total_spent: f64,
    /// Rounded to 6 decimal places.
    pub remaining: f64,
    pub breakdown: Breakdown,
    /// Seconds since the session was opened (rounded to 2 places), `None`
    /// if it never was.
    pub duration_seconds: Option<f64>,
    pub terminated_by: Option<TerminationCause>,
    pub events: Vec<CostEvent>,
}

impl SessionReport {
    /// Format as a human-readable summary.
    ///
    /// Example output:
    /// ```text
    /// Session sess_0123456789ab: $0.275000 / $5.00 (5.5%)
    ///   LLM:   $0.015000 (1 calls)
    ///   Tools: $0.260000 (2 calls)
    /// ```
    pub fn summary(&self) -> String {
        let pct = if self.budget > 0.0 {
            self.total_spent / self.budget * 100.0
        } else {
            0.0
        };
        let mut out = format!(
            "Session {}: ${:.6} / ${:.2} ({:.1}%)\n",
            self.session_id, self.total_spent, self.budget, pct
        );
        out.push_str(&format!(
            "  LLM:   ${:.6} ({} calls)\n",
            self.breakdown.llm.total, self.breakdown.llm.calls
        ));
        out.push_str(&format!(
            "  Tools: ${:.6} ({} calls)\n",
            self.breakdown.tools.total, self.breakdown.tools.calls
        ));
        if let Some(cause) = self.terminated_by {
            out.push_str(&format!("  Terminated by: {}\n", cause));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionReport {
        SessionReport {
            session_id: "sess_test".into(),
            budget: 5.0,
            total_spent: 0.5,
            remaining: 4.5,
            breakdown: Breakdown::default(),
            duration_seconds: None,
            terminated_by: Some(TerminationCause::LoopDetected),
            events: vec![],
        }
    }

    #[test]
    fn test_termination_cause_wire_names() {
        assert_eq!(
            serde_json::to_value(TerminationCause::BudgetExhausted).unwrap(),
            "budget_exhausted"
        );
        assert_eq!(
            serde_json::to_value(TerminationCause::LoopDetected).unwrap(),
            "loop_detected"
        );
        assert_eq!(TerminationCause::LoopDetected.to_string(), "loop_detected");
    }

    #[test]
    fn test_null_fields_serialized() {
        let mut report = sample();
        report.terminated_by = None;
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["terminated_by"].is_null());
        assert!(json["duration_seconds"].is_null());
        assert!(json["events"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_summary_mentions_totals() {
        let s = sample().summary();
        assert!(s.contains("sess_test"));
        assert!(s.contains("$0.500000"));
        assert!(s.contains("10.0%"));
        assert!(s.contains("loop_detected"));
    }
}
