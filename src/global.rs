//! Process-wide active session.
//!
//! For agents that cannot thread a [`Session`] through every call site:
//! [`init`] opens a session and makes it globally reachable, the free
//! functions here read or charge it, and [`teardown`] closes it and returns
//! the final report.

use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::info;

use crate::budget::AgentBudget;
use crate::error::{BudgetError, Result};
use crate::report::SessionReport;
use crate::session::Session;
use crate::usage::MeteredResponse;

static ACTIVE: Lazy<RwLock<Option<Session>>> = Lazy::new(|| RwLock::new(None));

fn active() -> Option<Session> {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Opens a session from `budget` and makes it the active one.
///
/// An already-active session is torn down first.
pub fn init(budget: &AgentBudget, session_id: Option<&str>) -> Session {
    let session = budget.session(session_id);
    session.open();

    let previous = ACTIVE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(session.clone());
    if let Some(prev) = previous {
        close_quietly(&prev);
    }

    info!(session_id = %session.id(), "Global budget session initialized");
    session
}

/// Closes the active session and returns its final report.
pub fn teardown() -> Option<SessionReport> {
    let session = ACTIVE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()?;
    close_quietly(&session);
    Some(session.report())
}

fn close_quietly(session: &Session) {
    if let Err(e) = session.close(None) {
        tracing::warn!(session_id = %session.id(), error = %e, "Error closing global session");
    }
}

pub fn get_session() -> Option<Session> {
    active()
}

pub fn is_active() -> bool {
    active().is_some()
}

/// Spend of the active session, `0.0` when none is active.
pub fn spent() -> f64 {
    active().map(|s| s.spent()).unwrap_or(0.0)
}

/// Remaining budget of the active session, `0.0` when none is active.
pub fn remaining() -> f64 {
    active().map(|s| s.remaining()).unwrap_or(0.0)
}

pub fn report() -> Option<SessionReport> {
    active().map(|s| s.report())
}

/// Charges a tool cost to the active session.
pub fn track(cost: f64, tool_name: Option<&str>) -> Result<()> {
    let session = active().ok_or(BudgetError::NotInitialized)?;
    session.track((), cost, tool_name)
}

/// Charges an LLM response to the active session, if there is one.
///
/// Without an active session the response passes through untracked.
pub fn wrap<R: MeteredResponse>(response: R) -> Result<R> {
    match active() {
        Some(session) => session.wrap(response),
        None => Ok(response),
    }
}
