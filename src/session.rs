//! Budget session: the scoped unit of cost tracking.
//!
//! A [`Session`] composes a [`Ledger`] (hard cap) and a [`CircuitBreaker`]
//! (soft limit + loop detection). Every successful record runs the breaker
//! checks; a detected loop fails the call that triggered it, after that
//! call has been charged.
//!
//! `Session` is a cheap handle (`Arc` inside), so one session can be shared
//! by concurrent tasks and child sessions can point back at their parent.
//!
//! # Example
//!
//! ```rust
//! use agentbudget::budget::AgentBudget;
//! use serde_json::json;
//!
//! let budget = AgentBudget::new("$5.00").unwrap();
//! let session = budget.session(None);
//! let report = session.run(|s| {
//!     let response = s.wrap(json!({
//!         "model": "gpt-4o",
//!         "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
//!     }))?;
//!     s.track(response, 0.01, Some("search"))?;
//!     Ok(s.report())
//! }).unwrap();
//! assert_eq!(report.breakdown.llm.calls, 1);
//! assert_eq!(report.breakdown.tools.calls, 1);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{BudgetError, Result};
use crate::ledger::Ledger;
use crate::pricing::PricingRegistry;
use crate::report::{SessionReport, TerminationCause};
use crate::types::{generate_session_id, round6, CostEvent};
use crate::usage::MeteredResponse;

/// Callback receiving a report snapshot.
pub type ReportCallback = Arc<dyn Fn(&SessionReport) + Send + Sync>;

/// Lifecycle callbacks for a session.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    /// Fired once, the first time spend reaches the soft limit.
    pub on_soft_limit: Option<ReportCallback>,
    /// Fired when the session closes because the hard budget was hit.
    pub on_hard_limit: Option<ReportCallback>,
    /// Fired when a loop is detected, before the call fails.
    pub on_loop_detected: Option<ReportCallback>,
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_soft_limit", &self.on_soft_limit.is_some())
            .field("on_hard_limit", &self.on_hard_limit.is_some())
            .field("on_loop_detected", &self.on_loop_detected.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    terminated_by: Option<TerminationCause>,
}

struct SessionInner {
    id: String,
    ledger: Ledger,
    breaker: CircuitBreaker,
    callbacks: SessionCallbacks,
    pricing: Arc<PricingRegistry>,
    parent: Option<Session>,
    lifecycle: Mutex<Lifecycle>,
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    ledger: Ledger,
    id: Option<String>,
    breaker: Option<CircuitBreaker>,
    callbacks: SessionCallbacks,
    pricing: Option<Arc<PricingRegistry>>,
    parent: Option<Session>,
}

impl SessionBuilder {
    /// Starts a builder around a ledger.
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            id: None,
            breaker: None,
            callbacks: SessionCallbacks::default(),
            pricing: None,
            parent: None,
        }
    }

    /// Uses an explicit session ID instead of a generated one.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Uses a configured circuit breaker instead of the default one.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Sets lifecycle callbacks.
    pub fn callbacks(mut self, callbacks: SessionCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Uses a specific pricing registry instead of the global one.
    pub fn pricing(mut self, pricing: Arc<PricingRegistry>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    fn parent(mut self, parent: Session) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                id: self.id.unwrap_or_else(generate_session_id),
                ledger: self.ledger,
                breaker: self.breaker.unwrap_or_default(),
                callbacks: self.callbacks,
                pricing: self.pricing.unwrap_or_else(PricingRegistry::global),
                parent: self.parent,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }
}

/// Tracks costs for a single agent session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("budget", &self.inner.ledger.budget())
            .field("spent", &self.inner.ledger.spent())
            .field("parent", &self.inner.parent.as_ref().map(|p| p.id().to_string()))
            .finish()
    }
}

impl Session {
    /// Creates a session with default settings around a ledger.
    pub fn new(ledger: Ledger) -> Self {
        SessionBuilder::new(ledger).build()
    }

    /// Starts a [`SessionBuilder`].
    pub fn builder(ledger: Ledger) -> SessionBuilder {
        SessionBuilder::new(ledger)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn budget(&self) -> f64 {
        self.inner.ledger.budget()
    }

    pub fn spent(&self) -> f64 {
        self.inner.ledger.spent()
    }

    pub fn remaining(&self) -> f64 {
        self.inner.ledger.remaining()
    }

    /// Checks whether a cost would exceed the budget without recording it.
    pub fn would_exceed(&self, cost: f64) -> bool {
        self.inner.ledger.would_exceed(cost)
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<CostEvent> {
        self.inner.ledger.events()
    }

    pub fn terminated_by(&self) -> Option<TerminationCause> {
        self.lifecycle().terminated_by
    }

    pub fn soft_limit_triggered(&self) -> bool {
        self.inner.breaker.soft_limit_triggered()
    }

    pub fn parent(&self) -> Option<&Session> {
        self.inner.parent.as_ref()
    }

    pub fn is_open(&self) -> bool {
        let lc = self.lifecycle();
        lc.started_at.is_some() && lc.ended_at.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle().ended_at.is_some()
    }

    /// Opens the session and records the start time.
    ///
    /// Opening an already-closed session has no effect.
    pub fn open(&self) {
        let mut lc = self.lifecycle();
        if lc.ended_at.is_some() {
            warn!(session_id = %self.inner.id, "Ignoring open on a closed session");
            return;
        }
        lc.started_at = Some(Utc::now());
        drop(lc);
        info!(
            session_id = %self.inner.id,
            budget = self.budget(),
            "Budget session opened"
        );
    }

    /// Closes the session.
    ///
    /// `outcome` is the error that ended the session's scope, if any. A
    /// [`BudgetError::BudgetExhausted`] or [`BudgetError::LoopDetected`]
    /// becomes the terminal cause; hitting the hard limit also fires the
    /// hard-limit callback. A child session then charges its total spend to
    /// its parent as one tool event, which can itself fail if the parent
    /// cannot absorb it. Closing twice is a no-op.
    pub fn close(&self, outcome: Option<&BudgetError>) -> Result<()> {
        let cause = outcome.and_then(BudgetError::termination_cause);
        {
            let mut lc = self.lifecycle();
            if lc.ended_at.is_some() {
                debug!(session_id = %self.inner.id, "Session already closed");
                return Ok(());
            }
            lc.ended_at = Some(Utc::now());
            if lc.terminated_by.is_none() {
                lc.terminated_by = cause;
            }
        }

        if cause == Some(TerminationCause::BudgetExhausted) {
            if let Some(cb) = &self.inner.callbacks.on_hard_limit {
                cb(&self.report());
            }
        }

        let spent = self.spent();
        info!(
            session_id = %self.inner.id,
            spent,
            terminated_by = ?self.terminated_by(),
            "Budget session closed"
        );

        if let Some(parent) = &self.inner.parent {
            if spent > 0.0 {
                let name = format!("child:{}", self.inner.id);
                parent.track((), spent, Some(&name))?;
            }
        }
        Ok(())
    }

    /// Runs `f` inside an open session and closes it afterwards with the
    /// closure's outcome.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        self.open();
        let result = f(self);
        self.finish(result)
    }

    /// Async variant of [`Session::run`].
    pub async fn run_async<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.open();
        let result = f(self.clone()).await;
        self.finish(result)
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.close(None)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(close_err) = self.close(Some(&e)) {
                    warn!(
                        session_id = %self.inner.id,
                        error = %close_err,
                        "Failed to roll up child spend after session error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Records the cost of an LLM response and passes it through.
    ///
    /// Responses without recognizable usage, or for models with unknown
    /// pricing, are passed through without charging anything.
    pub fn wrap<R: MeteredResponse>(&self, response: R) -> Result<R> {
        let Some(usage) = response.llm_usage() else {
            debug!(session_id = %self.inner.id, "Response has no usage data; not tracked");
            return Ok(response);
        };

        let Some(cost) = self.inner.pricing.calculate_llm_cost(
            &usage.model,
            usage.input_tokens,
            usage.output_tokens,
        ) else {
            debug!(
                session_id = %self.inner.id,
                model = %usage.model,
                "No pricing for model; not tracked"
            );
            return Ok(response);
        };

        debug!(
            session_id = %self.inner.id,
            model = %usage.model,
            convention = response.convention().unwrap_or("typed"),
            cost,
            "Priced LLM response"
        );
        self.record(CostEvent::llm(
            cost,
            usage.model,
            usage.input_tokens,
            usage.output_tokens,
        ))?;
        Ok(response)
    }

    /// Awaits an LLM call, then records it like [`Session::wrap`].
    pub async fn wrap_async<R, Fut>(&self, call: Fut) -> Result<R>
    where
        R: MeteredResponse,
        Fut: Future<Output = R>,
    {
        let response = call.await;
        self.wrap(response)
    }

    /// Records a tool/API call with a known cost and passes `result` through.
    pub fn track<T>(&self, result: T, cost: f64, tool_name: Option<&str>) -> Result<T> {
        self.record(CostEvent::tool(cost, tool_name.map(str::to_string), None))?;
        Ok(result)
    }

    /// Like [`Session::track`], attaching free-form metadata to the event.
    pub fn track_with_metadata<T>(
        &self,
        result: T,
        cost: f64,
        tool_name: Option<&str>,
        metadata: Map<String, Value>,
    ) -> Result<T> {
        self.record(CostEvent::tool(
            cost,
            tool_name.map(str::to_string),
            Some(metadata),
        ))?;
        Ok(result)
    }

    /// Awaits a tool call, then records it like [`Session::track`].
    pub async fn track_async<T, Fut>(&self, call: Fut, cost: f64, tool_name: Option<&str>) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        let result = call.await;
        self.track(result, cost, tool_name)
    }

    /// Wraps `f` so that every call is tracked at a fixed cost.
    ///
    /// The returned closure passes `f`'s result through untouched. Functions
    /// with several arguments take them as a tuple.
    pub fn track_tool<A, T, F>(
        &self,
        cost: f64,
        tool_name: impl Into<String>,
        f: F,
    ) -> impl Fn(A) -> Result<T>
    where
        F: Fn(A) -> T,
    {
        let session = self.clone();
        let name = tool_name.into();
        move |args| {
            let result = f(args);
            session.track(result, cost, Some(&name))
        }
    }

    /// Creates a child session with its own sub-budget.
    ///
    /// The child's budget is `max_spend` capped at this session's current
    /// remaining budget. It gets a fresh circuit breaker with the same
    /// settings and shares this session's pricing registry. Its spend reaches
    /// this session only when it closes.
    pub fn child_session(&self, max_spend: f64, session_id: Option<&str>) -> Result<Session> {
        if !max_spend.is_finite() || max_spend <= 0.0 {
            return Err(BudgetError::InvalidBudget(max_spend.to_string()));
        }
        let cap = max_spend.min(self.remaining()).max(0.0);
        let breaker = CircuitBreaker::new(
            self.inner.breaker.soft_limit_fraction(),
            *self.inner.breaker.loop_detector().config(),
        );

        let mut builder = SessionBuilder::new(Ledger::new(cap))
            .circuit_breaker(breaker)
            .pricing(Arc::clone(&self.inner.pricing))
            .parent(self.clone());
        if let Some(id) = session_id {
            builder = builder.session_id(id);
        }
        let child = builder.build();
        debug!(
            parent = %self.inner.id,
            child = %child.id(),
            budget = cap,
            "Created child session"
        );
        Ok(child)
    }

    /// Records an event and runs the post-record checks.
    fn record(&self, event: CostEvent) -> Result<()> {
        let key = event.discriminator().map(str::to_string);
        let spent = self.inner.ledger.record(event)?;
        self.check_after_record(spent, key.as_deref())
    }

    fn check_after_record(&self, spent: f64, call_key: Option<&str>) -> Result<()> {
        if self
            .inner
            .breaker
            .check_budget(spent, self.inner.ledger.budget())
            .is_some()
        {
            if let Some(cb) = &self.inner.callbacks.on_soft_limit {
                cb(&self.report());
            }
        }

        let Some(key) = call_key else {
            return Ok(());
        };
        if !self.inner.breaker.check_loop(key) {
            return Ok(());
        }

        {
            let mut lc = self.lifecycle();
            if lc.terminated_by.is_none() {
                lc.terminated_by = Some(TerminationCause::LoopDetected);
            }
        }
        warn!(session_id = %self.inner.id, key, "Loop detected");
        if let Some(cb) = &self.inner.callbacks.on_loop_detected {
            cb(&self.report());
        }
        Err(BudgetError::LoopDetected {
            key: key.to_string(),
        })
    }

    /// Generates a structured cost report for this session.
    pub fn report(&self) -> SessionReport {
        let (duration_seconds, terminated_by) = {
            let lc = self.lifecycle();
            let duration = lc.started_at.map(|start| {
                let end = lc.ended_at.unwrap_or_else(Utc::now);
                let secs = (end - start)
                    .to_std()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                (secs * 100.0).round() / 100.0
            });
            (duration, lc.terminated_by)
        };

        let budget = self.inner.ledger.budget();
        let snapshot = self.inner.ledger.snapshot();
        SessionReport {
            session_id: self.inner.id.clone(),
            budget,
            total_spent: round6(snapshot.spent),
            remaining: round6(budget - snapshot.spent),
            breakdown: snapshot.breakdown,
            duration_seconds,
            terminated_by,
            events: snapshot.events,
        }
    }
}
