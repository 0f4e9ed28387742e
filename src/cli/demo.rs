//! Demo command: run a simulated agent under a budget.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use agentbudget::{AgentBudget, BudgetConfig, BudgetValue, Session};

#[derive(Clone, Copy)]
enum Step {
    Llm(&'static str, u64, u64),
    Tool(&'static str, f64),
}

const RESEARCH_STEPS: &[Step] = &[
    Step::Llm("gpt-4o", 1500, 400),
    Step::Tool("web_search", 0.01),
    Step::Llm("claude-3-5-sonnet-20241022", 3000, 600),
    Step::Tool("scrape_page", 0.005),
    Step::Llm("gpt-4o-mini", 800, 200),
    Step::Tool("web_search", 0.01),
    Step::Llm("gpt-4o", 2500, 800),
];

/// Shaped like an OpenAI chat completion.
fn fake_completion(model: &str, input: u64, output: u64) -> Value {
    json!({
        "id": "chatcmpl-demo",
        "object": "chat.completion",
        "model": model,
        "usage": {
            "prompt_tokens": input,
            "completion_tokens": output,
            "total_tokens": input + output
        }
    })
}

pub(crate) async fn cmd_demo(
    budget: Option<String>,
    runaway: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let path = config_path.unwrap_or_else(BudgetConfig::path);
    let mut config = BudgetConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    config
        .apply_env_overrides()
        .with_context(|| "Invalid AGENTBUDGET_* environment variable")?;
    if let Some(budget) = budget {
        config.max_spend = BudgetValue::Text(budget);
    }

    let agent_budget = AgentBudget::from_config(&config)
        .with_context(|| "Invalid budget configuration")?
        .on_soft_limit(|r| {
            eprintln!(
                "  ! soft limit: ${:.6} of ${:.2} spent",
                r.total_spent, r.budget
            )
        })
        .on_hard_limit(|r| eprintln!("  ! hard limit hit after {} events", r.events.len()))
        .on_loop_detected(|r| {
            eprintln!("  ! loop detected after {} events", r.events.len())
        });

    let session = agent_budget.session(None);
    eprintln!(
        "Running {} agent with ${:.2} budget ({})",
        if runaway { "runaway" } else { "research" },
        session.budget(),
        session.id()
    );

    let outcome = if runaway {
        session.run(runaway_agent)
    } else {
        session.run(research_agent)
    };
    match &outcome {
        Ok(steps) => eprintln!("Finished after {} steps", steps),
        Err(e) => eprintln!("Stopped: {}", e),
    }

    let report = session.report();
    eprintln!();
    eprint!("{}", report.summary());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn research_agent(session: &Session) -> agentbudget::Result<usize> {
    for (i, step) in RESEARCH_STEPS.iter().enumerate() {
        match *step {
            Step::Llm(model, input, output) => {
                session.wrap(fake_completion(model, input, output))?;
            }
            Step::Tool(name, cost) => {
                session.track((), cost, Some(name))?;
            }
        }
        eprintln!("  step {}: spent ${:.6}", i + 1, session.spent());
    }
    Ok(RESEARCH_STEPS.len())
}

/// Retries the same tool until the session stops it.
fn runaway_agent(session: &Session) -> agentbudget::Result<usize> {
    let retry = session.track_tool(0.002, "retry_api", |attempt: usize| attempt);
    let mut calls = 0;
    for attempt in 1..=1000 {
        session.wrap(fake_completion("gpt-4o-mini", 2000, 300))?;
        calls = retry(attempt)?;
        eprintln!("  call {}: spent ${:.6}", calls, session.spent());
    }
    Ok(calls)
}
