//! End-to-end budget session scenarios through the public API.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentbudget::{
    AgentBudget, BudgetError, LoopDetectorConfig, SessionReport, TerminationCause,
};
use serde_json::json;

#[test]
fn test_mixed_llm_and_tool_costs() {
    let budget = AgentBudget::new("$5.00").unwrap();
    let session = budget.session(None);

    session
        .run(|s| {
            // 1000 * $3/M + 800 * $15/M = $0.015
            s.wrap(json!({
                "id": "msg_01",
                "model": "claude-3-5-sonnet-20241022",
                "usage": {"input_tokens": 1000, "output_tokens": 800}
            }))?;
            s.track(vec!["result"], 0.01, Some("web_search"))?;
            s.track("page", 0.25, Some("scrape"))?;
            Ok(())
        })
        .unwrap();

    let report = session.report();
    assert_eq!(report.total_spent, 0.275);
    assert_eq!(report.remaining, 4.725);
    assert_eq!(report.breakdown.llm.calls, 1);
    assert_eq!(report.breakdown.tools.calls, 2);
    assert_eq!(report.breakdown.llm.by_model["claude-3-5-sonnet-20241022"], 0.015);
    assert_eq!(report.terminated_by, None);
    assert!(report.duration_seconds.is_some());
}

#[test]
fn test_hard_limit_stops_session() {
    let hard = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hard);
    let budget = AgentBudget::new("$0.10").unwrap().on_hard_limit(move |r| {
        assert_eq!(r.terminated_by, Some(TerminationCause::BudgetExhausted));
        h.fetch_add(1, Ordering::SeqCst);
    });
    let session = budget.session(None);

    let result = session.run(|s| {
        for _ in 0..3 {
            s.track((), 0.04, Some("api_call"))?;
        }
        Ok(())
    });

    match result {
        Err(BudgetError::BudgetExhausted { budget, spent }) => {
            assert_eq!(budget, 0.10);
            assert!((spent - 0.12).abs() < 1e-9);
        }
        other => panic!("expected BudgetExhausted, got {:?}", other),
    }

    let report = session.report();
    assert_eq!(report.events.len(), 2);
    assert_eq!(report.total_spent, 0.08);
    assert_eq!(report.terminated_by, Some(TerminationCause::BudgetExhausted));
    assert_eq!(hard.load(Ordering::SeqCst), 1);
}

/// Waits for one HTTP request on `listener`, answers 200 and returns its body.
fn receive_webhook(listener: TcpListener, wait: Duration) -> Option<serde_json::Value> {
    listener.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + wait;
    let mut sock = loop {
        match listener.accept() {
            Ok((sock, _)) => break sock,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return None,
        }
    };
    sock.set_nonblocking(false).unwrap();
    sock.set_read_timeout(Some(wait)).unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).ok()?;
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(idx) = text.find("\r\n\r\n") {
            let len = text[..idx]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if buf.len() >= idx + 4 + len {
                sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .ok()?;
                return serde_json::from_slice(&buf[idx + 4..idx + 4 + len]).ok();
            }
        }
        if n == 0 {
            return None;
        }
    }
}

#[test]
fn test_hard_limit_webhook_delivered_from_sync_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    let session = AgentBudget::new("$0.10")
        .unwrap()
        .with_webhook(url)
        .unwrap()
        .session(Some("sess_sync_hook"));

    let result = session.run(|s| {
        for _ in 0..3 {
            s.track((), 0.04, Some("api_call"))?;
        }
        Ok(())
    });
    assert!(result.unwrap_err().is_budget_exhausted());

    let body = receive_webhook(listener, Duration::from_secs(5)).expect("no webhook received");
    assert_eq!(body["event_type"], "hard_limit");
    assert_eq!(body["session_id"], "sess_sync_hook");
    assert_eq!(body["data"]["terminated_by"], "budget_exhausted");
    assert_eq!(body["data"]["total_spent"], 0.08);
}

#[test]
fn test_exact_budget_is_allowed() {
    let session = AgentBudget::new(1.0).unwrap().session(None);
    session.track((), 0.5, None).unwrap();
    session.track((), 0.5, None).unwrap();
    assert_eq!(session.remaining(), 0.0);
    assert!(session.would_exceed(0.000001));
    assert!(!session.would_exceed(0.0));
    assert!(session.track((), 0.01, None).is_err());
    assert_eq!(session.spent(), 1.0);
}

#[test]
fn test_runaway_loop_is_stopped() {
    let looped = Arc::new(AtomicUsize::new(0));
    let l = Arc::clone(&looped);
    let budget = AgentBudget::new("$10.00")
        .unwrap()
        .with_loop_config(LoopDetectorConfig::new(5, 60.0))
        .on_loop_detected(move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });
    let session = budget.session(None);

    let retry = session.track_tool(0.001, "flaky_api", |attempt: u32| attempt);
    let result = session.run(|_| {
        for attempt in 0..100 {
            retry(attempt)?;
        }
        Ok(())
    });

    assert!(matches!(result, Err(BudgetError::LoopDetected { ref key }) if key == "flaky_api"));
    assert_eq!(session.events().len(), 6);
    assert_eq!(session.terminated_by(), Some(TerminationCause::LoopDetected));
    assert_eq!(looped.load(Ordering::SeqCst), 1);
}

#[test]
fn test_loop_window_expires() {
    let session = AgentBudget::new(1.0)
        .unwrap()
        .with_loop_config(LoopDetectorConfig::new(2, 0.1))
        .session(None);

    session.track((), 0.01, Some("poll")).unwrap();
    session.track((), 0.01, Some("poll")).unwrap();
    std::thread::sleep(Duration::from_millis(150));
    session.track((), 0.01, Some("poll")).unwrap();
    session.track((), 0.01, Some("poll")).unwrap();
    assert!(session.track((), 0.01, Some("poll")).is_err());
}

#[test]
fn test_soft_limit_fires_once() {
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let session = AgentBudget::new(1.0)
        .unwrap()
        .with_soft_limit(0.8)
        .unwrap()
        .on_soft_limit(move |r: &SessionReport| {
            assert!(r.total_spent >= 0.8);
            f.fetch_add(1, Ordering::SeqCst);
        })
        .session(None);

    for _ in 0..9 {
        session.track((), 0.1, None).unwrap();
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(session.soft_limit_triggered());
}

#[test]
fn test_three_level_nesting() {
    let root = AgentBudget::new("$10.00").unwrap().session(Some("sess_root"));
    root.run(|r| {
        r.track((), 1.0, Some("plan"))?;
        let mid = r.child_session(5.0, Some("sess_mid"))?;
        mid.run(|m| {
            m.track((), 0.5, Some("search"))?;
            let leaf = m.child_session(1.0, Some("sess_leaf"))?;
            leaf.run(|l| l.track((), 0.25, Some("fetch")))?;
            assert_eq!(m.spent(), 0.75);
            Ok(())
        })?;
        assert_eq!(r.spent(), 1.75);
        Ok(())
    })
    .unwrap();

    let names: Vec<_> = root
        .events()
        .into_iter()
        .filter_map(|e| e.tool_name)
        .collect();
    assert_eq!(names, vec!["plan", "child:sess_mid"]);
}

#[test]
fn test_child_exhaustion_charges_parent_and_propagates() {
    let parent = AgentBudget::new("$1.00").unwrap().session(None);
    let result = parent.run(|p| {
        let child = p.child_session(0.3, None)?;
        child.run(|c| {
            c.track((), 0.2, Some("step"))?;
            c.track((), 0.2, Some("step"))?;
            Ok(())
        })
    });

    assert!(result.unwrap_err().is_budget_exhausted());
    assert_eq!(parent.spent(), 0.2);
    assert_eq!(parent.terminated_by(), Some(TerminationCause::BudgetExhausted));
}

#[test]
fn test_report_round_trips_through_json() {
    let session = AgentBudget::new(2.0).unwrap().session(None);
    session
        .run(|s| {
            s.wrap(json!({
                "model": "gpt-4o-mini",
                "usage": {"prompt_tokens": 1200, "completion_tokens": 300}
            }))?;
            let mut meta = serde_json::Map::new();
            meta.insert("query".into(), json!("rust budgets"));
            s.track_with_metadata((), 0.02, Some("search"), meta)?;
            s.track((), 0.01, None)?;
            Ok(())
        })
        .unwrap();

    let report = session.report();
    let text = serde_json::to_string(&report).unwrap();
    let back: SessionReport = serde_json::from_str(&text).unwrap();
    assert_eq!(back, report);

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["events"][0]["cost_type"], "llm");
    assert_eq!(value["events"][0]["input_tokens"], 1200);
    assert_eq!(value["events"][1]["cost_type"], "tool");
    assert!(value["events"][2].get("tool_name").is_none());
    assert!(value["terminated_by"].is_null());
}

#[tokio::test]
async fn test_concurrent_tasks_share_session() {
    let session = AgentBudget::new(100.0).unwrap().session(None);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let s = session.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                s.track_async(async { () }, 0.25, None).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(session.events().len(), 400);
    assert_eq!(session.spent(), 100.0);
    assert_eq!(session.remaining(), 0.0);
}

#[test]
fn test_invalid_budget_rejected() {
    for bad in ["$0", "-1", "lots"] {
        assert!(matches!(
            AgentBudget::new(bad),
            Err(BudgetError::InvalidBudget(_))
        ));
    }
}
