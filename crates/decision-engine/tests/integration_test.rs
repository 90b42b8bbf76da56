//! 决策引擎集成测试
//!
//! 测试完整的规则加载、编译、执行和结果分发工作流。

use decision_engine::{
    Almanac, Condition, ConditionTree, Decision, Engine, EngineConfig, EngineError, ExecutionMode,
    Fact, FnAction, JsonFileSource, Outcome, OutcomeEvent, OutcomeMode, OutcomeRef, ReloadStatus,
    Rule, RuleReloader,
};
use parking_lot::Mutex;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const CHECKOUT_RULES: &str = r#"
[
    {
        "name": "vip-high-value",
        "priority": 10,
        "conditions": {
            "all": [
                {"fact": "order", "operator": "greater_than_inclusive", "value": 1000, "path": "$.amount"},
                {"fact": "user", "operator": "equal", "value": true, "path": "$.is_vip"}
            ]
        },
        "on_success": [{"name": "grant-discount", "params": {"percent": 15}}]
    },
    {
        "name": "blocked-country",
        "priority": 100,
        "conditions": {
            "any": [
                {"fact": "user", "operator": "in", "value": ["KP", "IR"], "path": "$.country"},
                {
                    "all": [
                        {"fact": "order", "operator": "greater_than", "value": 50000, "path": "$.amount"},
                        {"fact": "user", "operator": "less_than", "value": 30, "path": "$.account_age_days"}
                    ]
                }
            ]
        },
        "on_success": [{"name": "flag-review"}]
    },
    {
        "name": "newsletter",
        "priority": 1,
        "conditions": {
            "none": [
                {"fact": "user", "operator": "contains", "value": "unsubscribed", "path": "$.tags"}
            ]
        },
        "on_success": [{"name": "send-newsletter"}]
    }
]
"#;

/// 模拟一次结账请求
fn checkout_almanac(engine: &Engine, amount: i64, vip: bool) -> Arc<Almanac> {
    let almanac = engine.new_almanac();
    almanac.add_value("order", json!({"id": "order-12345", "amount": amount, "currency": "EUR"}));
    almanac.add_fact(
        Fact::constant(
            "user",
            json!({
                "id": "user-67890",
                "is_vip": vip,
                "country": "DE",
                "account_age_days": 400,
                "tags": ["frequent_buyer"]
            }),
        )
        .with_metadata("source", "crm"),
    );
    Arc::new(almanac)
}

fn checkout_engine(config: EngineConfig) -> (Engine, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::new(config);

    for name in ["grant-discount", "flag-review", "send-newsletter"] {
        let log = log.clone();
        engine.register_outcome(
            Outcome::new(name)
                .with_default("percent", 5)
                .with_action(Arc::new(FnAction(move |event: &OutcomeEvent| {
                    log.lock().push(format!("{}<-{}", event.outcome, event.rule));
                    Ok(())
                }))),
        );
    }

    let rules: Vec<Rule> = serde_json::from_str(CHECKOUT_RULES).unwrap();
    engine.add_rules(rules).unwrap();
    (engine, log)
}

// ==================== 完整工作流测试 ====================

#[tokio::test]
async fn test_checkout_workflow() {
    let (engine, log) = checkout_engine(EngineConfig {
        audit: true,
        ..Default::default()
    });

    let almanac = checkout_almanac(&engine, 1500, true);
    let report = engine.run(almanac.clone()).await.unwrap();

    let matches = report.matches();
    assert_eq!(matches["vip-high-value"], true);
    assert_eq!(matches["blocked-country"], false);
    assert_eq!(matches["newsletter"], true);

    // 按优先级降序分发
    assert_eq!(
        *log.lock(),
        vec!["grant-discount<-vip-high-value", "send-newsletter<-newsletter"]
    );

    let discount = &report.events[0];
    assert_eq!(discount.params["percent"], json!(15));
    assert_eq!(almanac.success_events().len(), 2);
}

#[tokio::test]
async fn test_decision_response() {
    let (engine, _) = checkout_engine(EngineConfig {
        audit: true,
        ..Default::default()
    });

    let response = engine
        .decide(checkout_almanac(&engine, 1500, true))
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Authorize);
    assert_eq!(response.matched_rules, vec!["vip-high-value", "newsletter"]);
    assert!(response.reason.starts_with("rule 'vip-high-value' matched"));
    assert_eq!(response.fact_metadata["user"]["source"], json!("crm"));

    let serialized = serde_json::to_value(&response).unwrap();
    assert_eq!(serialized["decision"], json!("authorize"));
}

#[tokio::test]
async fn test_decline_when_nothing_matches() {
    let engine = Engine::default();
    engine
        .add_rule(Rule::new(
            "adult",
            ConditionTree::all(vec![Condition::new("age", "greater_than", 18).into()]),
        ))
        .unwrap();

    let response = engine
        .decide(Arc::new(Almanac::from_values([("age", json!(15))])))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Decline);
    assert!(response.matched_rules.is_empty());
}

// ==================== 并行模式 ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_mode_matches_sequential() {
    let mut logs = Vec::new();
    let mut matches = Vec::new();

    for execution in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let (engine, log) = checkout_engine(EngineConfig {
            execution,
            workers: 3,
            ..Default::default()
        });
        for amount in [10, 1500, 60000] {
            let report = engine
                .run(checkout_almanac(&engine, amount, amount > 100))
                .await
                .unwrap();
            matches.push(report.matches());
        }
        logs.push(log.lock().clone());
    }

    assert_eq!(logs[0], logs[1]);
    assert_eq!(matches[..3], matches[3..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_blocking_facts_computed_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(EngineConfig {
        execution: ExecutionMode::Parallel,
        workers: 8,
        ..Default::default()
    });

    let counter = calls.clone();
    engine.add_fact(Fact::dynamic("risk_score", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        Ok(json!(42))
    }));

    let rules = (0..16)
        .map(|i| {
            Rule::new(
                format!("risk-{i}"),
                ConditionTree::all(vec![Condition::new("risk_score", "less_than", 50).into()]),
            )
        })
        .collect();
    engine.add_rules(rules).unwrap();

    let report = engine.run(Arc::new(engine.new_almanac())).await.unwrap();
    assert!(report.results.iter().all(|r| r.matched));
    // 并发计算可能发生，但缓存写入后不再重复
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert!(calls.load(Ordering::SeqCst) <= 8);
}

// ==================== 错误处理 ====================

#[tokio::test]
async fn test_undefined_fact_rejected() {
    let engine = Engine::new(EngineConfig {
        allow_undefined_facts: false,
        ..Default::default()
    });
    engine
        .add_rule(Rule::new(
            "needs-score",
            ConditionTree::all(vec![Condition::new("score", "greater_than", 1).into()]),
        ))
        .unwrap();

    let err = engine.run(Arc::new(engine.new_almanac())).await.unwrap_err();
    assert!(matches!(err, EngineError::Evaluation { .. }));
    assert!(err.to_string().contains("score"));
}

#[tokio::test]
async fn test_undefined_fact_tolerated_but_equal_on_null_fails() {
    let engine = Engine::default();
    engine
        .add_rule(Rule::new(
            "status-check",
            ConditionTree::all(vec![Condition::new("status", "equal", "active").into()]),
        ))
        .unwrap();

    let err = engine.run(Arc::new(Almanac::default())).await.unwrap_err();
    assert_eq!(err.rule(), "status-check");
}

#[tokio::test]
async fn test_numeric_operator_type_error() {
    let engine = Engine::default();
    engine
        .add_rule(Rule::new(
            "age-check",
            ConditionTree::all(vec![Condition::new("age", "greater_than", 18).into()]),
        ))
        .unwrap();

    let err = engine
        .run(Arc::new(Almanac::from_values([("age", json!("twenty"))])))
        .await
        .unwrap_err();
    assert_eq!(err.phase(), "evaluate");
}

// ==================== 异步结果 ====================

#[tokio::test]
async fn test_async_outcome_does_not_block_run() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = Engine::default();
    engine.register_outcome(
        Outcome::new("audit-log")
            .with_mode(OutcomeMode::Async)
            .with_action(Arc::new(FnAction(move |event: &OutcomeEvent| {
                let _ = tx.send(event.rule.clone());
                Ok(())
            }))),
    );
    engine
        .add_rule(Rule::new("always", ConditionTree::default()).on_success(OutcomeRef::new("audit-log")))
        .unwrap();

    let report = engine.run(Arc::new(Almanac::default())).await.unwrap();
    assert_eq!(report.events.len(), 1);

    let rule = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rule, "always");
}

// ==================== 热重载 ====================

#[tokio::test]
async fn test_reload_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CHECKOUT_RULES.as_bytes()).unwrap();
    file.flush().unwrap();

    let engine = Engine::default();
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    let reloader = RuleReloader::new(
        Arc::new(JsonFileSource::new(file.path())),
        engine.store().clone(),
        Duration::from_secs(60),
    )
    .on_update(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(reloader.reload_once().await.unwrap(), ReloadStatus::Updated(3));
    assert_eq!(reloader.reload_once().await.unwrap(), ReloadStatus::Unchanged);
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    let names: Vec<_> = engine.rules().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["vip-high-value", "blocked-country", "newsletter"]);
}
