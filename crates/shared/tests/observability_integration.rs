//! 可观测性模块集成测试
//!
//! 测试配置加载与 metrics、tracing 初始化的配合。

use decision_shared::config::load_from;
use decision_shared::observability::{self, ObservabilityConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct HostConfig {
    service_name: String,
    observability: ObservabilityConfig,
}

#[test]
fn test_observability_config_from_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("default.toml"),
        "[observability]\nlog_level = \"debug\"\njson_logs = true\nmetrics_enabled = true\n",
    )
    .unwrap();

    let config: HostConfig = load_from(dir.path(), "development", "checkout-decisions").unwrap();
    assert_eq!(config.service_name, "checkout-decisions");
    assert_eq!(config.observability.service_name, "checkout-decisions");
    assert_eq!(config.observability.log_level, "debug");
    assert!(config.observability.json_logs);
    assert!(config.observability.metrics_enabled);
}

#[test]
fn test_init_installs_recorder() {
    let config = ObservabilityConfig {
        service_name: "checkout-decisions".to_string(),
        metrics_enabled: true,
        ..Default::default()
    };

    let guard = observability::init(&config).unwrap();
    observability::metrics::record_rule_evaluation("adult", true, 0.002);
    observability::metrics::record_outcome_dispatch("notify", true, 0.001);

    let rendered = guard.render_metrics().unwrap();
    assert!(rendered.contains("decision_rule_evaluations_total"));
    assert!(rendered.contains("service_starts_total"));
    assert!(observability::metrics::render().is_some());
}
