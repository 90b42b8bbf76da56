//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 本模块只安装 recorder；指标文本由宿主通过 handle 渲染并自行暴露。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::info;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 串行化 recorder 安装，全局 recorder 只能设置一次
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// 安装全局 Prometheus recorder
///
/// 已安装过时直接返回现有 handle。
pub fn install_recorder(service_name: &str) -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = INSTALL_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();

    register_common_metrics(service_name);
    info!(service = service_name, "Prometheus recorder installed");
    Ok(handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标；未安装 recorder 时返回 None
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

/// 注册指标描述，会出现在 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "decision_rule_evaluations_total",
        "Total number of rule evaluations"
    );
    metrics::describe_histogram!(
        "decision_rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::describe_counter!("decision_runs_total", "Total number of engine runs");
    metrics::describe_histogram!(
        "decision_run_duration_seconds",
        "Engine run duration in seconds"
    );
    metrics::describe_histogram!("decision_run_rules", "Number of rules evaluated per run");

    metrics::describe_counter!(
        "decision_outcome_dispatches_total",
        "Total number of outcome dispatches"
    );
    metrics::describe_histogram!(
        "decision_outcome_dispatch_duration_seconds",
        "Outcome dispatch duration in seconds"
    );
    metrics::describe_counter!(
        "decision_outcome_failures_total",
        "Total number of failed asynchronous outcomes"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录规则评估
#[inline]
pub fn record_rule_evaluation(rule: &str, matched: bool, duration_secs: f64) {
    metrics::counter!(
        "decision_rule_evaluations_total",
        "rule" => rule.to_string(),
        "matched" => matched.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "decision_rule_evaluation_duration_seconds",
        "rule" => rule.to_string()
    )
    .record(duration_secs);
}

/// 记录一次完整运行
#[inline]
pub fn record_run(rule_count: usize, duration_secs: f64) {
    metrics::counter!("decision_runs_total").increment(1);
    metrics::histogram!("decision_run_duration_seconds").record(duration_secs);
    metrics::histogram!("decision_run_rules").record(rule_count as f64);
}

/// 记录结果分发
#[inline]
pub fn record_outcome_dispatch(outcome: &str, matched: bool, duration_secs: f64) {
    metrics::counter!(
        "decision_outcome_dispatches_total",
        "outcome" => outcome.to_string(),
        "matched" => matched.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "decision_outcome_dispatch_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录异步结果失败
#[inline]
pub fn record_outcome_failure(outcome: &str, rule: &str) {
    metrics::counter!(
        "decision_outcome_failures_total",
        "outcome" => outcome.to_string(),
        "rule" => rule.to_string()
    )
    .increment(1);
}
