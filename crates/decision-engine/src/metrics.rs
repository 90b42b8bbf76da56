//! 运行指标回调
//!
//! 引擎通过 `MetricsSink` 上报规则评估、运行完成以及结果分发情况。
//! 所有方法都有空的默认实现，调用方只需覆盖关心的部分。

use std::time::Duration;

/// 指标收集器
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    /// 单条规则评估完成
    fn rule_evaluated(&self, _rule: &str, _matched: bool, _duration: Duration) {}

    /// 一次运行完成
    fn run_completed(&self, _rule_count: usize, _duration: Duration) {}

    /// 结果已分发（异步结果为派发耗时）
    fn outcome_dispatched(&self, _outcome: &str, _rule: &str, _matched: bool, _duration: Duration) {}

    /// 异步结果执行失败
    fn outcome_failed(&self, _outcome: &str, _rule: &str, _error: &str) {}
}

/// 基于 `metrics` 全局 recorder 的收集器
///
/// 未安装 recorder 时所有记录都是空操作。
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn rule_evaluated(&self, rule: &str, matched: bool, duration: Duration) {
        decision_shared::observability::metrics::record_rule_evaluation(
            rule,
            matched,
            duration.as_secs_f64(),
        );
    }

    fn run_completed(&self, rule_count: usize, duration: Duration) {
        decision_shared::observability::metrics::record_run(rule_count, duration.as_secs_f64());
    }

    fn outcome_dispatched(&self, outcome: &str, _rule: &str, matched: bool, duration: Duration) {
        decision_shared::observability::metrics::record_outcome_dispatch(
            outcome,
            matched,
            duration.as_secs_f64(),
        );
    }

    fn outcome_failed(&self, outcome: &str, rule: &str, _error: &str) {
        decision_shared::observability::metrics::record_outcome_failure(outcome, rule);
    }
}
