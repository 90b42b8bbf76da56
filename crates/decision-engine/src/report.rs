//! 运行结果与决策报告

use crate::models::{ConditionResult, TreeResult};
use crate::outcome::OutcomeEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// 单条规则在一次运行中的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub priority: i32,
    pub matched: bool,
    /// 因依赖的事实缺失而未评估
    #[serde(default)]
    pub skipped: bool,
    /// 审计模式下的完整评估树
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<TreeResult>,
    #[serde(with = "duration_micros")]
    pub duration: Duration,
}

impl RuleResult {
    /// 匹配原因：审计模式下列出通过的叶子条件
    pub fn reason(&self) -> String {
        let passed: Vec<String> = self
            .detail
            .as_ref()
            .map(|tree| {
                tree.leaves()
                    .into_iter()
                    .filter(|c| c.result)
                    .map(describe_condition)
                    .collect()
            })
            .unwrap_or_default();

        if passed.is_empty() {
            format!("rule '{}' matched", self.rule)
        } else {
            format!("rule '{}' matched: {}", self.rule, passed.join(", "))
        }
    }
}

fn describe_condition(c: &ConditionResult) -> String {
    let fact = match &c.path {
        Some(path) => format!("{}{}", c.fact, path.strip_prefix('$').unwrap_or(path)),
        None => c.fact.clone(),
    };
    format!("{} {} {} (actual {})", fact, c.operator, c.value, c.fact_value)
}

/// 一次运行的完整报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_micros")]
    pub duration: Duration,
    /// 按排序后的顺序
    pub results: Vec<RuleResult>,
    /// 按分发顺序触发的事件
    pub events: Vec<OutcomeEvent>,
}

impl RunReport {
    pub fn results_by_name(&self) -> HashMap<&str, &RuleResult> {
        self.results.iter().map(|r| (r.rule.as_str(), r)).collect()
    }

    /// 规则名 → 是否匹配
    pub fn matches(&self) -> BTreeMap<String, bool> {
        self.results
            .iter()
            .map(|r| (r.rule.clone(), r.matched))
            .collect()
    }

    pub fn matched(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| r.matched)
    }

    pub fn any_matched(&self) -> bool {
        self.results.iter().any(|r| r.matched)
    }
}

/// 整体决策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Authorize,
    Decline,
}

/// 汇总后的决策响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub run_id: Uuid,
    pub decision: Decision,
    pub reason: String,
    pub matched_rules: Vec<String>,
    pub events: Vec<OutcomeEvent>,
    /// 规则引用到的事实的元数据
    pub fact_metadata: BTreeMap<String, Map<String, Value>>,
}

impl DecisionResponse {
    pub fn from_report(report: &RunReport, fact_metadata: BTreeMap<String, Map<String, Value>>) -> Self {
        let matched: Vec<&RuleResult> = report.matched().collect();
        let (decision, reason) = match matched.first() {
            Some(first) => (Decision::Authorize, first.reason()),
            None => (Decision::Decline, "no rule matched".to_string()),
        };

        Self {
            run_id: report.run_id,
            decision,
            reason,
            matched_rules: matched.iter().map(|r| r.rule.clone()).collect(),
            events: report.events.clone(),
            fact_metadata,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.decision == Decision::Authorize
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}
