//! 规则存储管理
//!
//! 编译后的规则列表放在 `ArcSwap` 中：运行时读取只做一次原子 load 拿到快照，
//! 写入（添加、删除、整体替换）先在副本上完成再整体换入，
//! 因此进行中的运行始终看到一个不变的规则列表。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{EngineError, Result};
use crate::models::Rule;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则快照
pub type RuleSnapshot = Arc<Vec<Arc<CompiledRule>>>;

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 按添加顺序保存的编译后规则
    rules: Arc<ArcSwap<Vec<Arc<CompiledRule>>>>,
    /// 规则编译器；同时串行化所有写操作
    compiler: Arc<Mutex<RuleCompiler>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(ArcSwap::from_pointee(Vec::new())),
            compiler: Arc::new(Mutex::new(RuleCompiler::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }

    /// 当前规则列表快照
    pub fn snapshot(&self) -> RuleSnapshot {
        self.rules.load_full()
    }

    /// 当前规则的原始定义（按添加顺序）
    pub fn rules(&self) -> Vec<Rule> {
        self.rules.load().iter().map(|r| r.rule.clone()).collect()
    }

    /// 按名称查找；同名时返回最先添加的一条
    pub fn get(&self, name: &str) -> Option<Arc<CompiledRule>> {
        self.rules.load().iter().find(|r| r.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 添加规则
    ///
    /// 规则名不要求唯一，同名规则各自独立评估。
    #[instrument(skip(self, rule), fields(rule_name = %rule.name))]
    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        self.add_rules(vec![rule])
    }

    /// 批量添加规则；任一规则编译失败则整批不生效
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn add_rules(&self, rules: Vec<Rule>) -> Result<()> {
        let mut compiler = self.compiler.lock();
        let compiled = compile_all(&mut compiler, rules)?;

        let mut next: Vec<Arc<CompiledRule>> = self.rules.load().as_ref().clone();
        for rule in compiled {
            if next.iter().any(|r| r.name() == rule.name()) {
                warn!("规则名重复: {}", rule.name());
            }
            info!("规则已加载: {}", rule.name());
            next.push(rule);
        }
        self.rules.store(Arc::new(next));
        Ok(())
    }

    /// 从 JSON 字符串添加规则，返回规则名
    #[instrument(skip(self, json))]
    pub fn add_rule_json(&self, json: &str) -> Result<String> {
        let rule = Rule::from_json(json).map_err(|source| EngineError::Compile {
            rule: "<json>".to_string(),
            source,
        })?;
        let name = rule.name.clone();
        self.add_rule(rule)?;
        Ok(name)
    }

    /// 删除所有同名规则，返回是否存在
    #[instrument(skip(self))]
    pub fn remove_rule(&self, name: &str) -> bool {
        let _guard = self.compiler.lock();
        let current = self.rules.load();
        if !current.iter().any(|r| r.name() == name) {
            warn!("删除不存在的规则: {}", name);
            return false;
        }

        let next: Vec<Arc<CompiledRule>> = current
            .iter()
            .filter(|r| r.name() != name)
            .cloned()
            .collect();
        self.rules.store(Arc::new(next));
        info!("规则已删除: {}", name);
        true
    }

    /// 整体替换规则列表
    ///
    /// 先全部编译，全部成功后才原子换入；失败时保留旧列表。
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub fn replace_rules(&self, rules: Vec<Rule>) -> Result<usize> {
        let mut compiler = self.compiler.lock();
        let next = compile_all(&mut compiler, rules)?;

        let count = next.len();
        self.rules.store(Arc::new(next));
        info!("规则列表已替换: {} 条", count);
        Ok(count)
    }

    #[instrument(skip(self))]
    pub fn clear(&self) {
        let _guard = self.compiler.lock();
        let count = self.len();
        self.rules.store(Arc::new(Vec::new()));
        info!("已清空 {} 条规则", count);
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_all(compiler: &mut RuleCompiler, rules: Vec<Rule>) -> Result<Vec<Arc<CompiledRule>>> {
    rules
        .into_iter()
        .map(|rule| {
            let name = rule.name.clone();
            compiler
                .compile(rule)
                .map(Arc::new)
                .map_err(|source| EngineError::Compile { rule: name, source })
        })
        .collect()
}
