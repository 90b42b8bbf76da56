//! 事实定义
//!
//! 事实是一个具名输入值：常量，或在求值时按需计算。
//! 动态事实的计算函数在注册时就确定为无参或带参两种形式之一。

use crate::compiler::canonical_json;
use crate::error::FactError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// 事实计算参数
pub type FactParams = Map<String, Value>;

type NoArgsFn = dyn Fn() -> Result<Value, FactError> + Send + Sync;
type WithParamsFn = dyn Fn(&FactParams) -> Result<Value, FactError> + Send + Sync;

/// 动态事实的计算函数
#[derive(Clone)]
pub enum FactFn {
    /// 不接受参数
    NoArgs(Arc<NoArgsFn>),
    /// 接受条件上携带的参数
    WithParams(Arc<WithParamsFn>),
}

impl FactFn {
    fn call(&self, params: &FactParams) -> Result<Value, FactError> {
        match self {
            Self::NoArgs(f) => f(),
            Self::WithParams(f) => f(params),
        }
    }
}

impl fmt::Debug for FactFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoArgs(_) => f.write_str("FactFn::NoArgs"),
            Self::WithParams(_) => f.write_str("FactFn::WithParams"),
        }
    }
}

/// 事实值来源
#[derive(Debug, Clone)]
pub enum FactSource {
    Constant(Value),
    Dynamic(FactFn),
}

/// 事实
#[derive(Debug, Clone)]
pub struct Fact {
    name: String,
    source: FactSource,
    cache: bool,
    priority: i32,
    metadata: Map<String, Value>,
}

impl Fact {
    /// 常量事实，默认不缓存
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            source: FactSource::Constant(value.into()),
            cache: false,
            priority: 0,
            metadata: Map::new(),
        }
    }

    /// 无参动态事实，默认缓存
    pub fn dynamic<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<Value, FactError> + Send + Sync + 'static,
    {
        Self::from_fn(name, FactFn::NoArgs(Arc::new(f)))
    }

    /// 带参动态事实，默认缓存
    pub fn with_params<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&FactParams) -> Result<Value, FactError> + Send + Sync + 'static,
    {
        Self::from_fn(name, FactFn::WithParams(Arc::new(f)))
    }

    fn from_fn(name: impl Into<String>, f: FactFn) -> Self {
        Self {
            name: name.into(),
            source: FactSource::Dynamic(f),
            cache: true,
            priority: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &FactSource {
        &self.source
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, FactSource::Dynamic(_))
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// 缓存键只取决于事实名和参数，不依赖事实的值
    pub fn cache_key(&self, params: &FactParams) -> String {
        format!("fact:{}#{}", self.name, Self::params_key(params))
    }

    /// 同一事实下区分不同参数的键；无参数时为空串
    pub(crate) fn params_key(params: &FactParams) -> String {
        if params.is_empty() {
            String::new()
        } else {
            canonical_json(&Value::Object(params.clone()))
        }
    }

    /// 计算事实值（不经过缓存）
    pub fn compute(&self, params: &FactParams) -> Result<Value, FactError> {
        match &self.source {
            FactSource::Constant(value) => Ok(value.clone()),
            FactSource::Dynamic(f) => f.call(params),
        }
    }
}
