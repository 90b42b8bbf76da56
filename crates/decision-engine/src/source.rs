//! 规则源与热重载
//!
//! `RuleSource` 是拉取式的规则提供者；`RuleReloader` 按固定间隔拉取，
//! 拉到非空列表时整体替换引擎的规则，空列表表示没有变化。
//! 拉取或编译失败只会通知错误回调，当前生效的规则保持不变。

use crate::error::SourceError;
use crate::models::Rule;
use crate::store::RuleStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

/// 规则提供者
///
/// `cancel` 变为 `true` 时应尽快返回 `SourceError::Cancelled`。
/// 返回空列表表示规则没有变化。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn fetch_rules(&self, cancel: watch::Receiver<bool>) -> Result<Vec<Rule>, SourceError>;
}

/// 规则文档：规则数组，或 `{"rules": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    List(Vec<Rule>),
    Wrapped { rules: Vec<Rule> },
}

impl RuleDocument {
    fn into_rules(self) -> Vec<Rule> {
        match self {
            Self::List(rules) | Self::Wrapped { rules } => rules,
        }
    }
}

/// 从本地 JSON 文件读取规则
///
/// 文件修改时间与上次成功读取时相同则视为没有变化。
pub struct JsonFileSource {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            last_modified: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleSource for JsonFileSource {
    async fn fetch_rules(&self, cancel: watch::Receiver<bool>) -> Result<Vec<Rule>, SourceError> {
        if *cancel.borrow() {
            return Err(SourceError::Cancelled);
        }

        let modified = tokio::fs::metadata(&self.path).await?.modified()?;
        if *self.last_modified.lock() == Some(modified) {
            debug!(path = %self.path.display(), "规则文件未变化");
            return Ok(Vec::new());
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let document: RuleDocument = serde_json::from_str(&contents)?;

        *self.last_modified.lock() = Some(modified);
        Ok(document.into_rules())
    }
}

/// 单次重载的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    /// 已替换为给定数量的规则
    Updated(usize),
    Unchanged,
}

type UpdateCallback = Arc<dyn Fn(usize) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&SourceError) + Send + Sync>;

/// 规则热重载器
#[derive(Clone)]
pub struct RuleReloader {
    source: Arc<dyn RuleSource>,
    store: RuleStore,
    interval: Duration,
    on_update: Option<UpdateCallback>,
    on_error: Option<ErrorCallback>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RuleReloader {
    pub fn new(source: Arc<dyn RuleSource>, store: RuleStore, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            source,
            store,
            interval,
            on_update: None,
            on_error: None,
            shutdown_tx,
            shutdown_rx,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// 规则替换成功后调用，参数为新规则数量
    pub fn on_update(mut self, callback: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(callback));
        self
    }

    /// 拉取或安装失败时调用
    pub fn on_error(mut self, callback: impl Fn(&SourceError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 拉取一次并在有变化时替换规则
    #[instrument(skip(self))]
    pub async fn reload_once(&self) -> Result<ReloadStatus, SourceError> {
        let result = self.fetch_and_install().await;
        match &result {
            Ok(ReloadStatus::Updated(count)) => {
                info!(rules = count, "规则已重新加载");
                if let Some(callback) = &self.on_update {
                    callback(*count);
                }
            }
            Ok(ReloadStatus::Unchanged) => debug!("规则源无变化"),
            Err(e) => {
                error!(error = %e, "规则重新加载失败，保留当前规则");
                if let Some(callback) = &self.on_error {
                    callback(e);
                }
            }
        }
        result
    }

    async fn fetch_and_install(&self) -> Result<ReloadStatus, SourceError> {
        let rules = self.source.fetch_rules(self.shutdown_rx.clone()).await?;
        if rules.is_empty() {
            return Ok(ReloadStatus::Unchanged);
        }

        let count = self
            .store
            .replace_rules(rules)
            .map_err(|e| SourceError::Install(Box::new(e)))?;
        Ok(ReloadStatus::Updated(count))
    }

    /// 启动后台轮询；首次拉取立即进行
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("规则重载器已在运行");
            return;
        }

        let reloader = self.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reloader.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = reloader.interval.as_millis() as u64, "规则重载器已启动");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = reloader.reload_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则重载器已停止");
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// 停止后台轮询并等待其退出
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RULES: &str = r#"[
        {"name": "adult", "conditions": {"all": [{"fact": "age", "operator": "greater_than", "value": 18}]}},
        {"name": "senior", "priority": 2, "conditions": {"all": [{"fact": "age", "operator": "greater_than", "value": 65}]}}
    ]"#;

    fn rule(name: &str) -> Rule {
        Rule::from_json(&format!(
            r#"{{"name": "{name}", "conditions": {{"all": [{{"fact": "x", "operator": "equal", "value": 1}}]}}}}"#
        ))
        .unwrap()
    }

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_file_source_reads_and_detects_no_change() {
        let file = write_file(RULES);
        let source = JsonFileSource::new(file.path());

        let rules = source.fetch_rules(no_cancel()).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].priority, 2);

        assert!(source.fetch_rules(no_cancel()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_source_sees_modification() {
        let file = write_file(RULES);
        let source = JsonFileSource::new(file.path());
        source.fetch_rules(no_cancel()).await.unwrap();

        std::fs::write(
            file.path(),
            r#"{"rules": [{"name": "only", "conditions": {}}]}"#,
        )
        .unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(later)
            .unwrap();

        let rules = source.fetch_rules(no_cancel()).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "only");
    }

    #[tokio::test]
    async fn test_file_source_errors() {
        let missing = JsonFileSource::new("/nonexistent/rules.json");
        assert!(matches!(
            missing.fetch_rules(no_cancel()).await,
            Err(SourceError::Io(_))
        ));

        let file = write_file("{not json");
        let broken = JsonFileSource::new(file.path());
        assert!(matches!(
            broken.fetch_rules(no_cancel()).await,
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_file_source_cancelled() {
        let file = write_file(RULES);
        let source = JsonFileSource::new(file.path());
        let (_tx, rx) = watch::channel(true);
        assert!(matches!(
            source.fetch_rules(rx).await,
            Err(SourceError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_reload_replaces_rules() {
        let mut source = MockRuleSource::new();
        source
            .expect_fetch_rules()
            .times(1)
            .returning(|_| Ok(vec![rule("a"), rule("b")]));

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let store = RuleStore::new();
        store.add_rule(rule("old")).unwrap();

        let reloader = RuleReloader::new(Arc::new(source), store.clone(), Duration::from_secs(60))
            .on_update(move |count| {
                counter.store(count, Ordering::SeqCst);
            });

        assert_eq!(reloader.reload_once().await.unwrap(), ReloadStatus::Updated(2));
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert!(!store.contains("old"));
        assert!(store.contains("b"));
    }

    #[tokio::test]
    async fn test_empty_fetch_keeps_rules() {
        let mut source = MockRuleSource::new();
        source.expect_fetch_rules().returning(|_| Ok(Vec::new()));

        let store = RuleStore::new();
        store.add_rule(rule("current")).unwrap();
        let reloader = RuleReloader::new(Arc::new(source), store.clone(), Duration::from_secs(60));

        assert_eq!(reloader.reload_once().await.unwrap(), ReloadStatus::Unchanged);
        assert!(store.contains("current"));
    }

    #[tokio::test]
    async fn test_fetch_error_reported_and_rules_kept() {
        let mut source = MockRuleSource::new();
        source
            .expect_fetch_rules()
            .returning(|_| Err(SourceError::Fetch("503 Service Unavailable".to_string())));

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        let store = RuleStore::new();
        store.add_rule(rule("current")).unwrap();
        let reloader = RuleReloader::new(Arc::new(source), store.clone(), Duration::from_secs(60))
            .on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert!(reloader.reload_once().await.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(store.contains("current"));
    }

    #[tokio::test]
    async fn test_invalid_rule_is_install_error() {
        let mut source = MockRuleSource::new();
        source
            .expect_fetch_rules()
            .returning(|_| Ok(vec![rule("good"), Rule::new("", Default::default())]));

        let store = RuleStore::new();
        store.add_rule(rule("current")).unwrap();
        let reloader = RuleReloader::new(Arc::new(source), store.clone(), Duration::from_secs(60));

        assert!(matches!(
            reloader.reload_once().await,
            Err(SourceError::Install(_))
        ));
        assert!(store.contains("current"));
        assert!(!store.contains("good"));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut source = MockRuleSource::new();
        source.expect_fetch_rules().returning(|_| Ok(vec![rule("polled")]));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let store = RuleStore::new();
        let reloader = RuleReloader::new(Arc::new(source), store.clone(), Duration::from_millis(10))
            .on_update(move |count| {
                let _ = tx.send(count);
            });

        reloader.start();
        assert!(reloader.is_running());

        let count = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.contains("polled"));

        reloader.stop().await;
        assert!(!reloader.is_running());
    }
}
