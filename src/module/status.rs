//! 模块状态跟踪
//!
//! 每个模块名对应一个状态机：
//!
//! ```text
//! PENDING -> LOADING -> PRELOADED -> LOADED
//!                   \-> LOADED
//!                   \-> FAILED
//! ```
//!
//! 并发控制只有一处：[`InflightRegistry`]。同一个键上同时只存在一个进行中的加载，
//! 后来的调用者直接等待同一个共享 future。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::utils::{LoaderError, Result};

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleStatus {
    /// 尚未开始
    Pending,
    /// 正在加载
    Loading,
    /// 路由与翻译已注册，初始化钩子尚未执行
    Preloaded,
    /// 初始化钩子已执行
    Loaded,
    /// 本次加载失败
    Failed,
}

impl Default for ModuleStatus {
    fn default() -> Self {
        ModuleStatus::Pending
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Pending => "PENDING",
            ModuleStatus::Loading => "LOADING",
            ModuleStatus::Preloaded => "PRELOADED",
            ModuleStatus::Loaded => "LOADED",
            ModuleStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// 单个模块的状态记录
#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub status: ModuleStatus,
    pub updated_at: DateTime<Utc>,
    /// 状态为 FAILED 时的错误
    pub error: Option<LoaderError>,
}

/// 状态变更事件
#[derive(Debug, Clone)]
pub struct StatusChangeEvent {
    pub module_name: String,
    pub previous_status: ModuleStatus,
    pub new_status: ModuleStatus,
    pub timestamp: DateTime<Utc>,
    pub error: Option<LoaderError>,
}

/// 状态观察者
pub type StatusObserver = Arc<dyn Fn(&StatusChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// 观察者订阅 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ============================================================================
// 进行中加载的去重
// ============================================================================

/// 可被多个等待者共享的加载结果
pub type SharedLoad<T> = Shared<BoxFuture<'static, Result<T>>>;

/// 进行中加载的登记表
///
/// 同一个键在结束前只会调用一次工厂函数，所有调用者拿到同一个共享 future，
/// 看到同一个成功值或同一个错误。
pub struct InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Arc<Mutex<InflightEntries<T>>>,
    next_ticket: AtomicU64,
}

type InflightEntries<T> = HashMap<String, (u64, SharedLoad<T>)>;

/// 只移除指定票据的登记，已被替换的新登记保持不变
fn release_ticket<T>(entries: &Mutex<InflightEntries<T>>, key: &str, ticket: u64) {
    let mut entries = entries.lock();
    if entries.get(key).map(|(t, _)| *t == ticket).unwrap_or(false) {
        entries.remove(key);
    }
}

impl<T> InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// 返回已登记的共享 future；没有时调用 `factory` 创建并登记
    ///
    /// 结束后由调用者通过 [`remove`](Self::remove) 移除。
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> SharedLoad<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        self.entry(key, factory).1
    }

    /// 去重执行：等待结果并在结束后移除登记
    ///
    /// 新建的加载由后台任务推进，等待者超时放弃后加载仍会完成并移除登记。
    pub async fn run<F>(&self, key: &str, factory: F) -> Result<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let (ticket, shared, created) = self.entry(key, factory);
        if created {
            self.drive(key, ticket, shared.clone());
        }
        let result = shared.await;
        release_ticket(&self.entries, key, ticket);
        result
    }

    /// 移除登记
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn entry<F>(&self, key: &str, factory: F) -> (u64, SharedLoad<T>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut entries = self.entries.lock();
        if let Some((ticket, shared)) = entries.get(key) {
            debug!(key = %key, "复用进行中的加载");
            return (*ticket, shared.clone(), false);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let shared = factory().shared();
        entries.insert(key.to_string(), (ticket, shared.clone()));
        (ticket, shared, true)
    }

    /// 在运行时上推进共享 future，结束后移除登记
    fn drive(&self, key: &str, ticket: u64, shared: SharedLoad<T>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let entries = Arc::clone(&self.entries);
        let key = key.to_string();
        handle.spawn(async move {
            let _ = shared.await;
            release_ticket(&entries, &key, ticket);
        });
    }
}

impl<T> Default for InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// 状态跟踪器
// ============================================================================

/// 模块状态跟踪器
pub struct StatusTracker {
    records: RwLock<HashMap<String, StatusRecord>>,
    observers: RwLock<Vec<(SubscriptionId, StatusObserver)>>,
    next_subscription: AtomicU64,
    preloading: InflightRegistry<()>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            preloading: InflightRegistry::new(),
        }
    }

    // ==================== 状态变更 ====================

    pub fn mark_loading(&self, module_name: &str) {
        self.transition(module_name, ModuleStatus::Loading, None);
    }

    pub fn mark_preloaded(&self, module_name: &str) {
        self.transition(module_name, ModuleStatus::Preloaded, None);
    }

    pub fn mark_loaded(&self, module_name: &str) {
        self.transition(module_name, ModuleStatus::Loaded, None);
    }

    pub fn mark_failed(&self, module_name: &str, error: LoaderError) {
        self.transition(module_name, ModuleStatus::Failed, Some(error));
    }

    fn transition(&self, module_name: &str, new_status: ModuleStatus, error: Option<LoaderError>) {
        let event = {
            let mut records = self.records.write();
            let previous_status = records.get(module_name).map(|r| r.status).unwrap_or_default();
            let timestamp = Utc::now();
            records.insert(
                module_name.to_string(),
                StatusRecord {
                    status: new_status,
                    updated_at: timestamp,
                    error: error.clone(),
                },
            );
            StatusChangeEvent {
                module_name: module_name.to_string(),
                previous_status,
                new_status,
                timestamp,
                error,
            }
        };

        match event.error {
            Some(ref e) => warn!(
                module = %module_name,
                from = %event.previous_status,
                error_code = e.error_code(),
                error = %e,
                "模块加载失败"
            ),
            None if new_status == ModuleStatus::Loaded => {
                info!(module = %module_name, from = %event.previous_status, "模块已加载")
            }
            None => debug!(module = %module_name, from = %event.previous_status, to = %new_status, "模块状态变更"),
        }

        self.notify(&event);
    }

    // ==================== 观察者 ====================

    /// 订阅状态变更
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StatusChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// 取消订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    fn notify(&self, event: &StatusChangeEvent) {
        let observers: Vec<StatusObserver> = self.observers.read().iter().map(|(_, o)| Arc::clone(o)).collect();

        for observer in observers {
            // 观察者的错误或 panic 不影响其余观察者
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(module = %event.module_name, error = %e, "状态观察者返回错误"),
                Err(_) => error!(module = %event.module_name, "状态观察者 panic"),
            }
        }
    }

    // ==================== 去重 ====================

    /// 取得模块进行中的加载；没有时调用 `factory` 创建
    pub fn get_or_create_preloading<F>(&self, module_name: &str, factory: F) -> SharedLoad<()>
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>>,
    {
        self.preloading.get_or_create(module_name, factory)
    }

    /// 移除进行中的加载登记
    pub fn clear_preloading(&self, module_name: &str) -> bool {
        self.preloading.remove(module_name)
    }

    /// 去重执行一次加载并在结束后移除登记
    pub async fn run_preloading<F>(&self, module_name: &str, factory: F) -> Result<()>
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>>,
    {
        self.preloading.run(module_name, factory).await
    }

    pub fn is_preloading(&self, module_name: &str) -> bool {
        self.preloading.contains(module_name)
    }

    // ==================== 查询 ====================

    /// 当前状态，从未变更过的模块为 PENDING
    pub fn status(&self, module_name: &str) -> ModuleStatus {
        self.records.read().get(module_name).map(|r| r.status).unwrap_or_default()
    }

    pub fn record(&self, module_name: &str) -> Option<StatusRecord> {
        self.records.read().get(module_name).cloned()
    }

    /// 模块最近一次失败的错误
    pub fn last_error(&self, module_name: &str) -> Option<LoaderError> {
        self.records.read().get(module_name).and_then(|r| r.error.clone())
    }

    pub fn is_loaded(&self, module_name: &str) -> bool {
        self.status(module_name) == ModuleStatus::Loaded
    }

    pub fn is_preloaded(&self, module_name: &str) -> bool {
        self.status(module_name) == ModuleStatus::Preloaded
    }

    pub fn is_preloaded_or_loaded(&self, module_name: &str) -> bool {
        matches!(self.status(module_name), ModuleStatus::Preloaded | ModuleStatus::Loaded)
    }

    pub fn is_loaded_or_loading(&self, module_name: &str) -> bool {
        matches!(self.status(module_name), ModuleStatus::Loaded | ModuleStatus::Loading)
    }

    pub fn is_failed(&self, module_name: &str) -> bool {
        self.status(module_name) == ModuleStatus::Failed
    }

    /// 全部状态快照，按模块名排序
    pub fn snapshot(&self) -> Vec<(String, StatusRecord)> {
        let mut records: Vec<_> = self
            .records
            .read()
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("modules", &self.records.read().len())
            .field("observers", &self.observers.read().len())
            .field("inflight", &self.preloading.len())
            .finish()
    }
}
