//! 远程模块加载
//!
//! 配置不随宿主打包、需要从远程入口的联邦容器拉取的模块。
//!
//! 每次尝试都有独立超时，失败后等待固定间隔再重试；成功结果按 `(模块名, 入口)` 缓存，
//! 同一个键的并发请求共用一次加载。

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::FutureExt;
use lru::LruCache;
use parking_lot::Mutex;
use semver::{Version, VersionReq};
use tracing::{debug, info, warn};

use crate::core::config::RemoteLoadOptions;
use crate::module::metadata::{ModuleConfig, RemoteSpec};
use crate::module::status::InflightRegistry;
use crate::utils::error::render_cause;
use crate::utils::{LoaderError, Result};

// ============================================================================
// 共享作用域
// ============================================================================

/// 联邦共享作用域
///
/// 宿主启动时填充一次，交给加载器后只读。
#[derive(Debug, Clone, Default)]
pub struct SharedScopeRegistry {
    packages: HashMap<String, Version>,
}

impl SharedScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记共享包
    pub fn register(&mut self, package: impl Into<String>, version: Version) -> &mut Self {
        self.packages.insert(package.into(), version);
        self
    }

    /// 以版本字符串登记共享包
    pub fn with_package(mut self, package: impl Into<String>, version: &str) -> Result<Self> {
        let package = package.into();
        let version = Version::parse(version).map_err(|e| {
            LoaderError::Configuration(format!("共享包 '{}' 的版本无效: {}", package, e))
        })?;
        self.packages.insert(package, version);
        Ok(self)
    }

    pub fn get(&self, package: &str) -> Option<&Version> {
        self.packages.get(package)
    }

    /// 返回满足版本要求的共享包版本
    pub fn resolve(&self, package: &str, requirement: &VersionReq) -> Option<&Version> {
        self.packages.get(package).filter(|v| requirement.matches(v))
    }

    pub fn packages(&self) -> impl Iterator<Item = (&str, &Version)> {
        self.packages.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

// ============================================================================
// 远程容器
// ============================================================================

/// 远程入口暴露的联邦容器
#[async_trait]
pub trait RemoteContainer: Send + Sync {
    /// 用共享作用域初始化容器
    async fn init(&self, shared_scope: &SharedScopeRegistry) -> anyhow::Result<()>;

    /// 取得暴露的模块配置
    async fn get(&self, module: &str) -> anyhow::Result<ModuleConfig>;
}

/// 远程入口拉取器
#[async_trait]
pub trait RemoteEntryFetcher: Send + Sync {
    /// 拉取入口并返回 `scope` 对应的容器；入口中没有该容器时返回 `None`
    async fn load_entry(&self, entry: &str, scope: &str) -> anyhow::Result<Option<Arc<dyn RemoteContainer>>>;
}

// ============================================================================
// 加载器
// ============================================================================

type CacheKey = (String, String);

enum AttemptError {
    ContainerNotFound,
    Failed(String),
    TimedOut,
}

/// 远程模块加载器
pub struct RemoteModuleLoader {
    fetcher: Arc<dyn RemoteEntryFetcher>,
    shared_scope: Arc<SharedScopeRegistry>,
    options: RemoteLoadOptions,
    cache: Mutex<LruCache<CacheKey, Arc<ModuleConfig>>>,
    inflight: InflightRegistry<Arc<ModuleConfig>>,
}

impl RemoteModuleLoader {
    pub fn new(
        fetcher: Arc<dyn RemoteEntryFetcher>,
        shared_scope: Arc<SharedScopeRegistry>,
        options: RemoteLoadOptions,
        cache_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fetcher,
            shared_scope,
            options,
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: InflightRegistry::new(),
        }
    }

    pub fn options(&self) -> RemoteLoadOptions {
        self.options
    }

    pub fn shared_scope(&self) -> &SharedScopeRegistry {
        &self.shared_scope
    }

    /// 加载远程模块配置
    pub async fn load(self: &Arc<Self>, module_name: &str, spec: &RemoteSpec) -> Result<Arc<ModuleConfig>> {
        let key = (module_name.to_string(), spec.entry.clone());
        let cached = self.cache.lock().get(&key).cloned();
        if let Some(config) = cached {
            debug!(module = %module_name, entry = %spec.entry, "命中远程模块缓存");
            return Ok(config);
        }

        let inflight_key = format!("{}@{}", module_name, spec.entry);
        let this = Arc::clone(self);
        let name = module_name.to_string();
        let spec = spec.clone();
        self.inflight
            .run(&inflight_key, move || async move { this.load_with_retry(&name, &spec).await }.boxed())
            .await
    }

    /// 清空缓存
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn is_cached(&self, module_name: &str, entry: &str) -> bool {
        self.cache.lock().contains(&(module_name.to_string(), entry.to_string()))
    }

    async fn load_with_retry(&self, module_name: &str, spec: &RemoteSpec) -> Result<Arc<ModuleConfig>> {
        let attempts = self.options.attempts();
        let mut last_error = AttemptError::Failed("未进行任何尝试".to_string());

        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(self.options.timeout(), self.attempt(module_name, spec)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AttemptError::TimedOut),
            };

            match outcome {
                Ok(config) => {
                    let config = Arc::new(config);
                    self.cache
                        .lock()
                        .put((module_name.to_string(), spec.entry.clone()), Arc::clone(&config));
                    info!(module = %module_name, entry = %spec.entry, attempt, "远程模块加载完成");
                    return Ok(config);
                }
                Err(e) => {
                    let reason = match e {
                        AttemptError::ContainerNotFound => "容器未找到".to_string(),
                        AttemptError::Failed(ref cause) => cause.clone(),
                        AttemptError::TimedOut => format!("超时 ({}ms)", self.options.timeout_ms),
                    };
                    warn!(
                        module = %module_name,
                        entry = %spec.entry,
                        attempt,
                        max_attempts = attempts,
                        reason = %reason,
                        "远程模块加载尝试失败"
                    );
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.options.retry_delay()).await;
            }
        }

        Err(match last_error {
            AttemptError::ContainerNotFound => LoaderError::RemoteContainerNotFound {
                module_name: module_name.to_string(),
                entry: spec.entry.clone(),
                scope: spec.scope.clone(),
            },
            AttemptError::TimedOut => LoaderError::RemoteTimeout {
                module_name: module_name.to_string(),
                entry: spec.entry.clone(),
                timeout_ms: self.options.timeout_ms,
            },
            AttemptError::Failed(cause) => LoaderError::RemoteLoadFailed {
                module_name: module_name.to_string(),
                entry: spec.entry.clone(),
                attempts,
                cause,
            },
        })
    }

    async fn attempt(&self, module_name: &str, spec: &RemoteSpec) -> std::result::Result<ModuleConfig, AttemptError> {
        let container = self
            .fetcher
            .load_entry(&spec.entry, &spec.scope)
            .await
            .map_err(|e| AttemptError::Failed(render_cause(&e)))?
            .ok_or(AttemptError::ContainerNotFound)?;

        container
            .init(&self.shared_scope)
            .await
            .map_err(|e| AttemptError::Failed(render_cause(&e)))?;

        container
            .get(&spec.exposed_module(module_name))
            .await
            .map_err(|e| AttemptError::Failed(render_cause(&e)))
    }
}

impl fmt::Debug for RemoteModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteModuleLoader")
            .field("options", &self.options)
            .field("shared_packages", &self.shared_scope.len())
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticContainer;

    #[async_trait]
    impl RemoteContainer for StaticContainer {
        async fn init(&self, shared_scope: &SharedScopeRegistry) -> anyhow::Result<()> {
            let react = VersionReq::parse("^18").map_err(anyhow::Error::from)?;
            shared_scope
                .resolve("react", &react)
                .map(|_| ())
                .ok_or_else(|| anyhow::anyhow!("shared react ^18 missing"))
        }

        async fn get(&self, module: &str) -> anyhow::Result<ModuleConfig> {
            anyhow::ensure!(module == "./billing", "unexpected module {}", module);
            Ok(ModuleConfig::new())
        }
    }

    /// 前 `failures` 次返回错误，之后成功
    struct FlakyFetcher {
        calls: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    #[async_trait]
    impl RemoteEntryFetcher for FlakyFetcher {
        async fn load_entry(&self, _entry: &str, scope: &str) -> anyhow::Result<Option<Arc<dyn RemoteContainer>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                anyhow::bail!("network error on call {}", call);
            }
            if scope != "billing" {
                return Ok(None);
            }
            Ok(Some(Arc::new(StaticContainer)))
        }
    }

    fn scope() -> Arc<SharedScopeRegistry> {
        Arc::new(SharedScopeRegistry::new().with_package("react", "18.2.0").unwrap())
    }

    fn loader(failures: usize, retries: u32) -> (Arc<RemoteModuleLoader>, Arc<FlakyFetcher>) {
        let fetcher = Arc::new(FlakyFetcher {
            calls: AtomicUsize::new(0),
            failures,
            delay: Duration::from_millis(5),
        });
        let options = RemoteLoadOptions {
            retries,
            timeout_ms: 1_000,
            retry_delay_ms: 100,
        };
        let loader = Arc::new(RemoteModuleLoader::new(fetcher.clone(), scope(), options, 8));
        (loader, fetcher)
    }

    fn spec() -> RemoteSpec {
        RemoteSpec::new("https://cdn.example.com/remoteEntry.js", "billing")
    }

    #[test]
    fn test_shared_scope_resolve() {
        let scope = scope();
        assert!(scope.resolve("react", &VersionReq::parse("^18.0").unwrap()).is_some());
        assert!(scope.resolve("react", &VersionReq::parse("^17").unwrap()).is_none());
        assert!(scope.get("vue").is_none());
        assert!(SharedScopeRegistry::new().with_package("react", "not-a-version").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success_and_caches() {
        let (loader, fetcher) = loader(2, 3);
        loader.load("billing", &spec()).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert!(loader.is_cached("billing", &spec().entry));

        loader.load("billing", &spec()).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let (loader, fetcher) = loader(10, 2);
        let err = loader.load("billing", &spec()).await.unwrap_err();
        assert!(matches!(err, LoaderError::RemoteLoadFailed { attempts: 2, .. }));
        assert!(err.to_string().contains("network error"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(!loader.is_cached("billing", &spec().entry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container() {
        let (loader, _) = loader(0, 1);
        let err = loader
            .load("billing", &RemoteSpec::new("https://cdn.example.com/remoteEntry.js", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::RemoteContainerNotFound { ref scope, .. } if scope == "other"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_share_one_fetch() {
        let (loader, fetcher) = loader(0, 1);
        let s = spec();
        let (a, b) = futures::join!(loader.load("billing", &s), loader.load("billing", &s));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
