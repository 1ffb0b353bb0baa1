//! 远程模块加载集成测试
//!
//! 使用暂停的 tokio 时钟验证单次超时、重试间隔与缓存，
//! 并通过 ChipsLoader 验证远程模块在加载流程中的表现。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chips_loader::module::remote::{
    RemoteContainer, RemoteEntryFetcher, RemoteModuleLoader, SharedScopeRegistry,
};
use chips_loader::{
    ChipsLoader, LoaderConfig, LoaderError, ModuleConfig, ModuleDescriptor, ModuleStatus,
    RemoteLoadOptions, RemoteSpec, RouteDescriptor,
};
use tokio::time::Instant;

const ENTRY: &str = "https://cdn.example.com/billing/remoteEntry.js";

struct BillingContainer;

#[async_trait]
impl RemoteContainer for BillingContainer {
    async fn init(&self, shared_scope: &SharedScopeRegistry) -> anyhow::Result<()> {
        anyhow::ensure!(shared_scope.get("react").is_some(), "shared react missing");
        Ok(())
    }

    async fn get(&self, module: &str) -> anyhow::Result<ModuleConfig> {
        anyhow::ensure!(module == "./billing", "unknown module {}", module);
        Ok(ModuleConfig::new().with_routes(|| vec![RouteDescriptor::new("billing", "/billing")]))
    }
}

/// 前 `hangs` 次调用挂起远超单次超时，之后立即成功
struct HangingFetcher {
    calls: AtomicUsize,
    hangs: usize,
}

impl HangingFetcher {
    fn new(hangs: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            hangs,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteEntryFetcher for HangingFetcher {
    async fn load_entry(&self, _entry: &str, _scope: &str) -> anyhow::Result<Option<Arc<dyn RemoteContainer>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Some(Arc::new(BillingContainer)))
    }
}

/// 总是失败
struct BrokenFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl RemoteEntryFetcher for BrokenFetcher {
    async fn load_entry(&self, _entry: &str, _scope: &str) -> anyhow::Result<Option<Arc<dyn RemoteContainer>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("503 Service Unavailable")
    }
}

fn shared_scope() -> SharedScopeRegistry {
    SharedScopeRegistry::new().with_package("react", "18.2.0").unwrap()
}

fn options(retries: u32, timeout_ms: u64, retry_delay_ms: u64) -> RemoteLoadOptions {
    RemoteLoadOptions {
        retries,
        timeout_ms,
        retry_delay_ms,
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempts_time_out_and_third_succeeds() {
    let fetcher = HangingFetcher::new(2);
    let loader = Arc::new(RemoteModuleLoader::new(
        fetcher.clone(),
        Arc::new(shared_scope()),
        options(3, 50, 1_000),
        8,
    ));

    let started = Instant::now();
    let config = loader.load("billing", &RemoteSpec::new(ENTRY, "billing")).await.unwrap();
    let elapsed = started.elapsed();

    assert!(config.routes_producer().is_some());
    assert_eq!(fetcher.calls(), 3);
    // 两次超时 + 恰好两次重试间隔
    assert!(elapsed >= Duration::from_millis(2 * 50 + 2 * 1_000), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2 * 50 + 3 * 1_000), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_all_attempts_hung_reports_timeout() {
    let fetcher = HangingFetcher::new(usize::MAX);
    let loader = Arc::new(RemoteModuleLoader::new(
        fetcher.clone(),
        Arc::new(shared_scope()),
        options(2, 50, 100),
        8,
    ));

    let err = loader.load("billing", &RemoteSpec::new(ENTRY, "billing")).await.unwrap_err();
    assert!(matches!(err, LoaderError::RemoteTimeout { timeout_ms: 50, .. }));
    assert!(err.is_remote());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_keyed_by_name_and_entry() {
    let fetcher = HangingFetcher::new(0);
    let loader = Arc::new(RemoteModuleLoader::new(
        fetcher.clone(),
        Arc::new(shared_scope()),
        options(1, 50, 0),
        8,
    ));

    loader.load("billing", &RemoteSpec::new(ENTRY, "billing")).await.unwrap();
    loader.load("billing", &RemoteSpec::new(ENTRY, "billing")).await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    let mirror = "https://mirror.example.com/billing/remoteEntry.js";
    loader.load("billing", &RemoteSpec::new(mirror, "billing")).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert!(loader.is_cached("billing", ENTRY));
    assert!(loader.is_cached("billing", mirror));

    loader.clear_cache();
    assert!(!loader.is_cached("billing", ENTRY));
}

#[tokio::test(start_paused = true)]
async fn test_exposed_module_override() {
    let loader = Arc::new(RemoteModuleLoader::new(
        HangingFetcher::new(0),
        Arc::new(shared_scope()),
        options(1, 50, 0),
        8,
    ));

    // 缺省按 "./<模块名>" 查找，容器里没有 ./payments
    let spec = RemoteSpec::new(ENTRY, "billing");
    assert_eq!(spec.exposed_module("payments"), "./payments");
    assert!(loader.load("payments", &spec).await.is_err());

    let spec = spec.with_module("./billing");
    assert_eq!(spec.exposed_module("payments"), "./billing");
    loader.load("payments", &spec).await.unwrap();
    assert!(loader.is_cached("payments", ENTRY));
}

#[tokio::test(start_paused = true)]
async fn test_remote_module_loads_through_facade() {
    let fetcher = HangingFetcher::new(1);
    let config = LoaderConfig::builder().remote(options(2, 50, 200)).build();
    let loader = ChipsLoader::builder(config)
        .remote_fetcher(fetcher.clone())
        .shared_scope(shared_scope())
        .build()
        .unwrap();

    loader
        .add_module(
            ModuleDescriptor::builder("billing")
                .remote(RemoteSpec::new(ENTRY, "billing"))
                .build(),
        )
        .await
        .unwrap();
    loader.start().await.unwrap();
    let report = loader.run_normal_modules().await.unwrap();

    assert_eq!(report.loaded, vec!["billing"]);
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(loader.manager().registered_routes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_failure_marks_module_failed_after_one_retry_cycle() {
    let fetcher = Arc::new(BrokenFetcher {
        calls: AtomicUsize::new(0),
    });
    let config = LoaderConfig::builder().remote(options(3, 50, 10)).build();
    let loader = ChipsLoader::builder(config)
        .remote_fetcher(fetcher.clone())
        .shared_scope(shared_scope())
        .build()
        .unwrap();

    loader
        .add_modules(vec![
            ModuleDescriptor::builder("billing")
                .remote(RemoteSpec::new(ENTRY, "billing"))
                .build(),
            ModuleDescriptor::builder("todo").build(),
        ])
        .await
        .unwrap();
    loader.start().await.unwrap();
    let report = loader.run_normal_modules().await.unwrap();

    assert_eq!(report.failed_names(), vec!["billing"]);
    assert_eq!(report.loaded, vec!["todo"]);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(loader.manager().get_module_status("billing"), ModuleStatus::Failed);
    assert!(matches!(
        loader.manager().get_module_record("billing").and_then(|r| r.error),
        Some(LoaderError::RemoteLoadFailed { attempts: 3, ref cause, .. }) if cause.contains("503")
    ));
}

#[tokio::test]
async fn test_remote_module_without_loader_is_configuration_error() {
    let loader = ChipsLoader::builder(LoaderConfig::default()).build().unwrap();
    loader
        .add_module(
            ModuleDescriptor::builder("billing")
                .remote(RemoteSpec::new(ENTRY, "billing"))
                .build(),
        )
        .await
        .unwrap();

    let err = loader.load_module("billing", None).await.unwrap_err();
    assert!(matches!(err, LoaderError::Configuration(_)));
}
