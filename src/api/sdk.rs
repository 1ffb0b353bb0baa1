//! ChipsLoader SDK
//!
//! 模块编排引擎的主要对外接口。根据配置装配注册表、远程加载器与模块管理器，
//! 并按宿主的渲染节奏驱动两阶段加载：
//!
//! 1. 首屏渲染前 [`ChipsLoader::start`] 加载全部 INIT 模块
//! 2. 首屏渲染后 [`ChipsLoader::run_normal_modules`] 按依赖层级加载 NORMAL 模块
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_loader::api::host::{HostBindings, MemoryRouteRegistrar};
//! use chips_loader::{ChipsLoader, LoaderConfig, ModuleDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new()));
//!     let loader = ChipsLoader::builder(LoaderConfig::default()).host(host).build()?;
//!
//!     loader.add_module(ModuleDescriptor::builder("core").init().build()).await?;
//!     loader.start().await?;
//!     loader.run_normal_modules().await?;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::api::host::{HostBindings, MemoryRouteRegistrar};
use crate::core::config::LoaderConfig;
use crate::module::loader::{LoadReport, PreloadReport};
use crate::module::manager::ModuleManager;
use crate::module::metadata::ModuleDescriptor;
use crate::module::parser::ManifestParser;
use crate::module::registry::ModuleRegistry;
use crate::module::remote::{RemoteEntryFetcher, RemoteModuleLoader, SharedScopeRegistry};
use crate::module::status::ModuleStatus;
use crate::utils::logger::{LogGuard, Logger, LoggerConfig};
use crate::utils::Result;

/// 各状态的模块数量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoaderSummary {
    pub total: usize,
    pub pending: usize,
    pub loading: usize,
    pub preloaded: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// 模块编排引擎入口
pub struct ChipsLoader {
    config: LoaderConfig,
    manager: ModuleManager,
    remote: Option<Arc<RemoteModuleLoader>>,
    _log_guard: Option<LogGuard>,
}

impl ChipsLoader {
    /// 创建构建器
    pub fn builder(config: LoaderConfig) -> ChipsLoaderBuilder {
        ChipsLoaderBuilder::new(config)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn manager(&self) -> &ModuleManager {
        &self.manager
    }

    /// 远程模块加载器（配置了远程入口获取器时存在）
    pub fn remote_loader(&self) -> Option<&Arc<RemoteModuleLoader>> {
        self.remote.as_ref()
    }

    // ========================================================================
    // 模块注册
    // ========================================================================

    /// 添加模块
    pub async fn add_module(&self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        self.manager.add_module(descriptor).await
    }

    /// 批量添加模块
    pub async fn add_modules(&self, descriptors: Vec<ModuleDescriptor>) -> Result<Vec<Arc<ModuleDescriptor>>> {
        self.manager.add_modules(descriptors).await
    }

    /// 从清单文件添加模块
    pub async fn add_manifest(&self, path: impl AsRef<Path>) -> Result<Vec<Arc<ModuleDescriptor>>> {
        let path = path.as_ref();
        let descriptors = ManifestParser::load_descriptors(path).await?;
        info!(path = %path.display(), modules = descriptors.len(), "从清单添加模块");
        self.manager.add_modules(descriptors).await
    }

    // ========================================================================
    // 加载
    // ========================================================================

    /// 加载全部 INIT 模块（首屏渲染前调用）
    pub async fn start(&self) -> Result<LoadReport> {
        info!("启动模块编排引擎 v{}", crate::VERSION);
        self.manager.run_init_modules().await
    }

    /// 加载全部 NORMAL 模块（首屏渲染后调用）
    pub async fn run_normal_modules(&self) -> Result<LoadReport> {
        self.manager.run_normal_modules().await
    }

    /// 预加载 NORMAL 模块的路由与翻译资源
    pub async fn preload_routes(&self) -> PreloadReport {
        self.manager.preload_routes().await
    }

    /// 按名称加载模块
    pub async fn load_module(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.manager.load_module_by_name(name, timeout).await
    }

    /// 加载路由所属的模块
    pub async fn load_route(&self, route_name: &str) -> Result<()> {
        self.manager.auto_load_module_by_route(route_name).await
    }

    /// 各状态的模块数量
    pub fn summary(&self) -> LoaderSummary {
        let names = self.manager.registry().names();
        let mut summary = LoaderSummary {
            total: names.len(),
            ..LoaderSummary::default()
        };
        for name in &names {
            match self.manager.get_module_status(name) {
                ModuleStatus::Pending => summary.pending += 1,
                ModuleStatus::Loading => summary.loading += 1,
                ModuleStatus::Preloaded => summary.preloaded += 1,
                ModuleStatus::Loaded => summary.loaded += 1,
                ModuleStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

impl std::fmt::Debug for ChipsLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChipsLoader")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// ChipsLoader 构建器
pub struct ChipsLoaderBuilder {
    config: LoaderConfig,
    host: Option<HostBindings>,
    fetcher: Option<Arc<dyn RemoteEntryFetcher>>,
    shared_scope: SharedScopeRegistry,
    init_logging: bool,
}

impl ChipsLoaderBuilder {
    fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            host: None,
            fetcher: None,
            shared_scope: SharedScopeRegistry::new(),
            init_logging: false,
        }
    }

    /// 宿主协作方；缺省时使用内存路由注册器
    pub fn host(mut self, host: HostBindings) -> Self {
        self.host = Some(host);
        self
    }

    /// 远程入口获取器
    pub fn remote_fetcher(mut self, fetcher: Arc<dyn RemoteEntryFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 联邦共享作用域
    pub fn shared_scope(mut self, shared_scope: SharedScopeRegistry) -> Self {
        self.shared_scope = shared_scope;
        self
    }

    /// 按配置初始化日志系统
    pub fn with_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    /// 构建
    ///
    /// # Errors
    ///
    /// 配置取值无效时返回 `Configuration` 错误
    pub fn build(self) -> Result<ChipsLoader> {
        self.config.validate()?;

        let log_guard = self
            .init_logging
            .then(|| Logger::try_init(LoggerConfig::from_log_config(&self.config.logging)));

        let remote = self.fetcher.map(|fetcher| {
            Arc::new(RemoteModuleLoader::new(
                fetcher,
                Arc::new(self.shared_scope),
                self.config.remote,
                self.config.loading.remote_cache_capacity,
            ))
        });

        let registry = match remote {
            Some(ref remote) => ModuleRegistry::with_remote_loader(Arc::clone(remote)),
            None => ModuleRegistry::new(),
        };
        let host = self
            .host
            .unwrap_or_else(|| HostBindings::new(Arc::new(MemoryRouteRegistrar::new())));

        let manager = ModuleManager::new(Arc::new(registry), host, &self.config);
        debug!(remote = remote.is_some(), dev_mode = self.config.dev_mode, "模块编排引擎已装配");

        Ok(ChipsLoader {
            config: self.config,
            manager,
            remote,
            _log_guard: log_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{ModuleConfig, RemoteSpec};
    use crate::module::remote::RemoteContainer;
    use crate::utils::LoaderError;
    use async_trait::async_trait;
    use std::io::Write;

    struct StaticContainer;

    #[async_trait]
    impl RemoteContainer for StaticContainer {
        async fn init(&self, _shared_scope: &SharedScopeRegistry) -> anyhow::Result<()> {
            Ok(())
        }

        async fn get(&self, _module: &str) -> anyhow::Result<ModuleConfig> {
            Ok(ModuleConfig::new())
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl RemoteEntryFetcher for StaticFetcher {
        async fn load_entry(&self, _entry: &str, _scope: &str) -> anyhow::Result<Option<Arc<dyn RemoteContainer>>> {
            Ok(Some(Arc::new(StaticContainer)))
        }
    }

    #[tokio::test]
    async fn test_two_phase_start() {
        let loader = ChipsLoader::builder(LoaderConfig::default()).build().unwrap();
        loader
            .add_modules(vec![
                ModuleDescriptor::builder("core").init().build(),
                ModuleDescriptor::builder("todo").build(),
            ])
            .await
            .unwrap();

        loader.start().await.unwrap();
        assert_eq!(loader.summary().loaded, 1);
        assert_eq!(loader.summary().pending, 1);

        loader.run_normal_modules().await.unwrap();
        assert_eq!(
            loader.summary(),
            LoaderSummary {
                total: 2,
                loaded: 2,
                ..LoaderSummary::default()
            }
        );
    }

    #[tokio::test]
    async fn test_remote_module_through_facade() {
        let loader = ChipsLoader::builder(LoaderConfig::default())
            .remote_fetcher(Arc::new(StaticFetcher))
            .shared_scope(SharedScopeRegistry::new().with_package("react", "18.2.0").unwrap())
            .build()
            .unwrap();
        assert!(loader.remote_loader().is_some());

        loader
            .add_module(
                ModuleDescriptor::builder("billing")
                    .remote(RemoteSpec::new("https://cdn.example.com/remoteEntry.js", "billing"))
                    .build(),
            )
            .await
            .unwrap();
        loader.start().await.unwrap();
        loader.load_module("billing", None).await.unwrap();

        assert!(loader.manager().is_module_loaded("billing"));
        assert!(loader
            .remote_loader()
            .unwrap()
            .is_cached("billing", "https://cdn.example.com/remoteEntry.js"));
    }

    #[tokio::test]
    async fn test_add_manifest() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "- name: core\n  loadType: INIT\n- name: todo\n  loadPriority: 1").unwrap();

        let loader = ChipsLoader::builder(LoaderConfig::default()).build().unwrap();
        let added = loader.add_manifest(file.path()).await.unwrap();
        assert_eq!(added.len(), 2);
        assert!(loader.manager().has_module("todo"));
    }

    #[tokio::test]
    async fn test_load_route_loads_owning_module() {
        let loader = ChipsLoader::builder(LoaderConfig::default()).build().unwrap();
        loader
            .add_modules(vec![
                ModuleDescriptor::builder("core").init().build(),
                ModuleDescriptor::builder("todo")
                    .config(ModuleConfig::new().with_routes(|| {
                        vec![crate::module::route::RouteDescriptor::new("todo", "/todo")]
                    }))
                    .build(),
            ])
            .await
            .unwrap();
        loader.start().await.unwrap();

        loader.load_route("todo").await.unwrap();
        assert!(loader.manager().is_module_loaded("todo"));

        let err = loader.load_route("missing").await.unwrap_err();
        assert!(matches!(err, LoaderError::ModuleNotFound(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoaderConfig::builder().log_level("loud").build();
        let err = ChipsLoader::builder(config).build().unwrap_err();
        assert!(matches!(err, LoaderError::Configuration(_)));
    }
}
