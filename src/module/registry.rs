//! 模块注册表
//!
//! 保存所有模块描述，负责延迟配置的解析、路由列表的缓存以及路由名到模块的反查。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::module::metadata::{ConfigSource, LoadType, ModuleConfig, ModuleDescriptor};
use crate::module::remote::RemoteModuleLoader;
use crate::module::route::{find_route, RouteDescriptor};
use crate::module::status::InflightRegistry;
use crate::utils::error::render_cause;
use crate::utils::{LoaderError, Result};

/// 缓存的路由列表；`None` 表示模块没有声明路由
pub type CachedRoutes = Option<Arc<Vec<RouteDescriptor>>>;

#[derive(Default)]
struct RegistryInner {
    /// 按注册顺序保存
    modules: Vec<Arc<ModuleDescriptor>>,
    /// 模块名 -> modules 下标
    index: HashMap<String, usize>,
}

/// 模块注册表
///
/// 包括：
/// - 模块描述存储（名称唯一，封存后拒绝添加）
/// - 延迟配置解析（同一模块并发解析只执行一次）
/// - 路由列表缓存（路由生成函数每个模块至多调用一次）
/// - 路由名反查所属模块
pub struct ModuleRegistry {
    inner: RwLock<RegistryInner>,
    sealed: AtomicBool,
    route_cache: RwLock<HashMap<String, CachedRoutes>>,
    resolving: InflightRegistry<Arc<ModuleConfig>>,
    remote: Option<Arc<RemoteModuleLoader>>,
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            sealed: AtomicBool::new(false),
            route_cache: RwLock::new(HashMap::new()),
            resolving: InflightRegistry::new(),
            remote: None,
        }
    }

    /// 创建可解析远程模块的注册表
    pub fn with_remote_loader(remote: Arc<RemoteModuleLoader>) -> Self {
        Self {
            remote: Some(remote),
            ..Self::new()
        }
    }

    pub fn remote_loader(&self) -> Option<&Arc<RemoteModuleLoader>> {
        self.remote.as_ref()
    }

    // ==================== 注册 ====================

    /// 添加模块
    ///
    /// INIT 模块会在添加时解析并缓存路由列表，保证 NORMAL 阶段构建路由前它们已经存在。
    ///
    /// # Errors
    ///
    /// - `RegistrySealed`：INIT 模块已加载完成
    /// - `InvalidDescriptor`：名称为空，或 INIT 模块声明了加载条件
    /// - `DuplicateName`：同名模块已存在
    pub async fn add(&self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        if self.is_sealed() {
            return Err(LoaderError::RegistrySealed(descriptor.name));
        }
        Self::validate_descriptor(&descriptor)?;

        let descriptor = Arc::new(descriptor);
        {
            let mut inner = self.inner.write();
            if inner.index.contains_key(&descriptor.name) {
                return Err(LoaderError::DuplicateName(descriptor.name.clone()));
            }
            let position = inner.modules.len();
            inner.index.insert(descriptor.name.clone(), position);
            inner.modules.push(Arc::clone(&descriptor));
        }

        info!(
            module = %descriptor.name,
            load_type = %descriptor.load_type,
            priority = descriptor.load_priority,
            remote = descriptor.is_remote(),
            "模块已注册"
        );

        if descriptor.is_init() {
            if let Err(e) = self.routes_for(&descriptor).await {
                warn!(module = %descriptor.name, error = %e, "INIT 模块路由预解析失败，稍后重试");
            }
        }

        Ok(descriptor)
    }

    /// 按顺序添加多个模块，遇到第一个错误即停止
    pub async fn add_all(&self, descriptors: Vec<ModuleDescriptor>) -> Result<Vec<Arc<ModuleDescriptor>>> {
        let mut added = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            added.push(self.add(descriptor).await?);
        }
        Ok(added)
    }

    fn validate_descriptor(descriptor: &ModuleDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(LoaderError::InvalidDescriptor {
                module_name: descriptor.name.clone(),
                reason: "模块名称不能为空".to_string(),
            });
        }
        if descriptor.is_init() && descriptor.load_condition.is_some() {
            return Err(LoaderError::InvalidDescriptor {
                module_name: descriptor.name.clone(),
                reason: "INIT 模块不能声明加载条件".to_string(),
            });
        }
        Ok(())
    }

    /// 封存注册表
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::SeqCst) {
            info!(modules = self.len(), "注册表已封存");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    // ==================== 配置与路由 ====================

    /// 解析模块配置
    ///
    /// 延迟形式只会被解析一次并就地替换；解析失败时保留延迟形式，之后可以重试。
    pub async fn resolve_config(&self, module: &Arc<ModuleDescriptor>) -> Result<Arc<ModuleConfig>> {
        let factory = match module.config_cell().source() {
            ConfigSource::Resolved(config) => return Ok(config),
            ConfigSource::Deferred(factory) => factory,
            ConfigSource::Remote => return self.resolve_remote(module).await,
        };

        let m = Arc::clone(module);
        self.resolving
            .run(&module.name, move || {
                async move {
                    debug!(module = %m.name, "解析延迟配置");
                    match factory().await {
                        Ok(config) => Ok(m.config_cell().resolve(Arc::new(config))),
                        Err(e) => {
                            let err = LoaderError::ConfigLoadFailed {
                                module_name: m.name.clone(),
                                cause: render_cause(&e),
                            };
                            warn!(module = %m.name, error = %err, "模块配置加载失败");
                            Err(err)
                        }
                    }
                }
                .boxed()
            })
            .await
    }

    async fn resolve_remote(&self, module: &Arc<ModuleDescriptor>) -> Result<Arc<ModuleConfig>> {
        let spec = module.remote.clone().ok_or_else(|| LoaderError::InvalidDescriptor {
            module_name: module.name.clone(),
            reason: "远程配置缺少 remote 位置".to_string(),
        })?;
        let loader = self.remote.clone().ok_or_else(|| {
            LoaderError::Configuration(format!("模块 '{}' 需要远程加载，但未配置远程加载器", module.name))
        })?;

        let m = Arc::clone(module);
        self.resolving
            .run(&module.name, move || {
                async move {
                    let config = loader.load(&m.name, &spec).await?;
                    Ok(m.config_cell().resolve(config))
                }
                .boxed()
            })
            .await
    }

    /// 取得模块的路由列表（带缓存）
    ///
    /// 路由生成函数在注册表生命周期内每个模块至多调用一次。
    pub async fn routes_for(&self, module: &Arc<ModuleDescriptor>) -> Result<CachedRoutes> {
        let cached = self.route_cache.read().get(&module.name).cloned();
        if let Some(routes) = cached {
            return Ok(routes);
        }

        let config = self.resolve_config(module).await?;

        let mut cache = self.route_cache.write();
        let routes = cache
            .entry(module.name.clone())
            .or_insert_with(|| config.routes_producer().map(|produce| Arc::new(produce())));
        debug!(
            module = %module.name,
            routes = routes.as_ref().map(|r| r.len()).unwrap_or(0),
            "路由列表已缓存"
        );
        Ok(routes.clone())
    }

    /// 已缓存的路由列表（不触发解析）
    pub fn cached_routes(&self, module_name: &str) -> Option<CachedRoutes> {
        self.route_cache.read().get(module_name).cloned()
    }

    /// 按路由名查找所属模块
    ///
    /// 依次尝试：已缓存路由树中的精确匹配、同名模块、点号分隔的第一段。
    pub fn by_route_name(&self, route_name: &str) -> Option<Arc<ModuleDescriptor>> {
        let modules = self.all();
        let owner = {
            let cache = self.route_cache.read();
            modules.into_iter().find(|module| {
                cache
                    .get(&module.name)
                    .and_then(|routes| routes.as_ref())
                    .map(|routes| find_route(routes, route_name).is_some())
                    .unwrap_or(false)
            })
        };

        if owner.is_some() {
            return owner;
        }
        if let Some(module) = self.get(route_name) {
            return Some(module);
        }
        route_name.split('.').next().and_then(|segment| self.get(segment))
    }

    // ==================== 查询 ====================

    pub fn get(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        let inner = self.inner.read();
        inner.index.get(name).map(|&i| Arc::clone(&inner.modules[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().index.contains_key(name)
    }

    /// 全部模块（注册顺序）
    pub fn all(&self) -> Vec<Arc<ModuleDescriptor>> {
        self.inner.read().modules.clone()
    }

    /// 指定加载类型的模块（注册顺序）
    pub fn by_type(&self, load_type: LoadType) -> Vec<Arc<ModuleDescriptor>> {
        self.inner
            .read()
            .modules
            .iter()
            .filter(|m| m.load_type == load_type)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().modules.iter().map(|m| m.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按优先级升序稳定排序
    pub fn sort_by_priority(modules: &mut [Arc<ModuleDescriptor>]) {
        modules.sort_by_key(|m| m.load_priority);
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .field("sealed", &self.is_sealed())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::{ConfigState, LoadCondition};
    use std::sync::atomic::AtomicUsize;

    fn counted_routes(counter: Arc<AtomicUsize>, name: &'static str) -> ModuleConfig {
        ModuleConfig::new().with_routes(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![RouteDescriptor::new(name, format!("/{}", name))
                .with_child(RouteDescriptor::new(format!("{}.detail", name), format!("/{}/:id", name)))]
        })
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = ModuleRegistry::new();
        registry.add(ModuleDescriptor::builder("todo").build()).await.unwrap();
        let err = registry.add(ModuleDescriptor::builder("todo").build()).await.unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateName(ref n) if n == "todo"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sealed_registry_rejects_every_type() {
        let registry = ModuleRegistry::new();
        registry.add(ModuleDescriptor::builder("core").init().build()).await.unwrap();
        registry.seal();

        for descriptor in [
            ModuleDescriptor::builder("late").build(),
            ModuleDescriptor::builder("late-init").init().build(),
            ModuleDescriptor::builder("core").build(),
        ] {
            let err = registry.add(descriptor).await.unwrap_err();
            assert!(matches!(err, LoaderError::RegistrySealed(_)));
        }
    }

    #[tokio::test]
    async fn test_init_with_condition_is_invalid() {
        let registry = ModuleRegistry::new();
        let err = registry
            .add(
                ModuleDescriptor::builder("core")
                    .init()
                    .condition(LoadCondition::new().with_feature_flags(["beta"]))
                    .build(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidDescriptor { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_init_routes_cached_on_add() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let core = registry
            .add(
                ModuleDescriptor::builder("core")
                    .init()
                    .config(counted_routes(calls.clone(), "core"))
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.cached_routes("core").is_some());

        registry.routes_for(&core).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_config_round_trip() {
        let registry = ModuleRegistry::new();
        let todo = registry
            .add(
                ModuleDescriptor::builder("todo")
                    .deferred_config(|| async {
                        Ok(ModuleConfig::new().with_routes(|| vec![RouteDescriptor::new("x", "/x")]))
                    })
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(todo.config_state(), ConfigState::Deferred);

        registry.resolve_config(&todo).await.unwrap();
        assert_eq!(todo.config_state(), ConfigState::Resolved);

        let first = registry.routes_for(&todo).await.unwrap().unwrap();
        let second = registry.routes_for(&todo).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].name, "x");
    }

    #[tokio::test]
    async fn test_config_failure_keeps_deferred_form() {
        let registry = ModuleRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let todo = registry
            .add(
                ModuleDescriptor::builder("todo")
                    .deferred_config(move || {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        async move {
                            anyhow::ensure!(n > 0, "chunk failed to load");
                            Ok(ModuleConfig::new())
                        }
                    })
                    .build(),
            )
            .await
            .unwrap();

        let err = registry.resolve_config(&todo).await.unwrap_err();
        assert!(matches!(err, LoaderError::ConfigLoadFailed { ref cause, .. } if cause.contains("chunk")));
        assert_eq!(todo.config_state(), ConfigState::Deferred);

        registry.resolve_config(&todo).await.unwrap();
        assert_eq!(todo.config_state(), ConfigState::Resolved);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_runs_factory_once() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let todo = registry
            .add(
                ModuleDescriptor::builder("todo")
                    .deferred_config(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::task::yield_now().await;
                            Ok(ModuleConfig::new())
                        }
                    })
                    .build(),
            )
            .await
            .unwrap();

        let (a, b) = futures::join!(registry.resolve_config(&todo), registry.resolve_config(&todo));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_without_loader_is_configuration_error() {
        let registry = ModuleRegistry::new();
        let billing = registry
            .add(
                ModuleDescriptor::builder("billing")
                    .remote(crate::module::metadata::RemoteSpec::new("https://cdn.example.com/e.js", "billing"))
                    .build(),
            )
            .await
            .unwrap();
        let err = registry.resolve_config(&billing).await.unwrap_err();
        assert!(matches!(err, LoaderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_by_route_name_lookup_order() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let shell = registry
            .add(
                ModuleDescriptor::builder("shell")
                    .config(counted_routes(calls.clone(), "dashboard"))
                    .build(),
            )
            .await
            .unwrap();
        registry.add(ModuleDescriptor::builder("todo").build()).await.unwrap();
        registry.routes_for(&shell).await.unwrap();

        assert_eq!(registry.by_route_name("dashboard.detail").unwrap().name, "shell");
        assert_eq!(registry.by_route_name("todo").unwrap().name, "todo");
        assert_eq!(registry.by_route_name("todo.detail").unwrap().name, "todo");
        assert!(registry.by_route_name("unknown.page").is_none());
    }

    #[tokio::test]
    async fn test_shared_route_name_owned_by_first_registered() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let names = ["zeta", "omega", "beta", "alpha", "delta", "kappa", "gamma", "sigma"];
        for name in names {
            let module = registry
                .add(ModuleDescriptor::builder(name).config(counted_routes(calls.clone(), "home")).build())
                .await
                .unwrap();
            registry.routes_for(&module).await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), names.len());
        for _ in 0..4 {
            assert_eq!(registry.by_route_name("home").unwrap().name, "zeta");
            assert_eq!(registry.by_route_name("home.detail").unwrap().name, "zeta");
        }
    }

    #[tokio::test]
    async fn test_sort_by_priority_is_stable() {
        let registry = ModuleRegistry::new();
        for (name, priority) in [("b", 1), ("a", 0), ("c", 1), ("d", -1)] {
            registry
                .add(ModuleDescriptor::builder(name).priority(priority).build())
                .await
                .unwrap();
        }
        let mut modules = registry.all();
        ModuleRegistry::sort_by_priority(&mut modules);
        let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["d", "a", "b", "c"]);
    }
}
