//! 模块管理器
//!
//! 整合注册表、状态跟踪、加载策略与宿主协作方，提供统一的模块管理接口。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};

use super::condition::ConditionFailure;
use super::dependency::{build_dependency_levels, SkippedModule};
use super::loader::{InitLoadStrategy, LoadContext, LoadReport, LoadStrategy, NormalLoadStrategy, PreloadReport};
use super::metadata::{LoadType, MockHandler, ModuleDescriptor};
use super::registry::ModuleRegistry;
use super::route::RouteDescriptor;
use super::status::{ModuleStatus, StatusChangeEvent, StatusRecord, SubscriptionId};
use super::validation::ValidationPipeline;
use crate::api::host::{HostBindings, MenuNode};
use crate::core::config::LoaderConfig;
use crate::utils::Result;

/// 因特性开关或权限不满足而不会加载的模块
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedModule {
    pub module_name: String,
    pub reason: ConditionFailure,
    pub details: Vec<String>,
}

/// 加载计划（不产生任何副作用）
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadPlan {
    /// INIT 模块加载顺序
    pub init: Vec<String>,
    /// NORMAL 模块依赖层级
    pub levels: Vec<Vec<String>>,
    /// 依赖缺失的模块
    pub skipped: Vec<SkippedModule>,
    /// 条件不满足的模块
    pub blocked: Vec<BlockedModule>,
}

/// 模块管理器
///
/// 负责模块的整个加载过程：
/// - 模块注册与查询
/// - INIT / NORMAL 两阶段加载
/// - 按名称、按路由的按需加载
/// - 路由预加载与菜单构建
pub struct ModuleManager {
    ctx: Arc<LoadContext>,
    init_strategy: Arc<dyn LoadStrategy>,
    normal_strategy: Arc<dyn LoadStrategy>,
    normal_load_delay: Option<Duration>,
}

impl ModuleManager {
    /// 创建新的模块管理器
    pub fn new(registry: Arc<ModuleRegistry>, host: HostBindings, config: &LoaderConfig) -> Self {
        let ctx = LoadContext::new(
            registry,
            host,
            ValidationPipeline::from_config(config),
            config.loading.load_timeout(),
        );
        Self {
            ctx,
            init_strategy: Arc::new(InitLoadStrategy),
            normal_strategy: Arc::new(NormalLoadStrategy),
            normal_load_delay: config.loading.normal_load_delay(),
        }
    }

    /// 使用默认配置和空注册表创建
    pub fn with_defaults(host: HostBindings) -> Self {
        Self::new(Arc::new(ModuleRegistry::new()), host, &LoaderConfig::default())
    }

    /// 替换加载策略
    pub fn with_strategies(mut self, init: Arc<dyn LoadStrategy>, normal: Arc<dyn LoadStrategy>) -> Self {
        self.init_strategy = init;
        self.normal_strategy = normal;
        self
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.ctx.registry()
    }

    // ==================== 注册与查询 ====================

    /// 添加模块
    pub async fn add_module(&self, descriptor: ModuleDescriptor) -> Result<Arc<ModuleDescriptor>> {
        self.ctx.registry().add(descriptor).await
    }

    /// 批量添加模块，遇到第一个错误即停止
    pub async fn add_modules(&self, descriptors: Vec<ModuleDescriptor>) -> Result<Vec<Arc<ModuleDescriptor>>> {
        self.ctx.registry().add_all(descriptors).await
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.ctx.registry().get(name)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.ctx.registry().contains(name)
    }

    pub fn get_modules_by_type(&self, load_type: LoadType) -> Vec<Arc<ModuleDescriptor>> {
        self.ctx.registry().by_type(load_type)
    }

    pub fn get_module_by_route_name(&self, route_name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.ctx.registry().by_route_name(route_name)
    }

    // ==================== 状态 ====================

    pub fn get_module_status(&self, name: &str) -> ModuleStatus {
        self.ctx.status().status(name)
    }

    /// 状态记录（含更新时间与失败原因）
    pub fn get_module_record(&self, name: &str) -> Option<StatusRecord> {
        self.ctx.status().record(name)
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.ctx.status().is_loaded(name)
    }

    pub fn is_module_preloaded(&self, name: &str) -> bool {
        self.ctx.status().is_preloaded(name)
    }

    /// 订阅状态变更
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StatusChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ctx.status().subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.status().unsubscribe(id)
    }

    // ==================== 加载 ====================

    /// 加载全部 INIT 模块
    #[instrument(skip(self), fields(strategy = self.init_strategy.name()))]
    pub async fn run_init_modules(&self) -> Result<LoadReport> {
        self.init_strategy.load(&self.ctx).await
    }

    /// 加载全部 NORMAL 模块
    ///
    /// 配置了首屏延迟时先等待，再按依赖层级加载。
    #[instrument(skip(self), fields(strategy = self.normal_strategy.name()))]
    pub async fn run_normal_modules(&self) -> Result<LoadReport> {
        if let Some(delay) = self.normal_load_delay {
            info!(delay_ms = delay.as_millis() as u64, "延迟加载 NORMAL 模块");
            tokio::time::sleep(delay).await;
        }
        self.normal_strategy.load(&self.ctx).await
    }

    /// 按名称加载模块，`timeout` 缺省时使用配置中的超时
    pub async fn load_module_by_name(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.ctx.load_module_by_name(name, timeout).await
    }

    /// 加载路由所属的模块
    pub async fn auto_load_module_by_route(&self, route_name: &str) -> Result<()> {
        self.ctx.auto_load_module_by_route(route_name).await
    }

    /// 预加载 NORMAL 模块的路由与翻译资源
    pub async fn preload_routes(&self) -> PreloadReport {
        self.ctx.preload_routes().await
    }

    // ==================== 计划 ====================

    /// 计算加载计划
    ///
    /// 按当前的特性开关与权限过滤 NORMAL 模块，再对其余模块分层。已加载的模块视为就绪。
    pub fn plan(&self) -> Result<LoadPlan> {
        let registry = self.ctx.registry();
        let mut init = registry.by_type(LoadType::Init);
        ModuleRegistry::sort_by_priority(&mut init);

        let mut normal = registry.by_type(LoadType::Normal);
        ModuleRegistry::sort_by_priority(&mut normal);

        let mut blocked = Vec::new();
        normal.retain(|module| {
            let result = self.ctx.validator().check_capabilities(module);
            match result.reason {
                Some(reason) if !result.can_load => {
                    blocked.push(BlockedModule {
                        module_name: module.name.clone(),
                        reason,
                        details: result.details,
                    });
                    false
                }
                _ => true,
            }
        });

        let levels = build_dependency_levels(
            &normal,
            |name| registry.contains(name),
            |name| self.ctx.status().is_preloaded_or_loaded(name),
        )?;

        Ok(LoadPlan {
            init: init.iter().map(|m| m.name.clone()).collect(),
            levels: levels.level_names(),
            skipped: levels.skipped,
            blocked,
        })
    }

    // ==================== 宿主资源 ====================

    /// 已注册路由的模块贡献的全部路由（注册顺序）
    pub fn registered_routes(&self) -> Vec<RouteDescriptor> {
        let registry = self.ctx.registry();
        registry
            .all()
            .iter()
            .filter(|m| self.ctx.lifecycle().routes_registered(&m.name))
            .filter_map(|m| registry.cached_routes(&m.name).flatten())
            .flat_map(|routes| routes.as_ref().clone())
            .collect()
    }

    /// 由宿主路由注册器构建菜单树
    pub fn build_menu(&self) -> Vec<MenuNode> {
        let routes = self.registered_routes();
        self.ctx.lifecycle().host().routes.build_menu(&routes)
    }

    /// 收集已解析模块的请求模拟处理器
    pub fn collect_mock_handlers(&self) -> Vec<MockHandler> {
        self.ctx
            .registry()
            .all()
            .iter()
            .filter_map(|m| m.resolved_config())
            .flat_map(|config| config.mock_handlers().to_vec())
            .collect()
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("context", &self.ctx)
            .field("init_strategy", &self.init_strategy.name())
            .field("normal_strategy", &self.normal_strategy.name())
            .field("normal_load_delay", &self.normal_load_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::host::{MemoryRouteRegistrar, StaticCapabilities};
    use crate::module::metadata::{LoadCondition, ModuleConfig};
    use crate::utils::LoaderError;
    use parking_lot::Mutex;
    use serde_json::json;

    fn manager(caps: StaticCapabilities) -> ModuleManager {
        let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new())).with_capabilities(Arc::new(caps));
        ModuleManager::with_defaults(host)
    }

    fn routed(name: &'static str, title: &'static str) -> ModuleConfig {
        ModuleConfig::new().with_routes(move || {
            vec![RouteDescriptor::new(name, format!("/{}", name)).with_title(title)]
        })
    }

    #[tokio::test]
    async fn test_add_after_init_is_sealed() {
        let manager = manager(StaticCapabilities::new());
        manager
            .add_module(ModuleDescriptor::builder("core").init().build())
            .await
            .unwrap();
        manager.run_init_modules().await.unwrap();

        for descriptor in [
            ModuleDescriptor::builder("late-init").init().build(),
            ModuleDescriptor::builder("late-normal").build(),
        ] {
            let err = manager.add_module(descriptor).await.unwrap_err();
            assert!(matches!(err, LoaderError::RegistrySealed(_)));
        }
    }

    #[tokio::test]
    async fn test_status_observer_sees_transitions() {
        let manager = manager(StaticCapabilities::new());
        manager.add_module(ModuleDescriptor::builder("core").init().build()).await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let id = manager.subscribe(move |event| {
            sink.lock().push((event.previous_status, event.new_status));
            Ok(())
        });

        manager.run_init_modules().await.unwrap();
        assert_eq!(
            *events.lock(),
            vec![
                (ModuleStatus::Pending, ModuleStatus::Loading),
                (ModuleStatus::Loading, ModuleStatus::Loaded),
            ]
        );
        assert!(manager.unsubscribe(id));
        assert!(manager.get_module_record("core").is_some());
    }

    #[tokio::test]
    async fn test_build_menu_and_mock_handlers() {
        let manager = manager(StaticCapabilities::new());
        manager
            .add_modules(vec![
                ModuleDescriptor::builder("dashboard").init().config(routed("dashboard", "仪表盘")).build(),
                ModuleDescriptor::builder("todo")
                    .priority(1)
                    .config(routed("todo", "待办").with_mock_handler(MockHandler::new(
                        "GET",
                        "/api/todos",
                        json!([]),
                    )))
                    .build(),
            ])
            .await
            .unwrap();

        manager.run_init_modules().await.unwrap();
        let titles: Vec<String> = manager.build_menu().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["仪表盘"]);

        manager.run_normal_modules().await.unwrap();
        let titles: Vec<String> = manager.build_menu().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["仪表盘", "待办"]);

        let handlers = manager.collect_mock_handlers();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].path, "/api/todos");
    }

    #[tokio::test]
    async fn test_plan_reports_blocked_and_levels() {
        let manager = manager(StaticCapabilities::new().with_flags(["beta"]));
        manager
            .add_modules(vec![
                ModuleDescriptor::builder("layout").init().priority(2).build(),
                ModuleDescriptor::builder("core").init().build(),
                ModuleDescriptor::builder("report").depends_on(["auth"]).build(),
                ModuleDescriptor::builder("auth").build(),
                ModuleDescriptor::builder("beta").condition(LoadCondition::new().with_feature_flags(["beta"])).build(),
                ModuleDescriptor::builder("admin").condition(LoadCondition::new().with_permissions(["admin"])).build(),
            ])
            .await
            .unwrap();

        let plan = manager.plan().unwrap();
        assert_eq!(plan.init, vec!["core", "layout"]);
        assert_eq!(
            plan.levels,
            vec![vec!["auth".to_string(), "beta".to_string()], vec!["report".to_string()]]
        );
        assert_eq!(plan.blocked.len(), 1);
        assert_eq!(plan.blocked[0].module_name, "admin");
        assert_eq!(plan.blocked[0].reason, ConditionFailure::Permissions);
        assert_eq!(manager.get_module_status("report"), ModuleStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_load_delay() {
        let config = LoaderConfig::builder().normal_load_delay_ms(200).build();
        let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new()));
        let manager = ModuleManager::new(Arc::new(ModuleRegistry::new()), host, &config);
        manager.add_module(ModuleDescriptor::builder("todo").build()).await.unwrap();
        manager.run_init_modules().await.unwrap();

        let started = tokio::time::Instant::now();
        manager.run_normal_modules().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(manager.is_module_loaded("todo"));
    }

    /// 只按优先级逐个加载，不分层
    struct SequentialStrategy;

    #[async_trait::async_trait]
    impl LoadStrategy for SequentialStrategy {
        fn name(&self) -> &str {
            "sequential"
        }

        async fn load(&self, ctx: &Arc<LoadContext>) -> Result<LoadReport> {
            let mut modules = ctx.registry().by_type(LoadType::Normal);
            ModuleRegistry::sort_by_priority(&mut modules);

            let mut report = LoadReport::default();
            for module in modules {
                match ctx.load_module_by_name(&module.name, None).await {
                    Ok(()) => report.loaded.push(module.name.clone()),
                    Err(e) => report.failed.push((module.name.clone(), e)),
                }
            }
            Ok(report)
        }
    }

    #[tokio::test]
    async fn test_custom_strategy() {
        let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new()));
        let manager = ModuleManager::with_defaults(host)
            .with_strategies(Arc::new(InitLoadStrategy), Arc::new(SequentialStrategy));
        manager
            .add_modules(vec![
                ModuleDescriptor::builder("report").priority(2).build(),
                ModuleDescriptor::builder("todo").priority(1).build(),
            ])
            .await
            .unwrap();

        assert_eq!(manager.get_modules_by_type(LoadType::Normal).len(), 2);
        assert!(manager.get_modules_by_type(LoadType::Init).is_empty());

        manager.run_init_modules().await.unwrap();
        let report = manager.run_normal_modules().await.unwrap();
        assert_eq!(report.loaded, vec!["todo", "report"]);
        assert!(report.levels.is_empty());
        assert!(format!("{:?}", manager).contains("sequential"));
    }
}
