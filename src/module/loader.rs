//! 模块加载器
//!
//! 两种加载策略（INIT 顺序加载、NORMAL 分层并发加载）以及按需加载、路由预加载。
//! 所有对同一模块的加载尝试都经过状态跟踪器的去重登记，同一时刻最多一个进行中。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, info, warn, Instrument};

use crate::api::host::HostBindings;
use crate::module::condition::{ConditionFailure, ConditionValidator};
use crate::module::dependency::{DependencyResolver, SkippedModule};
use crate::module::lifecycle::LifecycleManager;
use crate::module::metadata::{LoadType, ModuleDescriptor};
use crate::module::registry::ModuleRegistry;
use crate::module::route::AutoLoadHook;
use crate::module::status::{ModuleStatus, StatusTracker};
use crate::module::validation::ValidationPipeline;
use crate::module_span;
use crate::utils::{LoaderError, Result};

/// 一次策略执行的结果
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// 按执行顺序的层级（INIT 策略只有一层，按优先级排列）
    pub levels: Vec<Vec<String>>,
    /// 本次结束时处于已加载状态的模块
    pub loaded: Vec<String>,
    /// 失败的模块及原因
    pub failed: Vec<(String, LoaderError)>,
    /// 因缺失依赖被跳过的模块
    pub skipped: Vec<SkippedModule>,
}

impl LoadReport {
    /// 没有失败也没有跳过
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// 路由预加载的结果
#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    /// 本次完成预加载的模块
    pub preloaded: Vec<String>,
    /// 因特性开关或权限不满足而跳过的模块
    pub skipped: Vec<String>,
    /// 预加载失败的模块
    pub failed: Vec<(String, LoaderError)>,
}

/// 加载场景
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// NORMAL 策略的后台加载：失败的依赖不再重试
    Background,
    /// 按名称或路由触发的加载：失败的依赖允许重试
    OnDemand,
}

/// 预加载单个模块的结果
enum PreloadOutcome {
    Preloaded,
    Skipped,
    Unchanged,
}

/// 加载上下文
///
/// 策略与按需加载共享的全部组件。通过 `Arc` 持有，自动加载钩子持有它的弱引用。
pub struct LoadContext {
    registry: Arc<ModuleRegistry>,
    status: StatusTracker,
    lifecycle: LifecycleManager,
    validator: ConditionValidator,
    resolver: DependencyResolver,
    validation: ValidationPipeline,
    auto_load: AutoLoadHook,
    init_started: AtomicBool,
    init_completed: AtomicBool,
    default_timeout: Option<Duration>,
}

impl LoadContext {
    /// 创建加载上下文
    pub fn new(
        registry: Arc<ModuleRegistry>,
        host: HostBindings,
        validation: ValidationPipeline,
        default_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<LoadContext>| {
            let weak = weak.clone();
            let auto_load: AutoLoadHook = Arc::new(move |route: String| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(ctx) => ctx.auto_load_module_by_route(&route).await,
                        None => Ok(()),
                    }
                }
                .boxed()
            });

            Self {
                validator: ConditionValidator::from_host(&host),
                resolver: DependencyResolver::new(Arc::clone(&registry)),
                lifecycle: LifecycleManager::new(Arc::clone(&registry), host),
                status: StatusTracker::new(),
                registry,
                validation,
                auto_load,
                init_started: AtomicBool::new(false),
                init_completed: AtomicBool::new(false),
                default_timeout,
            }
        })
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn validator(&self) -> &ConditionValidator {
        &self.validator
    }

    pub fn validation(&self) -> &ValidationPipeline {
        &self.validation
    }

    /// INIT 策略是否已成功完成
    pub fn is_init_completed(&self) -> bool {
        self.init_completed.load(Ordering::SeqCst)
    }

    // ==================== 按需加载 ====================

    /// 按名称加载模块
    ///
    /// 超时只放弃本次等待，已开始的加载在后台继续完成，结束前的调用者会接着等待它。
    pub async fn load_module_by_name(self: &Arc<Self>, module_name: &str, timeout: Option<Duration>) -> Result<()> {
        let module = self
            .registry
            .get(module_name)
            .ok_or_else(|| LoaderError::ModuleNotFound(module_name.to_string()))?;

        if self.status.is_loaded(module_name) {
            return Ok(());
        }

        let load = self.ensure_loaded(module, LoadMode::OnDemand);
        match timeout.or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, load).await.map_err(|_| {
                warn!(module = %module_name, timeout_ms = limit.as_millis() as u64, "按需加载超时");
                LoaderError::Timeout {
                    module_name: module_name.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => load.await,
        }
    }

    /// 进入路由时加载其所属模块
    pub async fn auto_load_module_by_route(self: &Arc<Self>, route_name: &str) -> Result<()> {
        let module = self
            .registry
            .by_route_name(route_name)
            .ok_or_else(|| LoaderError::ModuleNotFound(route_name.to_string()))?;

        if self.status.is_loaded(&module.name) {
            return Ok(());
        }

        debug!(route = %route_name, module = %module.name, "路由触发自动加载");
        self.load_module_by_name(&module.name, None).await
    }

    // ==================== 预加载 ====================

    /// 预加载全部 NORMAL 模块的路由与翻译资源（不执行初始化钩子）
    pub async fn preload_routes(self: &Arc<Self>) -> PreloadReport {
        let mut modules = self.registry.by_type(LoadType::Normal);
        ModuleRegistry::sort_by_priority(&mut modules);

        let results = join_all(modules.into_iter().map(|module| {
            let name = module.name.clone();
            self.preload(module).map(move |result| (name, result))
        }))
        .await;

        let mut report = PreloadReport::default();
        for (name, result) in results {
            match result {
                Ok(PreloadOutcome::Preloaded) => report.preloaded.push(name),
                Ok(PreloadOutcome::Skipped) => report.skipped.push(name),
                Ok(PreloadOutcome::Unchanged) => {}
                Err(e) => report.failed.push((name, e)),
            }
        }

        info!(
            preloaded = report.preloaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "路由预加载完成"
        );
        report
    }

    async fn preload(self: &Arc<Self>, module: Arc<ModuleDescriptor>) -> Result<PreloadOutcome> {
        if self.status.is_preloaded_or_loaded(&module.name) || self.status.is_loaded_or_loading(&module.name) {
            return Ok(PreloadOutcome::Unchanged);
        }
        // 依赖不参与预加载判断
        if self.validator.should_skip_during_preload(&module) {
            debug!(module = %module.name, "条件不满足，跳过预加载");
            return Ok(PreloadOutcome::Skipped);
        }

        let ctx = Arc::clone(self);
        let name = module.name.clone();
        self.status
            .run_preloading(&name, move || ctx.preload_once(module))
            .await?;

        if self.status.is_preloaded(&name) {
            Ok(PreloadOutcome::Preloaded)
        } else {
            Ok(PreloadOutcome::Unchanged)
        }
    }

    fn preload_once(self: Arc<Self>, module: Arc<ModuleDescriptor>) -> BoxFuture<'static, Result<()>> {
        let span = module_span!(module.name, "preload");
        async move {
            if self.status.is_preloaded_or_loaded(&module.name) {
                return Ok(());
            }

            self.status.mark_loading(&module.name);
            let result = async {
                self.lifecycle.initialize(&module, true).await?;
                self.lifecycle
                    .register_resources(&module, Some(&self.auto_load), false)
                    .await
            }
            .await;

            match result {
                Ok(()) => {
                    self.status.mark_preloaded(&module.name);
                    Ok(())
                }
                Err(e) => {
                    self.status.mark_failed(&module.name, e.clone());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .boxed()
    }

    // ==================== 激活 ====================

    /// 确保模块进入已加载状态
    ///
    /// 首次激活可能只是等到了一个进行中的预加载，这时再激活一次完成提升。
    fn ensure_loaded(self: &Arc<Self>, module: Arc<ModuleDescriptor>, mode: LoadMode) -> BoxFuture<'static, Result<()>> {
        let ctx = Arc::clone(self);
        async move {
            for _ in 0..2 {
                ctx.activate(Arc::clone(&module), mode).await?;
                if ctx.status.is_loaded(&module.name) {
                    return Ok(());
                }
            }
            Err(LoaderError::Internal(format!(
                "模块 '{}' 激活后仍处于 {} 状态",
                module.name,
                ctx.status.status(&module.name)
            )))
        }
        .boxed()
    }

    /// 经去重登记执行一次激活
    fn activate(self: &Arc<Self>, module: Arc<ModuleDescriptor>, mode: LoadMode) -> BoxFuture<'static, Result<()>> {
        let ctx = Arc::clone(self);
        async move {
            let name = module.name.clone();
            let runner = Arc::clone(&ctx);
            ctx.status
                .run_preloading(&name, move || runner.activate_once(module, mode))
                .await
        }
        .boxed()
    }

    fn activate_once(self: Arc<Self>, module: Arc<ModuleDescriptor>, mode: LoadMode) -> BoxFuture<'static, Result<()>> {
        let span = module_span!(module.name, "activate");
        async move {
            let result = match self.status.status(&module.name) {
                ModuleStatus::Loaded => return Ok(()),
                ModuleStatus::Preloaded => self.promote(&module).await,
                _ => self.load_with_dependencies(&module, mode).await,
            };
            if let Err(ref e) = result {
                self.status.mark_failed(&module.name, e.clone());
            }
            result
        }
        .instrument(span)
        .boxed()
    }

    /// 预加载模块提升为已加载：只执行初始化钩子，不重复注册资源
    async fn promote(&self, module: &Arc<ModuleDescriptor>) -> Result<()> {
        self.validation.check_promotion(module, &self.validator)?;
        self.lifecycle.initialize(module, false).await?;
        self.status.mark_loaded(&module.name);
        info!(module = %module.name, "预加载模块已提升");
        Ok(())
    }

    /// 完整加载：能力检查 → 依赖加载 → 完整校验 → 初始化与资源注册
    async fn load_with_dependencies(self: &Arc<Self>, module: &Arc<ModuleDescriptor>, mode: LoadMode) -> Result<()> {
        self.validator
            .check_capabilities(module)
            .into_result(&module.name)?;

        let ctx = Arc::clone(self);
        let dependent = module.name.clone();
        let load_one = move |dep: Arc<ModuleDescriptor>| -> BoxFuture<'static, Result<()>> {
            if mode == LoadMode::Background && ctx.status.is_failed(&dep.name) {
                let err = LoaderError::ConditionsNotMet {
                    module_name: dependent.clone(),
                    reason: ConditionFailure::Dependencies,
                    details: vec![dep.name.clone()],
                };
                return futures::future::ready(Err(err)).boxed();
            }
            ctx.ensure_loaded(dep, mode)
        };
        let status = Arc::clone(self);
        let is_loaded = move |name: &str| status.status.is_loaded(name);

        self.resolver
            .load_dependencies(module, &load_one, &is_loaded)
            .await?;

        self.validator
            .validate(module, |name| self.status.is_loaded(name))
            .into_result(&module.name)?;

        self.load_fresh(module).await
    }

    async fn load_fresh(&self, module: &Arc<ModuleDescriptor>) -> Result<()> {
        self.status.mark_loading(&module.name);
        self.lifecycle.initialize(module, false).await?;
        self.lifecycle
            .register_resources(module, Some(&self.auto_load), false)
            .await?;
        self.status.mark_loaded(&module.name);
        info!(module = %module.name, "模块加载完成");
        Ok(())
    }

    /// INIT 模块：不检查条件，不处理依赖
    fn load_init_module(self: Arc<Self>, module: Arc<ModuleDescriptor>) -> BoxFuture<'static, Result<()>> {
        let span = module_span!(module.name, "init");
        async move {
            if self.status.is_loaded(&module.name) {
                return Ok(());
            }
            self.status.mark_loading(&module.name);
            let result = async {
                self.lifecycle.initialize(&module, false).await?;
                self.lifecycle.register_resources(&module, None, false).await
            }
            .await;

            match result {
                Ok(()) => {
                    self.status.mark_loaded(&module.name);
                    Ok(())
                }
                Err(e) => {
                    self.status.mark_failed(&module.name, e.clone());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .boxed()
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("registry", &self.registry)
            .field("validation", &self.validation)
            .field("init_completed", &self.is_init_completed())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

// ============================================================================
// 加载策略
// ============================================================================

/// 加载策略
#[async_trait]
pub trait LoadStrategy: Send + Sync {
    /// 策略名称
    fn name(&self) -> &str;

    /// 执行策略
    async fn load(&self, ctx: &Arc<LoadContext>) -> Result<LoadReport>;
}

/// INIT 策略：按优先级逐个加载，任何失败都会中止后续模块
///
/// 成功后封存注册表。只执行一次，无论成败，再次执行都返回 `AlreadyLoaded`。
#[derive(Debug, Default, Clone, Copy)]
pub struct InitLoadStrategy;

#[async_trait]
impl LoadStrategy for InitLoadStrategy {
    fn name(&self) -> &str {
        "init"
    }

    async fn load(&self, ctx: &Arc<LoadContext>) -> Result<LoadReport> {
        if ctx
            .init_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LoaderError::AlreadyLoaded);
        }

        let mut modules = ctx.registry.by_type(LoadType::Init);
        ModuleRegistry::sort_by_priority(&mut modules);
        let order: Vec<String> = modules.iter().map(|m| m.name.clone()).collect();
        info!(modules = ?order, "开始加载 INIT 模块");

        let mut report = LoadReport {
            levels: vec![order],
            ..LoadReport::default()
        };

        for module in modules {
            let name = module.name.clone();
            let runner = Arc::clone(ctx);
            let result = ctx
                .status
                .run_preloading(&name, move || runner.load_init_module(module))
                .await;

            if let Err(e) = result {
                warn!(module = %name, error = %e, error_code = e.error_code(), "INIT 模块加载失败，中止启动");
                return Err(e);
            }
            report.loaded.push(name);
        }

        ctx.registry.seal();
        ctx.init_completed.store(true, Ordering::SeqCst);
        info!(loaded = report.loaded.len(), "INIT 模块加载完成，注册表已封存");
        Ok(report)
    }
}

/// NORMAL 策略：按依赖层级加载，同层模块并发，失败按模块隔离
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalLoadStrategy;

impl NormalLoadStrategy {
    /// 标记环路涉及的模块失败并从计划中移除
    fn isolate_cycle(
        ctx: &LoadContext,
        modules: &mut Vec<Arc<ModuleDescriptor>>,
        err: &LoaderError,
        report: &mut LoadReport,
    ) -> bool {
        let LoaderError::CircularDependency { path } = err else {
            return false;
        };
        warn!(path = ?path, "检测到循环依赖，相关模块标记为失败");

        modules.retain(|module| {
            if !path.contains(&module.name) {
                return true;
            }
            ctx.status.mark_failed(&module.name, err.clone());
            report.failed.push((module.name.clone(), err.clone()));
            false
        });
        true
    }

    async fn load_one(ctx: &Arc<LoadContext>, module: &Arc<ModuleDescriptor>) -> Result<bool> {
        match ctx.status.status(&module.name) {
            ModuleStatus::Loaded => Ok(true),
            ModuleStatus::Failed => Err(ctx
                .status
                .last_error(&module.name)
                .unwrap_or_else(|| LoaderError::Internal(format!("模块 '{}' 已失败", module.name)))),
            _ => ctx
                .ensure_loaded(Arc::clone(module), LoadMode::Background)
                .await
                .map(|()| true),
        }
    }
}

#[async_trait]
impl LoadStrategy for NormalLoadStrategy {
    fn name(&self) -> &str {
        "normal"
    }

    async fn load(&self, ctx: &Arc<LoadContext>) -> Result<LoadReport> {
        if !ctx.is_init_completed() {
            return Err(LoaderError::InitNotLoaded);
        }

        let mut modules = ctx.registry.by_type(LoadType::Normal);
        ModuleRegistry::sort_by_priority(&mut modules);
        let mut report = LoadReport::default();

        if let Err(e) = ctx.validation.check_plan(&modules) {
            if !Self::isolate_cycle(ctx, &mut modules, &e, &mut report) {
                return Err(e);
            }
        }

        let levels = loop {
            match ctx.resolver.build_levels(&modules, &ctx.status) {
                Ok(levels) => break levels,
                Err(e) => {
                    if !Self::isolate_cycle(ctx, &mut modules, &e, &mut report) {
                        return Err(e);
                    }
                }
            }
        };

        for skipped in &levels.skipped {
            warn!(module = %skipped.module_name, missing = ?skipped.missing_dependencies, "缺少依赖，跳过模块");
            ctx.status.mark_failed(
                &skipped.module_name,
                LoaderError::MissingDependency {
                    module_name: skipped.module_name.clone(),
                    missing: skipped.missing_dependencies.clone(),
                },
            );
        }
        report.skipped = levels.skipped.clone();
        report.levels = levels.level_names();

        for (index, level) in levels.levels.iter().enumerate() {
            debug!(level = index, modules = level.len(), "加载依赖层级");
            let results = join_all(level.iter().map(|module| {
                Self::load_one(ctx, module).map(move |result| (module.name.clone(), result))
            }))
            .await;

            for (name, result) in results {
                match result {
                    Ok(_) => report.loaded.push(name),
                    Err(e) => {
                        warn!(module = %name, error = %e, error_code = e.error_code(), "NORMAL 模块加载失败");
                        report.failed.push((name, e));
                    }
                }
            }
        }

        info!(
            levels = report.levels.len(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "NORMAL 模块加载完成"
        );
        Ok(report)
    }
}
