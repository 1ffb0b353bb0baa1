//! 生命周期管理器
//!
//! 加载器中唯一产生副作用的组件：执行模块的一次性初始化钩子，向宿主注册路由和翻译资源。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::host::HostBindings;
use crate::module::metadata::{InitContext, ModuleConfig, ModuleDescriptor};
use crate::module::registry::ModuleRegistry;
use crate::module::route::{wrap_with_auto_load, AutoLoadHook};
use crate::utils::error::render_cause;
use crate::utils::{LoaderError, Result};

/// 生命周期管理器
///
/// 初始化钩子、路由、翻译资源对每个模块名各自至多生效一次。
pub struct LifecycleManager {
    registry: Arc<ModuleRegistry>,
    host: HostBindings,
    /// 已执行初始化钩子的模块
    initialized: Mutex<HashSet<String>>,
    /// 已注册路由的模块
    routes_registered: Mutex<HashSet<String>>,
    /// 已注册翻译资源的模块
    i18n_registered: Mutex<HashSet<String>>,
}

impl LifecycleManager {
    /// 创建新的生命周期管理器
    pub fn new(registry: Arc<ModuleRegistry>, host: HostBindings) -> Self {
        Self {
            registry,
            host,
            initialized: Mutex::new(HashSet::new()),
            routes_registered: Mutex::new(HashSet::new()),
            i18n_registered: Mutex::new(HashSet::new()),
        }
    }

    pub fn host(&self) -> &HostBindings {
        &self.host
    }

    // ==================== 初始化 ====================

    /// 初始化模块
    ///
    /// 配置解析失败只记录日志并视为没有可初始化的内容；钩子返回的错误会传给调用者。
    /// 钩子对同一模块至多执行一次，失败后标记会被撤销，允许显式重试。
    pub async fn initialize(&self, module: &Arc<ModuleDescriptor>, skip_init_hook: bool) -> Result<()> {
        let Some(config) = self.resolve_recoverable(module).await? else {
            return Ok(());
        };

        if skip_init_hook {
            return Ok(());
        }
        let Some(hook) = config.init_hook() else {
            return Ok(());
        };

        if !self.initialized.lock().insert(module.name.clone()) {
            debug!(module = %module.name, "初始化钩子已执行过");
            return Ok(());
        }

        info!(module = %module.name, "执行初始化钩子");
        let ctx = InitContext {
            module_name: module.name.clone(),
            container: Arc::clone(&self.host.container),
        };

        match hook(ctx).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.initialized.lock().remove(&module.name);
                Err(LoaderError::InitHookFailed {
                    module_name: module.name.clone(),
                    cause: render_cause(&e),
                })
            }
        }
    }

    /// 解析模块配置；延迟配置解析失败只跳过该模块的贡献，其它错误照常返回
    async fn resolve_recoverable(&self, module: &Arc<ModuleDescriptor>) -> Result<Option<Arc<ModuleConfig>>> {
        match self.registry.resolve_config(module).await {
            Ok(config) => Ok(Some(config)),
            Err(e @ LoaderError::ConfigLoadFailed { .. }) => {
                warn!(module = %module.name, error = %e, "配置解析失败，跳过");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_initialized(&self, module_name: &str) -> bool {
        self.initialized.lock().contains(module_name)
    }

    // ==================== 资源注册 ====================

    /// 注册模块路由
    ///
    /// 配置最初是延迟形式且提供了 `auto_load` 时，进入任一路由前会先等待 `auto_load(路由名)`。
    pub async fn register_routes(&self, module: &Arc<ModuleDescriptor>, auto_load: Option<&AutoLoadHook>) -> Result<()> {
        if self.routes_registered.lock().contains(&module.name) {
            return Ok(());
        }

        let routes = match self.registry.routes_for(module).await {
            Ok(Some(routes)) => routes,
            Ok(None) | Err(LoaderError::ConfigLoadFailed { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let routes = match auto_load {
            Some(hook) if module.is_config_originally_deferred() => wrap_with_auto_load(&routes, hook),
            _ => routes.as_ref().clone(),
        };

        if !self.routes_registered.lock().insert(module.name.clone()) {
            return Ok(());
        }

        let count = routes.len();
        if let Err(e) = self.host.routes.register(routes) {
            self.routes_registered.lock().remove(&module.name);
            return Err(LoaderError::RegistrationFailed {
                module_name: module.name.clone(),
                cause: render_cause(&e),
            });
        }

        debug!(module = %module.name, routes = count, "路由已注册");
        Ok(())
    }

    /// 注册模块翻译资源
    ///
    /// 模块声明了翻译资源但宿主没有提供翻译引擎时立即失败。
    pub async fn register_i18n(&self, module: &Arc<ModuleDescriptor>, is_loaded: bool) -> Result<()> {
        if is_loaded || self.i18n_registered.lock().contains(&module.name) {
            return Ok(());
        }

        let Some(config) = self.resolve_recoverable(module).await? else {
            return Ok(());
        };
        let Some(registrar) = config.i18n_registrar() else {
            return Ok(());
        };

        let engine = self.host.translations.as_ref().ok_or_else(|| {
            LoaderError::Configuration(format!(
                "模块 '{}' 声明了翻译资源，但宿主未提供翻译引擎",
                module.name
            ))
        })?;

        if !self.i18n_registered.lock().insert(module.name.clone()) {
            return Ok(());
        }

        for bundle in registrar() {
            if let Err(e) = engine.add_resource_bundle(&bundle.locale, &bundle.namespace, &bundle.resources) {
                self.i18n_registered.lock().remove(&module.name);
                return Err(LoaderError::RegistrationFailed {
                    module_name: module.name.clone(),
                    cause: render_cause(&e),
                });
            }
            debug!(module = %module.name, locale = %bundle.locale, namespace = %bundle.namespace, "翻译资源已注册");
        }
        Ok(())
    }

    /// 注册路由与翻译资源
    pub async fn register_resources(
        &self,
        module: &Arc<ModuleDescriptor>,
        auto_load: Option<&AutoLoadHook>,
        is_loaded: bool,
    ) -> Result<()> {
        self.register_routes(module, auto_load).await?;
        self.register_i18n(module, is_loaded).await
    }

    pub fn routes_registered(&self, module_name: &str) -> bool {
        self.routes_registered.lock().contains(module_name)
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("initialized", &self.initialized.lock().len())
            .field("routes_registered", &self.routes_registered.lock().len())
            .field("i18n_registered", &self.i18n_registered.lock().len())
            .finish()
    }
}
