//! 宿主协作接口
//!
//! 加载器不渲染界面、不实现路由与国际化，只通过这些接口驱动宿主提供的能力。

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::module::route::RouteDescriptor;

// ============================================================================
// 路由
// ============================================================================

/// 菜单节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuNode {
    /// 对应的路由名称
    pub name: String,
    /// 路由路径
    pub path: String,
    /// 菜单标题（缺省时使用路由名称）
    pub title: String,
    /// 路由元数据（图标、排序等）
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
    /// 子菜单
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    /// 从路由树构建菜单节点
    pub fn from_route(route: &RouteDescriptor) -> Self {
        Self {
            name: route.name.clone(),
            path: route.path.clone(),
            title: route.title.clone().unwrap_or_else(|| route.name.clone()),
            meta: route.meta.clone(),
            children: route.children.iter().map(MenuNode::from_route).collect(),
        }
    }
}

/// 路由注册器
pub trait RouteRegistrar: Send + Sync {
    /// 注册一组路由
    fn register(&self, routes: Vec<RouteDescriptor>) -> anyhow::Result<()>;

    /// 根据路由构建菜单树
    fn build_menu(&self, routes: &[RouteDescriptor]) -> Vec<MenuNode> {
        routes.iter().map(MenuNode::from_route).collect()
    }
}

/// 内存路由注册器
///
/// 保存所有注册过的路由，适用于没有真实路由器的宿主（命令行、测试）。
#[derive(Default)]
pub struct MemoryRouteRegistrar {
    routes: Mutex<Vec<RouteDescriptor>>,
}

impl MemoryRouteRegistrar {
    /// 创建空注册器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已注册的顶层路由
    pub fn routes(&self) -> Vec<RouteDescriptor> {
        self.routes.lock().clone()
    }

    /// 已注册路由树中的全部路由名称
    pub fn route_names(&self) -> Vec<String> {
        self.routes.lock().iter().flat_map(RouteDescriptor::names).collect()
    }

    /// 按名称查找已注册的路由
    pub fn find(&self, name: &str) -> Option<RouteDescriptor> {
        crate::module::route::find_route(&self.routes.lock(), name).cloned()
    }
}

impl RouteRegistrar for MemoryRouteRegistrar {
    fn register(&self, routes: Vec<RouteDescriptor>) -> anyhow::Result<()> {
        self.routes.lock().extend(routes);
        Ok(())
    }
}

// ============================================================================
// 国际化
// ============================================================================

/// 翻译资源包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationBundle {
    /// 语言
    pub locale: String,
    /// 命名空间
    pub namespace: String,
    /// 资源内容
    pub resources: Value,
}

impl TranslationBundle {
    /// 创建资源包
    pub fn new(locale: impl Into<String>, namespace: impl Into<String>, resources: Value) -> Self {
        Self {
            locale: locale.into(),
            namespace: namespace.into(),
            resources,
        }
    }
}

/// 翻译引擎
pub trait TranslationEngine: Send + Sync {
    /// 注册资源包
    fn add_resource_bundle(&self, locale: &str, namespace: &str, bundle: &Value) -> anyhow::Result<()>;
}

// ============================================================================
// 能力提供者
// ============================================================================

/// 特性开关提供者
pub trait FeatureFlagProvider: Send + Sync {
    /// 是否同时具备全部特性开关
    fn has_feature_flags(&self, names: &[String]) -> anyhow::Result<bool>;
}

/// 权限提供者
pub trait PermissionProvider: Send + Sync {
    /// 是否同时具备全部权限
    fn has_permissions(&self, names: &[String]) -> anyhow::Result<bool>;
}

/// 固定集合的能力提供者
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    flags: HashSet<String>,
    permissions: HashSet<String>,
}

impl StaticCapabilities {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加特性开关
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// 添加权限
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }
}

impl FeatureFlagProvider for StaticCapabilities {
    fn has_feature_flags(&self, names: &[String]) -> anyhow::Result<bool> {
        Ok(names.iter().all(|name| self.flags.contains(name)))
    }
}

impl PermissionProvider for StaticCapabilities {
    fn has_permissions(&self, names: &[String]) -> anyhow::Result<bool> {
        Ok(names.iter().all(|name| self.permissions.contains(name)))
    }
}

// ============================================================================
// 依赖注入容器
// ============================================================================

/// 依赖注入容器，只供模块的初始化钩子使用
pub trait DependencyContainer: Send + Sync {
    /// 按令牌解析服务
    fn resolve(&self, token: &str) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl dyn DependencyContainer {
    /// 按令牌解析并向下转型
    pub fn get<T: Any + Send + Sync>(&self, token: &str) -> Option<Arc<T>> {
        self.resolve(token)?.downcast::<T>().ok()
    }
}

/// 基于映射表的依赖注入容器
#[derive(Default)]
pub struct ServiceContainer {
    services: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContainer {
    /// 创建空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册服务
    pub fn provide<T: Any + Send + Sync>(&self, token: impl Into<String>, service: T) {
        self.services.write().insert(token.into(), Arc::new(service));
    }
}

impl DependencyContainer for ServiceContainer {
    fn resolve(&self, token: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.read().get(token).cloned()
    }
}

// ============================================================================
// 宿主装配
// ============================================================================

/// 宿主提供给加载器的全部协作方
#[derive(Clone)]
pub struct HostBindings {
    /// 路由注册器
    pub routes: Arc<dyn RouteRegistrar>,
    /// 翻译引擎（缺失时带翻译的模块会失败）
    pub translations: Option<Arc<dyn TranslationEngine>>,
    /// 特性开关提供者（缺失时特性开关检查视为失败）
    pub feature_flags: Option<Arc<dyn FeatureFlagProvider>>,
    /// 权限提供者（缺失时权限检查视为失败）
    pub permissions: Option<Arc<dyn PermissionProvider>>,
    /// 依赖注入容器
    pub container: Arc<dyn DependencyContainer>,
}

impl HostBindings {
    /// 使用路由注册器创建，其余协作方为空
    pub fn new(routes: Arc<dyn RouteRegistrar>) -> Self {
        Self {
            routes,
            translations: None,
            feature_flags: None,
            permissions: None,
            container: Arc::new(ServiceContainer::new()),
        }
    }

    /// 设置翻译引擎
    pub fn with_translations(mut self, engine: Arc<dyn TranslationEngine>) -> Self {
        self.translations = Some(engine);
        self
    }

    /// 同一对象同时提供特性开关与权限
    pub fn with_capabilities<C>(mut self, capabilities: Arc<C>) -> Self
    where
        C: FeatureFlagProvider + PermissionProvider + 'static,
    {
        self.feature_flags = Some(capabilities.clone());
        self.permissions = Some(capabilities);
        self
    }

    /// 设置特性开关提供者
    pub fn with_feature_flags(mut self, provider: Arc<dyn FeatureFlagProvider>) -> Self {
        self.feature_flags = Some(provider);
        self
    }

    /// 设置权限提供者
    pub fn with_permissions(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(provider);
        self
    }

    /// 设置依赖注入容器
    pub fn with_container(mut self, container: Arc<dyn DependencyContainer>) -> Self {
        self.container = container;
        self
    }
}

impl std::fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBindings")
            .field("translations", &self.translations.is_some())
            .field("feature_flags", &self.feature_flags.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_capabilities() {
        let caps = StaticCapabilities::new()
            .with_flags(["beta"])
            .with_permissions(["todo:read", "todo:write"]);

        assert!(caps.has_feature_flags(&["beta".to_string()]).unwrap());
        assert!(!caps.has_feature_flags(&["beta".to_string(), "gamma".to_string()]).unwrap());
        assert!(caps.has_permissions(&["todo:read".to_string()]).unwrap());
        assert!(caps.has_feature_flags(&[]).unwrap());
    }

    #[test]
    fn test_service_container_typed_get() {
        let container = ServiceContainer::new();
        container.provide("api.base_url", "https://api.example.com".to_string());

        let container: Arc<dyn DependencyContainer> = Arc::new(container);
        let url = container.get::<String>("api.base_url").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com");
        assert!(container.get::<u32>("api.base_url").is_none());
        assert!(container.get::<String>("missing").is_none());
    }

    #[test]
    fn test_memory_registrar_builds_menu() {
        let registrar = MemoryRouteRegistrar::new();
        registrar
            .register(vec![RouteDescriptor::new("todo", "/todo")
                .with_title("待办")
                .with_child(RouteDescriptor::new("todo.detail", "/todo/:id"))])
            .unwrap();

        assert_eq!(registrar.route_names(), vec!["todo", "todo.detail"]);

        let menu = registrar.build_menu(&registrar.routes());
        assert_eq!(menu[0].title, "待办");
        assert_eq!(menu[0].children[0].title, "todo.detail");
    }
}
