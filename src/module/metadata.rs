//! 模块元数据定义
//!
//! 模块描述（[`ModuleDescriptor`]）与模块解析后贡献的内容（[`ModuleConfig`]）。
//!
//! 模块配置可以是延迟的：首次解析时执行一次工厂函数或远程拉取，结果永久替换延迟形式。

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::host::{DependencyContainer, TranslationBundle};
use crate::module::route::RouteDescriptor;

/// 加载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadType {
    /// 首屏渲染前必须加载完成，不允许声明加载条件
    #[serde(alias = "init")]
    Init,
    /// 首屏渲染后加载，可声明加载条件，也可按需加载
    #[serde(alias = "normal")]
    Normal,
}

impl Default for LoadType {
    fn default() -> Self {
        LoadType::Normal
    }
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadType::Init => write!(f, "INIT"),
            LoadType::Normal => write!(f, "NORMAL"),
        }
    }
}

/// 加载条件（仅 NORMAL 模块）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCondition {
    /// 必须先加载的模块
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 必须全部开启的特性开关
    #[serde(default, alias = "feature_flags")]
    pub feature_flags: Vec<String>,
    /// 必须全部具备的访问权限
    #[serde(default, alias = "access_permissions")]
    pub access_permissions: Vec<String>,
}

impl LoadCondition {
    /// 创建空条件
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加依赖模块
    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// 添加特性开关
    pub fn with_feature_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// 添加访问权限
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// 条件是否为空
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.feature_flags.is_empty() && self.access_permissions.is_empty()
    }
}

/// 远程模块位置
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteSpec {
    /// 远程入口地址
    pub entry: String,
    /// 联邦命名空间
    pub scope: String,
    /// 容器中暴露的模块名，缺省为 `./<模块名>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl RemoteSpec {
    /// 创建远程位置
    pub fn new(entry: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            scope: scope.into(),
            module: None,
        }
    }

    /// 指定暴露的模块名
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// 在容器中查找的模块名
    pub fn exposed_module(&self, module_name: &str) -> String {
        self.module.clone().unwrap_or_else(|| format!("./{}", module_name))
    }
}

/// 请求模拟处理器，由宿主的模拟服务器使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockHandler {
    /// HTTP 方法
    pub method: String,
    /// 请求路径
    pub path: String,
    /// 响应状态码
    #[serde(default = "default_mock_status")]
    pub status: u16,
    /// 响应体
    #[serde(default)]
    pub body: Value,
}

fn default_mock_status() -> u16 {
    200
}

impl MockHandler {
    /// 创建返回 200 的处理器
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            status: default_mock_status(),
            body,
        }
    }
}

/// 初始化钩子的执行上下文
#[derive(Clone)]
pub struct InitContext {
    /// 模块名称
    pub module_name: String,
    /// 依赖注入容器
    pub container: Arc<dyn DependencyContainer>,
}

/// 路由生成函数
pub type RoutesProducer = Arc<dyn Fn() -> Vec<RouteDescriptor> + Send + Sync>;

/// 翻译资源生成函数
pub type I18nRegistrar = Arc<dyn Fn() -> Vec<TranslationBundle> + Send + Sync>;

/// 一次性初始化钩子
pub type InitHook = Arc<dyn Fn(InitContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 延迟配置工厂
pub type ConfigFactory = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<ModuleConfig>> + Send + Sync>;

/// 模块配置：模块解析后贡献的全部内容
#[derive(Clone, Default)]
pub struct ModuleConfig {
    routes: Option<RoutesProducer>,
    i18n: Option<I18nRegistrar>,
    init: Option<InitHook>,
    mock_handlers: Vec<MockHandler>,
}

impl ModuleConfig {
    /// 创建空配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置路由生成函数
    pub fn with_routes<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Vec<RouteDescriptor> + Send + Sync + 'static,
    {
        self.routes = Some(Arc::new(producer));
        self
    }

    /// 设置翻译资源生成函数
    pub fn with_i18n<F>(mut self, registrar: F) -> Self
    where
        F: Fn() -> Vec<TranslationBundle> + Send + Sync + 'static,
    {
        self.i18n = Some(Arc::new(registrar));
        self
    }

    /// 设置异步初始化钩子
    pub fn with_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(InitContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    /// 设置同步初始化钩子
    pub fn with_sync_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(InitContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(move |ctx| futures::future::ready(hook(ctx)).boxed()));
        self
    }

    /// 添加请求模拟处理器
    pub fn with_mock_handler(mut self, handler: MockHandler) -> Self {
        self.mock_handlers.push(handler);
        self
    }

    pub fn routes_producer(&self) -> Option<&RoutesProducer> {
        self.routes.as_ref()
    }

    pub fn i18n_registrar(&self) -> Option<&I18nRegistrar> {
        self.i18n.as_ref()
    }

    pub fn init_hook(&self) -> Option<&InitHook> {
        self.init.as_ref()
    }

    pub fn mock_handlers(&self) -> &[MockHandler] {
        &self.mock_handlers
    }
}

impl fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("routes", &self.routes.is_some())
            .field("i18n", &self.i18n.is_some())
            .field("init", &self.init.is_some())
            .field("mock_handlers", &self.mock_handlers.len())
            .finish()
    }
}

/// 配置来源
#[derive(Clone)]
pub(crate) enum ConfigSource {
    /// 已解析
    Resolved(Arc<ModuleConfig>),
    /// 本地延迟工厂
    Deferred(ConfigFactory),
    /// 需要从远程容器拉取
    Remote,
}

/// 配置当前所处的形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    Resolved,
    Deferred,
    Remote,
}

/// 单次赋值的配置单元
///
/// 延迟形式只会被替换一次，之后一直保持已解析。
pub(crate) struct ConfigCell {
    source: RwLock<ConfigSource>,
    originally_deferred: bool,
}

impl ConfigCell {
    fn new(source: ConfigSource) -> Self {
        let originally_deferred = !matches!(source, ConfigSource::Resolved(_));
        Self {
            source: RwLock::new(source),
            originally_deferred,
        }
    }

    pub(crate) fn source(&self) -> ConfigSource {
        self.source.read().clone()
    }

    pub(crate) fn resolved(&self) -> Option<Arc<ModuleConfig>> {
        match &*self.source.read() {
            ConfigSource::Resolved(config) => Some(Arc::clone(config)),
            _ => None,
        }
    }

    /// 写入解析结果；已解析时保留原值并返回原值
    pub(crate) fn resolve(&self, config: Arc<ModuleConfig>) -> Arc<ModuleConfig> {
        let mut source = self.source.write();
        if let ConfigSource::Resolved(existing) = &*source {
            return Arc::clone(existing);
        }
        *source = ConfigSource::Resolved(Arc::clone(&config));
        config
    }

    fn state(&self) -> ConfigState {
        match &*self.source.read() {
            ConfigSource::Resolved(_) => ConfigState::Resolved,
            ConfigSource::Deferred(_) => ConfigState::Deferred,
            ConfigSource::Remote => ConfigState::Remote,
        }
    }
}

/// 模块描述
///
/// 描述在注册表中以 `Arc<ModuleDescriptor>` 共享，配置解析会就地替换延迟形式，
/// 所有持有者都能观察到。
pub struct ModuleDescriptor {
    /// 模块名称（注册表键）
    pub name: String,
    /// 加载类型
    pub load_type: LoadType,
    /// 加载优先级，越小越先加载
    pub load_priority: i32,
    /// 加载条件
    pub load_condition: Option<LoadCondition>,
    /// 远程位置
    pub remote: Option<RemoteSpec>,
    config: ConfigCell,
}

impl ModuleDescriptor {
    /// 创建描述构建器
    pub fn builder(name: impl Into<String>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder::new(name)
    }

    /// 声明的依赖模块
    pub fn dependencies(&self) -> &[String] {
        self.load_condition
            .as_ref()
            .map(|c| c.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_init(&self) -> bool {
        self.load_type == LoadType::Init
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// 配置当前形态
    pub fn config_state(&self) -> ConfigState {
        self.config.state()
    }

    /// 已解析的配置
    pub fn resolved_config(&self) -> Option<Arc<ModuleConfig>> {
        self.config.resolved()
    }

    /// 配置最初是否为延迟形式（决定路由是否需要自动加载包装）
    pub fn is_config_originally_deferred(&self) -> bool {
        self.config.originally_deferred
    }

    pub(crate) fn config_cell(&self) -> &ConfigCell {
        &self.config
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("load_type", &self.load_type)
            .field("load_priority", &self.load_priority)
            .field("load_condition", &self.load_condition)
            .field("remote", &self.remote)
            .field("config", &self.config.state())
            .finish()
    }
}

/// 模块描述构建器
pub struct ModuleDescriptorBuilder {
    name: String,
    load_type: LoadType,
    load_priority: i32,
    load_condition: Option<LoadCondition>,
    remote: Option<RemoteSpec>,
    source: Option<ConfigSource>,
}

impl ModuleDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_type: LoadType::Normal,
            load_priority: 0,
            load_condition: None,
            remote: None,
            source: None,
        }
    }

    pub fn load_type(mut self, load_type: LoadType) -> Self {
        self.load_type = load_type;
        self
    }

    /// 标记为 INIT 模块
    pub fn init(self) -> Self {
        self.load_type(LoadType::Init)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.load_priority = priority;
        self
    }

    pub fn condition(mut self, condition: LoadCondition) -> Self {
        self.load_condition = Some(condition);
        self
    }

    /// 仅声明依赖的快捷方式
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let condition = self.load_condition.take().unwrap_or_default();
        self.load_condition = Some(condition.with_dependencies(names));
        self
    }

    /// 使用已解析的配置
    pub fn config(mut self, config: ModuleConfig) -> Self {
        self.source = Some(ConfigSource::Resolved(Arc::new(config)));
        self
    }

    /// 使用延迟配置
    pub fn deferred_config<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<ModuleConfig>> + Send + 'static,
    {
        let factory: ConfigFactory = Arc::new(move || factory().boxed());
        self.source = Some(ConfigSource::Deferred(factory));
        self
    }

    /// 从远程容器拉取配置
    pub fn remote(mut self, spec: RemoteSpec) -> Self {
        self.remote = Some(spec);
        self
    }

    pub fn build(self) -> ModuleDescriptor {
        let source = match self.source {
            Some(source) => source,
            None if self.remote.is_some() => ConfigSource::Remote,
            None => ConfigSource::Resolved(Arc::new(ModuleConfig::default())),
        };

        ModuleDescriptor {
            name: self.name,
            load_type: self.load_type,
            load_priority: self.load_priority,
            load_condition: self.load_condition,
            remote: self.remote,
            config: ConfigCell::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_type_serde() {
        let parsed: LoadType = serde_json::from_str("\"INIT\"").unwrap();
        assert_eq!(parsed, LoadType::Init);
        let parsed: LoadType = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(parsed, LoadType::Normal);
        assert_eq!(LoadType::Init.to_string(), "INIT");
    }

    #[test]
    fn test_load_condition_accepts_camel_case() {
        let json = r#"{"dependencies":["core"],"featureFlags":["beta"],"accessPermissions":["admin"]}"#;
        let condition: LoadCondition = serde_json::from_str(json).unwrap();
        assert_eq!(condition.dependencies, vec!["core"]);
        assert_eq!(condition.feature_flags, vec!["beta"]);
        assert_eq!(condition.access_permissions, vec!["admin"]);
        assert!(!condition.is_empty());
        assert!(LoadCondition::new().is_empty());
    }

    #[test]
    fn test_builder_defaults() {
        let descriptor = ModuleDescriptor::builder("todo").build();
        assert_eq!(descriptor.load_type, LoadType::Normal);
        assert_eq!(descriptor.config_state(), ConfigState::Resolved);
        assert!(!descriptor.is_config_originally_deferred());
        assert!(descriptor.dependencies().is_empty());
    }

    #[test]
    fn test_remote_descriptor_without_config_is_remote() {
        let descriptor = ModuleDescriptor::builder("billing")
            .remote(RemoteSpec::new("https://cdn.example.com/remoteEntry.js", "billing"))
            .build();
        assert_eq!(descriptor.config_state(), ConfigState::Remote);
        assert!(descriptor.is_config_originally_deferred());
        assert_eq!(descriptor.remote.as_ref().unwrap().exposed_module("billing"), "./billing");
    }

    #[test]
    fn test_config_cell_resolves_once() {
        let descriptor = ModuleDescriptor::builder("todo")
            .deferred_config(|| async { Ok(ModuleConfig::new()) })
            .build();
        assert_eq!(descriptor.config_state(), ConfigState::Deferred);

        let first = descriptor.config_cell().resolve(Arc::new(ModuleConfig::new()));
        let second = descriptor.config_cell().resolve(Arc::new(ModuleConfig::new()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(descriptor.config_state(), ConfigState::Resolved);
        assert!(descriptor.is_config_originally_deferred());
    }

    #[test]
    fn test_depends_on_merges_into_condition() {
        let descriptor = ModuleDescriptor::builder("report")
            .condition(LoadCondition::new().with_feature_flags(["beta"]))
            .depends_on(["core", "auth"])
            .build();
        assert_eq!(descriptor.dependencies(), ["core".to_string(), "auth".to_string()]);
        assert_eq!(descriptor.load_condition.as_ref().unwrap().feature_flags, vec!["beta"]);
    }
}
