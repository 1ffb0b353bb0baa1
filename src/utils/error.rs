//! 模块加载器错误类型定义
//!
//! 本模块定义了加载器中使用的所有错误类型。
//!
//! 去重后的加载结果会同时交给多个等待者，因此 [`LoaderError`] 必须实现 `Clone`，
//! 外部错误源统一以 `Arc` 或渲染后的字符串保存。

use std::sync::Arc;

use thiserror::Error;

use crate::module::condition::ConditionFailure;

/// 模块加载器核心错误类型
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    // ==================== 注册表错误 ====================

    /// 模块名称重复
    #[error("模块名称重复: '{0}'")]
    DuplicateName(String),

    /// 注册表已封存（INIT 模块加载完成后不再接受新模块）
    #[error("注册表已封存，拒绝添加模块: '{0}'")]
    RegistrySealed(String),

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块描述无效
    #[error("无效的模块描述: '{module_name}' - {reason}")]
    InvalidDescriptor {
        module_name: String,
        reason: String,
    },

    /// 延迟配置解析失败（可恢复：模块只是不会初始化）
    #[error("模块配置加载失败: '{module_name}' - {cause}")]
    ConfigLoadFailed {
        module_name: String,
        cause: String,
    },

    // ==================== 依赖错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {}", .path.join(" -> "))]
    CircularDependency {
        path: Vec<String>,
    },

    /// 依赖模块从未注册
    #[error("模块 '{module_name}' 缺少依赖: {missing:?}")]
    MissingDependency {
        module_name: String,
        missing: Vec<String>,
    },

    // ==================== 加载条件错误 ====================

    /// 加载条件未满足
    #[error("模块 '{module_name}' 不满足加载条件 ({reason}): {details:?}")]
    ConditionsNotMet {
        module_name: String,
        reason: ConditionFailure,
        details: Vec<String>,
    },

    // ==================== 生命周期错误 ====================

    /// 初始化钩子执行失败
    #[error("模块 '{module_name}' 的初始化钩子执行失败: {cause}")]
    InitHookFailed {
        module_name: String,
        cause: String,
    },

    /// 宿主拒绝了模块的路由或翻译资源
    #[error("模块 '{module_name}' 的资源注册失败: {cause}")]
    RegistrationFailed {
        module_name: String,
        cause: String,
    },

    /// 宿主装配错误
    #[error("配置错误: {0}")]
    Configuration(String),

    // ==================== 加载策略错误 ====================

    /// INIT 策略已执行过
    #[error("INIT 模块已加载，不能重复执行")]
    AlreadyLoaded,

    /// INIT 策略尚未完成
    #[error("INIT 模块尚未加载完成，不能加载 NORMAL 模块")]
    InitNotLoaded,

    /// 按需加载超时
    #[error("模块加载超时: '{module_name}' ({timeout_ms}ms)")]
    Timeout {
        module_name: String,
        timeout_ms: u64,
    },

    // ==================== 远程模块错误 ====================

    /// 远程模块加载失败（重试耗尽）
    #[error("远程模块加载失败: '{module_name}' @ {entry}（共尝试 {attempts} 次）- {cause}")]
    RemoteLoadFailed {
        module_name: String,
        entry: String,
        attempts: u32,
        cause: String,
    },

    /// 远程模块加载超时（重试耗尽）
    #[error("远程模块加载超时: '{module_name}' @ {entry} ({timeout_ms}ms)")]
    RemoteTimeout {
        module_name: String,
        entry: String,
        timeout_ms: u64,
    },

    /// 远程入口未暴露指定的联邦容器
    #[error("远程容器未找到: 模块 '{module_name}' 的 scope '{scope}' @ {entry}")]
    RemoteContainerNotFound {
        module_name: String,
        entry: String,
        scope: String,
    },

    // ==================== 清单与 IO 错误 ====================

    /// 模块清单无效
    #[error("无效的模块清单: {0}")]
    InvalidManifest(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[source] Arc<serde_yaml::Error>),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 加载器操作结果类型别名
pub type Result<T> = std::result::Result<T, LoaderError>;

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Json(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for LoaderError {
    fn from(err: serde_yaml::Error) -> Self {
        LoaderError::Yaml(Arc::new(err))
    }
}

/// 错误码常量
pub mod error_code {
    // 注册表错误 (REGISTRY-xxx)
    pub const REGISTRY_DUPLICATE_NAME: &str = "REGISTRY-001";
    pub const REGISTRY_SEALED: &str = "REGISTRY-002";
    pub const REGISTRY_MODULE_NOT_FOUND: &str = "REGISTRY-003";
    pub const REGISTRY_INVALID_DESCRIPTOR: &str = "REGISTRY-004";
    pub const REGISTRY_CONFIG_LOAD_FAILED: &str = "REGISTRY-005";

    // 依赖错误 (DEPENDENCY-xxx)
    pub const DEPENDENCY_CIRCULAR: &str = "DEPENDENCY-001";
    pub const DEPENDENCY_MISSING: &str = "DEPENDENCY-002";

    // 加载错误 (LOADER-xxx)
    pub const LOADER_CONDITIONS_NOT_MET: &str = "LOADER-001";
    pub const LOADER_INIT_HOOK_FAILED: &str = "LOADER-002";
    pub const LOADER_ALREADY_LOADED: &str = "LOADER-003";
    pub const LOADER_INIT_NOT_LOADED: &str = "LOADER-004";
    pub const LOADER_TIMEOUT: &str = "LOADER-005";
    pub const LOADER_REGISTRATION_FAILED: &str = "LOADER-006";

    // 远程模块错误 (REMOTE-xxx)
    pub const REMOTE_LOAD_FAILED: &str = "REMOTE-001";
    pub const REMOTE_TIMEOUT: &str = "REMOTE-002";
    pub const REMOTE_CONTAINER_NOT_FOUND: &str = "REMOTE-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_INVALID: &str = "CONFIG-001";
    pub const CONFIG_MANIFEST_INVALID: &str = "CONFIG-002";
    pub const CONFIG_IO: &str = "CONFIG-003";

    pub const INTERNAL: &str = "INTERNAL-001";
}

impl LoaderError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            LoaderError::DuplicateName(_) => error_code::REGISTRY_DUPLICATE_NAME,
            LoaderError::RegistrySealed(_) => error_code::REGISTRY_SEALED,
            LoaderError::ModuleNotFound(_) => error_code::REGISTRY_MODULE_NOT_FOUND,
            LoaderError::InvalidDescriptor { .. } => error_code::REGISTRY_INVALID_DESCRIPTOR,
            LoaderError::ConfigLoadFailed { .. } => error_code::REGISTRY_CONFIG_LOAD_FAILED,
            LoaderError::CircularDependency { .. } => error_code::DEPENDENCY_CIRCULAR,
            LoaderError::MissingDependency { .. } => error_code::DEPENDENCY_MISSING,
            LoaderError::ConditionsNotMet { .. } => error_code::LOADER_CONDITIONS_NOT_MET,
            LoaderError::InitHookFailed { .. } => error_code::LOADER_INIT_HOOK_FAILED,
            LoaderError::RegistrationFailed { .. } => error_code::LOADER_REGISTRATION_FAILED,
            LoaderError::AlreadyLoaded => error_code::LOADER_ALREADY_LOADED,
            LoaderError::InitNotLoaded => error_code::LOADER_INIT_NOT_LOADED,
            LoaderError::Timeout { .. } => error_code::LOADER_TIMEOUT,
            LoaderError::RemoteLoadFailed { .. } => error_code::REMOTE_LOAD_FAILED,
            LoaderError::RemoteTimeout { .. } => error_code::REMOTE_TIMEOUT,
            LoaderError::RemoteContainerNotFound { .. } => error_code::REMOTE_CONTAINER_NOT_FOUND,
            LoaderError::Configuration(_) => error_code::CONFIG_INVALID,
            LoaderError::InvalidManifest(_) => error_code::CONFIG_MANIFEST_INVALID,
            LoaderError::Io(_) | LoaderError::Json(_) | LoaderError::Yaml(_) => {
                error_code::CONFIG_IO
            }
            LoaderError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// 获取错误关联的模块名称（如果有）
    pub fn module_name(&self) -> Option<&str> {
        match self {
            LoaderError::DuplicateName(name)
            | LoaderError::RegistrySealed(name)
            | LoaderError::ModuleNotFound(name) => Some(name),
            LoaderError::InvalidDescriptor { module_name, .. }
            | LoaderError::ConfigLoadFailed { module_name, .. }
            | LoaderError::MissingDependency { module_name, .. }
            | LoaderError::ConditionsNotMet { module_name, .. }
            | LoaderError::InitHookFailed { module_name, .. }
            | LoaderError::RegistrationFailed { module_name, .. }
            | LoaderError::Timeout { module_name, .. }
            | LoaderError::RemoteLoadFailed { module_name, .. }
            | LoaderError::RemoteTimeout { module_name, .. }
            | LoaderError::RemoteContainerNotFound { module_name, .. } => Some(module_name),
            _ => None,
        }
    }

    /// 是否属于远程加载错误
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            LoaderError::RemoteLoadFailed { .. }
                | LoaderError::RemoteTimeout { .. }
                | LoaderError::RemoteContainerNotFound { .. }
        )
    }
}

/// 将协作方返回的 `anyhow::Error` 渲染为完整的错误链文本
pub(crate) fn render_cause(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
