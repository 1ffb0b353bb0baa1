//! 模块管理模块
//!
//! 包含模块编排引擎的核心组件：
//! - 模块描述与配置
//! - 注册表、状态跟踪、条件校验
//! - 依赖解析与分层
//! - 生命周期管理与加载策略
//! - 远程模块加载
//! - 清单解析

pub mod condition;
pub mod dependency;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod remote;
pub mod route;
pub mod status;
pub mod validation;

// 重导出常用类型
pub use condition::{ConditionFailure, ConditionValidator, ValidationResult};
pub use dependency::{
    build_dependency_levels, DependencyGraph, DependencyLevels, DependencyResolver, SkippedModule,
};
pub use lifecycle::LifecycleManager;
pub use loader::{InitLoadStrategy, LoadContext, LoadReport, LoadStrategy, NormalLoadStrategy, PreloadReport};
pub use manager::{BlockedModule, LoadPlan, ModuleManager};
pub use metadata::{
    ConfigState, InitContext, LoadCondition, LoadType, MockHandler, ModuleConfig, ModuleDescriptor,
    ModuleDescriptorBuilder, RemoteSpec,
};
pub use parser::{ManifestEntry, ManifestFormat, ManifestParser, ModuleManifest};
pub use registry::ModuleRegistry;
pub use remote::{RemoteContainer, RemoteEntryFetcher, RemoteModuleLoader, SharedScopeRegistry};
pub use route::{find_route, AutoLoadHook, RouteDescriptor};
pub use status::{
    InflightRegistry, ModuleStatus, StatusChangeEvent, StatusRecord, StatusTracker, SubscriptionId,
};
pub use validation::{CycleDiagnosticsPass, PromotionRecheckPass, ValidationPass, ValidationPipeline};
