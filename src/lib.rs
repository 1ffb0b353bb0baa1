//! # Chips Loader - 薯片模块编排引擎
//!
//! 微前端宿主的模块编排引擎，决定一组动态发现的功能模块在何时、以何种顺序、
//! 在什么条件下激活它们的代码、路由、翻译资源和初始化钩子：
//!
//! - **两阶段加载**: INIT 模块在首屏渲染前按优先级顺序加载，NORMAL 模块在渲染后按依赖层级并发加载
//! - **去重**: 同一模块同一时刻最多一个进行中的加载，所有并发请求共享同一结果
//! - **依赖管理**: 循环依赖与缺失依赖在任何副作用执行前被识别
//! - **条件加载**: 特性开关、访问权限、依赖模块
//! - **远程模块**: 从联邦容器拉取配置，带超时、重试与缓存
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_loader::{ChipsLoader, LoaderConfig, ModuleConfig, ModuleDescriptor, RouteDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = ChipsLoader::builder(LoaderConfig::default()).build()?;
//!
//!     loader.add_module(ModuleDescriptor::builder("core").init().build()).await?;
//!     loader
//!         .add_module(
//!             ModuleDescriptor::builder("todo")
//!                 .depends_on(["core"])
//!                 .config(ModuleConfig::new().with_routes(|| vec![RouteDescriptor::new("todo", "/todo")]))
//!                 .build(),
//!         )
//!         .await?;
//!
//!     // 首屏渲染前
//!     loader.start().await?;
//!     // 首屏渲染后
//!     loader.run_normal_modules().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 注册表、状态跟踪、依赖解析、生命周期与加载策略
//! - `core` - 加载器配置
//! - `api` - SDK 入口与宿主协作接口
//! - `utils` - 错误类型与日志系统

#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    ConditionFailure, DependencyGraph, InitLoadStrategy, LoadCondition, LoadPlan, LoadReport,
    LoadStrategy, LoadType, ManifestParser, MockHandler, ModuleConfig, ModuleDescriptor,
    ModuleManager, ModuleRegistry, ModuleStatus, NormalLoadStrategy, PreloadReport, RemoteSpec,
    RouteDescriptor, StatusChangeEvent,
};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, LoaderError, Result};

pub use api::host::HostBindings;
pub use api::sdk::{ChipsLoader, ChipsLoaderBuilder};
pub use core::config::{LoaderConfig, LoaderConfigBuilder, LoadingConfig, LogConfig, RemoteLoadOptions};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
