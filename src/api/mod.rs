//! API 模块
//!
//! 包含对外提供的 SDK 入口与宿主协作接口。
//!
//! # 模块概览
//!
//! - `sdk`: ChipsLoader 主接口，装配并驱动模块编排引擎
//! - `host`: 宿主需要提供的协作方（路由注册、翻译引擎、能力提供者、依赖注入容器）
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_loader::api::host::{HostBindings, MemoryRouteRegistrar, StaticCapabilities};
//! use chips_loader::{ChipsLoader, LoaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let capabilities = Arc::new(StaticCapabilities::new().with_flags(["beta"]));
//!     let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new()))
//!         .with_capabilities(capabilities);
//!
//!     let loader = ChipsLoader::builder(LoaderConfig::default())
//!         .host(host)
//!         .with_logging()
//!         .build()?;
//!     loader.start().await?;
//!     Ok(())
//! }
//! ```

pub mod host;
pub mod sdk;

// 重导出主要类型
pub use host::{
    DependencyContainer, FeatureFlagProvider, HostBindings, MemoryRouteRegistrar, MenuNode,
    PermissionProvider, RouteRegistrar, ServiceContainer, StaticCapabilities, TranslationBundle,
    TranslationEngine,
};
pub use sdk::{ChipsLoader, ChipsLoaderBuilder, LoaderSummary};
