//! 核心模块
//!
//! 包含加载器配置。

pub mod config;

pub use config::{
    LoadingConfig, LoaderConfig, LoaderConfigBuilder, LogConfig, RemoteLoadOptions,
};
