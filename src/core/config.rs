//! 加载器配置
//!
//! 定义加载器的配置结构和加载逻辑。配置文件支持 YAML 与 JSON，按扩展名区分。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 额外的过滤指令（EnvFilter 格式）
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            filter: None,
        }
    }
}

/// 模块加载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// NORMAL 模块在首屏渲染后延迟加载的时间（毫秒，0 表示不延迟）
    #[serde(default)]
    pub normal_load_delay_ms: u64,

    /// 按需加载的默认超时时间（毫秒）
    #[serde(default)]
    pub load_timeout_ms: Option<u64>,

    /// 预加载模块提升为已加载时是否重新校验特性开关与权限
    #[serde(default)]
    pub revalidate_on_promotion: bool,

    /// 远程模块结果缓存容量
    #[serde(default = "default_remote_cache_capacity")]
    pub remote_cache_capacity: usize,
}

fn default_remote_cache_capacity() -> usize {
    64
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            normal_load_delay_ms: 0,
            load_timeout_ms: None,
            revalidate_on_promotion: false,
            remote_cache_capacity: default_remote_cache_capacity(),
        }
    }
}

impl LoadingConfig {
    /// NORMAL 模块的延迟时间
    pub fn normal_load_delay(&self) -> Option<Duration> {
        (self.normal_load_delay_ms > 0).then(|| Duration::from_millis(self.normal_load_delay_ms))
    }

    /// 按需加载的默认超时
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_ms.map(Duration::from_millis)
    }
}

/// 远程模块加载选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLoadOptions {
    /// 最大尝试次数（含首次）
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// 单次尝试超时（毫秒）
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,

    /// 两次尝试之间的等待时间（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_remote_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for RemoteLoadOptions {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout_ms: default_remote_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RemoteLoadOptions {
    /// 单次尝试超时
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 重试间隔
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 实际尝试次数，至少一次
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// 加载器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块加载配置
    #[serde(default)]
    pub loading: LoadingConfig,

    /// 远程模块加载选项
    #[serde(default)]
    pub remote: RemoteLoadOptions,

    /// 开发模式：启用循环依赖诊断与提升时的条件复查
    #[serde(default)]
    pub dev_mode: bool,
}

impl LoaderConfig {
    /// 创建配置构建器
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::new()
    }

    /// 从文件加载配置
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: LoaderConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        Ok(config)
    }

    /// 合并另一个配置（只覆盖非默认值）
    pub fn merge(&mut self, other: LoaderConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.filter.is_some() {
            self.logging.filter = other.logging.filter;
        }
        if other.loading.normal_load_delay_ms != 0 {
            self.loading.normal_load_delay_ms = other.loading.normal_load_delay_ms;
        }
        if other.loading.load_timeout_ms.is_some() {
            self.loading.load_timeout_ms = other.loading.load_timeout_ms;
        }
        if other.loading.revalidate_on_promotion {
            self.loading.revalidate_on_promotion = true;
        }
        if other.loading.remote_cache_capacity != default_remote_cache_capacity() {
            self.loading.remote_cache_capacity = other.loading.remote_cache_capacity;
        }
        if other.remote != RemoteLoadOptions::default() {
            self.remote = other.remote;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }

    /// 是否需要在提升预加载模块时复查条件
    pub fn revalidate_on_promotion(&self) -> bool {
        self.dev_mode || self.loading.revalidate_on_promotion
    }

    /// 校验配置取值
    pub fn validate(&self) -> crate::utils::Result<()> {
        let mut errors = Vec::new();

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            errors.push(format!("无效的日志级别: '{}'", self.logging.level));
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            errors.push("启用文件日志时必须指定 log_dir".to_string());
        }
        if self.remote.timeout_ms == 0 {
            errors.push("remote.timeout_ms 必须大于 0".to_string());
        }
        if self.loading.remote_cache_capacity == 0 {
            errors.push("loading.remote_cache_capacity 必须大于 0".to_string());
        }
        if self.loading.load_timeout_ms == Some(0) {
            errors.push("loading.load_timeout_ms 必须大于 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::utils::LoaderError::Configuration(errors.join("; ")))
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置 NORMAL 模块的延迟加载时间
    pub fn normal_load_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.loading.normal_load_delay_ms = delay_ms;
        self
    }

    /// 设置按需加载超时
    pub fn load_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.loading.load_timeout_ms = Some(timeout_ms);
        self
    }

    /// 提升预加载模块时复查条件
    pub fn revalidate_on_promotion(mut self) -> Self {
        self.config.loading.revalidate_on_promotion = true;
        self
    }

    /// 设置远程模块加载选项
    pub fn remote(mut self, options: RemoteLoadOptions) -> Self {
        self.config.remote = options;
        self
    }

    /// 设置远程结果缓存容量
    pub fn remote_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.loading.remote_cache_capacity = capacity;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert!(!config.dev_mode);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.remote.retries, 3);
        assert_eq!(config.remote.timeout_ms, 10_000);
        assert_eq!(config.remote.retry_delay_ms, 1_000);
        assert_eq!(config.loading.remote_cache_capacity, 64);
        assert!(config.loading.normal_load_delay().is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = LoaderConfig::builder()
            .log_level("debug")
            .normal_load_delay_ms(200)
            .load_timeout_ms(5_000)
            .dev_mode()
            .build();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.loading.normal_load_delay(), Some(Duration::from_millis(200)));
        assert_eq!(config.loading.load_timeout(), Some(Duration::from_secs(5)));
        assert!(config.revalidate_on_promotion());
    }

    #[test]
    fn test_config_merge() {
        let mut base = LoaderConfig::default();
        let override_config = LoaderConfig::builder()
            .log_level("debug")
            .remote(RemoteLoadOptions {
                retries: 5,
                timeout_ms: 2_000,
                retry_delay_ms: 100,
            })
            .build();

        base.merge(override_config);

        assert_eq!(base.logging.level, "debug");
        assert_eq!(base.remote.retries, 5);
        assert!(!base.dev_mode);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        LoaderConfig::default().validate().unwrap();

        let mut config = LoaderConfig::builder().log_level("verbose").build();
        config.remote.timeout_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("verbose"));
        assert!(err.contains("timeout_ms"));
    }

    #[test]
    fn test_remote_options_attempts_at_least_one() {
        let options = RemoteLoadOptions {
            retries: 0,
            ..RemoteLoadOptions::default()
        };
        assert_eq!(options.attempts(), 1);
    }

    #[test]
    fn test_config_yaml_partial_uses_defaults() {
        let yaml = "remote:\n  retries: 2\nloading:\n  revalidate_on_promotion: true\n";
        let parsed: LoaderConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(parsed.remote.retries, 2);
        assert_eq!(parsed.remote.timeout_ms, 10_000);
        assert!(parsed.loading.revalidate_on_promotion);
        assert_eq!(parsed.logging.rotation, "daily");
    }
}
