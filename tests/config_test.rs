//! 加载器配置集成测试
//!
//! 测试配置文件加载、合并、校验，以及配置对加载行为的影响

use std::sync::Arc;
use std::time::Duration;

use chips_loader::api::host::{HostBindings, MemoryRouteRegistrar};
use chips_loader::{
    ChipsLoader, LoaderConfig, LoaderError, LoggerConfig, ModuleConfig, ModuleDescriptor, ModuleManager,
    ModuleRegistry, RemoteLoadOptions, RotationStrategy,
};
use tempfile::TempDir;

/// 测试完整的配置加载流程
#[tokio::test]
async fn test_full_config_loading_workflow() {
    let temp_dir = TempDir::new().unwrap();

    // 基础配置
    let base_path = temp_dir.path().join("loader.yaml");
    tokio::fs::write(
        &base_path,
        r#"
logging:
  level: info
loading:
  normal_load_delay_ms: 200
remote:
  retries: 5
"#,
    )
    .await
    .unwrap();

    // 环境覆盖
    let override_path = temp_dir.path().join("override.json");
    tokio::fs::write(
        &override_path,
        r#"{
  "logging": { "level": "debug", "json_format": true },
  "loading": { "load_timeout_ms": 3000, "remote_cache_capacity": 16 },
  "dev_mode": true
}"#,
    )
    .await
    .unwrap();

    let mut config = LoaderConfig::from_file(&base_path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(base_path.as_path()));
    assert_eq!(config.loading.normal_load_delay(), Some(Duration::from_millis(200)));
    assert_eq!(config.remote.retries, 5);
    // 未出现的字段取默认值
    assert_eq!(config.remote.timeout_ms, 10_000);
    assert_eq!(config.remote.retry_delay_ms, 1_000);
    assert_eq!(config.loading.remote_cache_capacity, 64);

    let overrides = LoaderConfig::from_file(&override_path).await.unwrap();
    config.merge(overrides);

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.loading.normal_load_delay_ms, 200);
    assert_eq!(config.loading.load_timeout(), Some(Duration::from_secs(3)));
    assert_eq!(config.loading.remote_cache_capacity, 16);
    assert_eq!(config.remote.retries, 5);
    assert!(config.dev_mode);
    assert!(config.revalidate_on_promotion());
    config.validate().unwrap();
}

#[tokio::test]
async fn test_empty_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.yaml");
    tokio::fs::write(&path, "{}").await.unwrap();

    let config = LoaderConfig::from_file(&path).await.unwrap();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.remote, RemoteLoadOptions::default());
    assert_eq!(config.loading.normal_load_delay(), None);
    assert_eq!(config.loading.load_timeout(), None);
    assert!(!config.dev_mode);
}

#[tokio::test]
async fn test_invalid_files_are_reported() {
    let temp_dir = TempDir::new().unwrap();

    let missing = LoaderConfig::from_file(temp_dir.path().join("missing.yaml")).await.unwrap_err();
    assert!(matches!(missing, LoaderError::Io(_)));

    let bad_yaml = temp_dir.path().join("bad.yaml");
    tokio::fs::write(&bad_yaml, "remote:\n  retries: many").await.unwrap();
    let err = LoaderConfig::from_file(&bad_yaml).await.unwrap_err();
    assert!(matches!(err, LoaderError::Yaml(_)));

    let bad_json = temp_dir.path().join("bad.json");
    tokio::fs::write(&bad_json, "{ \"dev_mode\": ").await.unwrap();
    let err = LoaderConfig::from_file(&bad_json).await.unwrap_err();
    assert!(matches!(err, LoaderError::Json(_)));
}

#[test]
fn test_validation_collects_every_problem() {
    let mut config = LoaderConfig::default();
    config.logging.level = "verbose".to_string();
    config.logging.file_output = true;
    config.remote.timeout_ms = 0;

    let err = config.validate().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("verbose"));
    assert!(message.contains("log_dir"));
    assert!(message.contains("timeout_ms"));
    assert_eq!(err.error_code(), LoaderError::Configuration(String::new()).error_code());
}

#[test]
fn test_logger_config_follows_log_section() {
    let temp_dir = TempDir::new().unwrap();
    let config = LoaderConfig::builder()
        .log_level("debug")
        .file_logging(temp_dir.path())
        .json_logging()
        .build();
    config.validate().unwrap();

    let logger = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger.level, "debug");
    assert!(logger.json_format);
    assert_eq!(logger.file_output.as_deref(), Some(temp_dir.path()));
    assert_eq!(logger.rotation, RotationStrategy::Daily);
}

#[test]
fn test_builder_rejected_by_facade() {
    let config = LoaderConfig::builder().remote_cache_capacity(0).build();
    let err = ChipsLoader::builder(config).build().unwrap_err();
    assert!(matches!(err, LoaderError::Configuration(ref m) if m.contains("remote_cache_capacity")));
}

#[tokio::test(start_paused = true)]
async fn test_default_load_timeout_applies_to_on_demand_loads() {
    let config = LoaderConfig::builder().load_timeout_ms(100).build();
    let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new()));
    let manager = ModuleManager::new(Arc::new(ModuleRegistry::new()), host, &config);
    manager
        .add_module(
            ModuleDescriptor::builder("slow")
                .config(ModuleConfig::new().with_init(|_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }))
                .build(),
        )
        .await
        .unwrap();

    let err = manager.load_module_by_name("slow", None).await.unwrap_err();
    assert!(matches!(err, LoaderError::Timeout { timeout_ms: 100, .. }));

    // 显式超时优先于默认值
    manager
        .load_module_by_name("slow", Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(manager.is_module_loaded("slow"));
}
