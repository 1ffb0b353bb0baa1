//! Chips Loader 命令行入口
//!
//! 模块编排引擎的命令行工具，用于在不启动宿主的情况下检查模块清单与配置。
//!
//! # 命令概览
//!
//! - `plan` - 根据模块清单计算加载计划
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 查看加载计划
//! chips-loader plan -m modules.yaml --flags beta,dark-mode --permissions admin
//!
//! # 以 JSON 输出加载计划
//! chips-loader plan -m modules.yaml --format json
//!
//! # 检查配置文件
//! chips-loader check-config -c loader.yaml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use chips_loader::api::host::{HostBindings, MemoryRouteRegistrar, StaticCapabilities};
use chips_loader::{ChipsLoader, LoadPlan, LoaderConfig, Logger, LoggerConfig};

/// Chips Loader - 薯片模块编排引擎
#[derive(Parser)]
#[command(name = "chips-loader")]
#[command(version, about = "微前端宿主的模块编排引擎", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "loader.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// 开发模式（启用循环依赖诊断与提升复查）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 输出格式
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 计算加载计划
    ///
    /// 读取模块清单，按给定的特性开关与权限输出 INIT 加载顺序、NORMAL 依赖层级、
    /// 被跳过和被条件拦截的模块。不执行任何模块代码。
    Plan {
        /// 模块清单路径（YAML 或 JSON）
        #[arg(short, long)]
        modules: PathBuf,

        /// 已开启的特性开关
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,

        /// 已具备的权限
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,

        /// 输出格式
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看版本信息
    Version,
}

/// 计算并打印加载计划
async fn run_plan(
    config: LoaderConfig,
    modules: &Path,
    flags: Vec<String>,
    permissions: Vec<String>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let capabilities = Arc::new(StaticCapabilities::new().with_flags(flags).with_permissions(permissions));
    let host = HostBindings::new(Arc::new(MemoryRouteRegistrar::new())).with_capabilities(capabilities);
    let loader = ChipsLoader::builder(config).host(host).build()?;

    loader.add_manifest(modules).await?;
    let plan = loader.manager().plan()?;
    info!(init = plan.init.len(), levels = plan.levels.len(), "加载计划已计算");

    match format {
        OutputFormat::Text => print_plan(&plan),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&plan)?),
    }
    Ok(())
}

fn print_plan(plan: &LoadPlan) {
    println!();
    println!("加载计划");
    println!("═══════════════════════════════════════");
    println!("  [INIT 模块]（顺序加载）");
    if plan.init.is_empty() {
        println!("    （无）");
    }
    for (index, name) in plan.init.iter().enumerate() {
        println!("    {}. {}", index + 1, name);
    }
    println!();
    println!("  [NORMAL 模块]（同层并发）");
    if plan.levels.is_empty() {
        println!("    （无）");
    }
    for (index, level) in plan.levels.iter().enumerate() {
        println!("    层 {}: {}", index, level.join(", "));
    }
    if !plan.skipped.is_empty() {
        println!();
        println!("  [缺少依赖]");
        for skipped in &plan.skipped {
            println!("    {} -> 缺少 {}", skipped.module_name, skipped.missing_dependencies.join(", "));
        }
    }
    if !plan.blocked.is_empty() {
        println!();
        println!("  [条件不满足]");
        for blocked in &plan.blocked {
            println!("    {} -> {}: {}", blocked.module_name, blocked.reason, blocked.details.join(", "));
        }
    }
    println!("═══════════════════════════════════════");
    println!();
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&LoaderConfig::default());
        return Ok(());
    }

    let config = match LoaderConfig::from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            return Err(Box::new(e));
        }
    };
    if let Err(e) = config.validate() {
        println!("❌ 配置取值无效: {}", e);
        return Err(Box::new(e));
    }

    println!("✅ 配置文件有效！");
    println!();
    print_config(&config);
    Ok(())
}

fn print_config(config: &LoaderConfig) {
    let yes_no = |flag: bool| if flag { "是" } else { "否" };
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", yes_no(config.logging.file_output));
    println!("    JSON 格式:      {}", yes_no(config.logging.json_format));
    println!();
    println!("  [加载配置]");
    println!("    NORMAL 延迟:    {} ms", config.loading.normal_load_delay_ms);
    match config.loading.load_timeout_ms {
        Some(timeout) => println!("    按需加载超时:   {} ms", timeout),
        None => println!("    按需加载超时:   不限"),
    }
    println!("    提升时复查:     {}", yes_no(config.revalidate_on_promotion()));
    println!("    远程缓存容量:   {}", config.loading.remote_cache_capacity);
    println!();
    println!("  [远程模块]");
    println!("    尝试次数:       {}", config.remote.attempts());
    println!("    单次超时:       {} ms", config.remote.timeout_ms);
    println!("    重试间隔:       {} ms", config.remote.retry_delay_ms);
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", yes_no(config.dev_mode));
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Loader - 薯片模块编排引擎");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_loader::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(config_path: &Path, dev_mode: bool) -> Result<LoaderConfig, Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        let config = LoaderConfig::from_file(config_path).await?;
        info!("已加载配置文件: {}", config_path.display());
        config
    } else {
        info!("配置文件不存在 ({})，使用默认配置", config_path.display());
        LoaderConfig::default()
    };
    if dev_mode {
        config.dev_mode = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _log_guard = matches!(cli.command, Commands::Plan { .. })
        .then(|| Logger::try_init(LoggerConfig::builder().level(cli.log_level.as_str()).build()));

    match cli.command {
        Commands::Plan {
            modules,
            flags,
            permissions,
            format,
        } => {
            let config = load_config(&cli.config, cli.dev).await?;
            run_plan(config, &modules, flags, permissions, format).await?;
        }

        Commands::CheckConfig { config } => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        Commands::Version => print_version(),
    }

    Ok(())
}
