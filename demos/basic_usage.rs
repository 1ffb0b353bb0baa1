//! 基本使用示例
//!
//! 本示例展示了模块编排引擎的基本使用方法，包括：
//!
//! - 装配宿主协作方并创建加载器
//! - 首屏渲染前加载 INIT 模块
//! - 预加载路由，进入路由时自动加载模块
//! - 首屏渲染后按依赖层级加载 NORMAL 模块
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use chips_loader::api::host::{HostBindings, MemoryRouteRegistrar, StaticCapabilities};
use chips_loader::{
    ChipsLoader, LoadCondition, LoaderConfig, MockHandler, ModuleConfig, ModuleDescriptor,
    RouteDescriptor,
};
use serde_json::json;

fn todo_module() -> ModuleDescriptor {
    ModuleDescriptor::builder("todo")
        .priority(1)
        .depends_on(["core"])
        .deferred_config(|| async {
            Ok(ModuleConfig::new()
                .with_routes(|| {
                    vec![RouteDescriptor::new("todo", "/todo")
                        .with_title("待办")
                        .with_child(RouteDescriptor::new("todo.detail", "/todo/:id").with_title("详情"))]
                })
                .with_mock_handler(MockHandler::new("GET", "/api/todos", json!([{ "id": 1, "title": "买薯片" }])))
                .with_sync_init(|ctx| {
                    println!("  [todo] 初始化钩子执行: {}", ctx.module_name);
                    Ok(())
                }))
        })
        .build()
}

/// 主函数
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== 模块编排引擎基本使用示例 ===\n");

    // 1. 装配宿主
    let routes = Arc::new(MemoryRouteRegistrar::new());
    let capabilities = Arc::new(StaticCapabilities::new().with_flags(["dark-mode"]));
    let host = HostBindings::new(routes.clone()).with_capabilities(capabilities);

    let config = LoaderConfig::builder().log_level("info").build();
    let loader = ChipsLoader::builder(config).host(host).with_logging().build()?;
    println!("✅ 加载器已创建\n");

    // 2. 注册模块
    loader
        .add_modules(vec![
            ModuleDescriptor::builder("core")
                .init()
                .config(ModuleConfig::new().with_sync_init(|_| {
                    println!("  [core] 初始化钩子执行");
                    Ok(())
                }))
                .build(),
            todo_module(),
            ModuleDescriptor::builder("report").depends_on(["todo"]).build(),
            ModuleDescriptor::builder("admin")
                .condition(LoadCondition::new().with_permissions(["admin"]))
                .build(),
        ])
        .await?;
    println!("✅ 已注册 {} 个模块\n", loader.summary().total);

    // 3. 首屏渲染前
    println!("--- 加载 INIT 模块 ---");
    let report = loader.start().await?;
    println!("已加载: {:?}\n", report.loaded);

    // 4. 预加载路由
    println!("--- 预加载路由 ---");
    let preload = loader.preload_routes().await;
    println!("已预加载: {:?}", preload.preloaded);
    println!("已跳过: {:?}\n", preload.skipped);

    // 5. 用户进入路由，所属模块被自动加载
    println!("--- 进入路由 todo.detail ---");
    if let Some(route) = routes.find("todo.detail") {
        route.enter().await?;
    }
    println!("todo 状态: {}\n", loader.manager().get_module_status("todo"));

    // 6. 首屏渲染后
    println!("--- 加载 NORMAL 模块 ---");
    let report = loader.run_normal_modules().await?;
    println!("依赖层级: {:?}", report.levels);
    println!("已加载: {:?}", report.loaded);
    for (name, error) in &report.failed {
        println!("失败: {} - {}", name, error);
    }
    println!();

    // 7. 宿主资源
    println!("--- 菜单与请求模拟 ---");
    for node in loader.manager().build_menu() {
        println!("  {} ({}) 子菜单 {} 个", node.title, node.path, node.children.len());
    }
    for handler in loader.manager().collect_mock_handlers() {
        println!("  {} {}", handler.method, handler.path);
    }
    println!();

    println!("{:#?}", loader.summary());
    println!("\n=== 示例完成 ===");
    Ok(())
}
