//! 可组合的校验环节
//!
//! 开发模式下额外执行的检查：分层前给出精确的循环依赖路径，
//! 以及从预加载提升为已加载时重新校验特性开关与权限。

use std::sync::Arc;

use tracing::debug;

use crate::core::config::LoaderConfig;
use crate::module::condition::ConditionValidator;
use crate::module::dependency::DependencyGraph;
use crate::module::metadata::ModuleDescriptor;
use crate::utils::{LoaderError, Result};

/// 校验环节
pub trait ValidationPass: Send + Sync {
    /// 环节名称
    fn name(&self) -> &str;

    /// 加载计划（NORMAL 模块集合）分层前的检查
    fn check_plan(&self, _modules: &[Arc<ModuleDescriptor>]) -> Result<()> {
        Ok(())
    }

    /// 预加载模块提升为已加载前的检查
    fn check_promotion(&self, _module: &ModuleDescriptor, _validator: &ConditionValidator) -> Result<()> {
        Ok(())
    }
}

/// 循环依赖诊断
///
/// 分层只能给出剩余模块集合，这里给出一条闭合的环路，例如 `[a, b, a]`。
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleDiagnosticsPass;

impl ValidationPass for CycleDiagnosticsPass {
    fn name(&self) -> &str {
        "cycle-diagnostics"
    }

    fn check_plan(&self, modules: &[Arc<ModuleDescriptor>]) -> Result<()> {
        let graph = DependencyGraph::from_descriptors(modules);
        match graph.find_cycle() {
            Some(path) => Err(LoaderError::CircularDependency { path }),
            None => Ok(()),
        }
    }
}

/// 提升时重新校验特性开关与访问权限
#[derive(Debug, Default, Clone, Copy)]
pub struct PromotionRecheckPass;

impl ValidationPass for PromotionRecheckPass {
    fn name(&self) -> &str {
        "promotion-recheck"
    }

    fn check_promotion(&self, module: &ModuleDescriptor, validator: &ConditionValidator) -> Result<()> {
        validator.check_capabilities(module).into_result(&module.name)
    }
}

/// 按顺序执行的校验环节集合
#[derive(Clone, Default)]
pub struct ValidationPipeline {
    passes: Vec<Arc<dyn ValidationPass>>,
}

impl ValidationPipeline {
    /// 创建空集合（生产模式）
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加环节
    pub fn with_pass(mut self, pass: Arc<dyn ValidationPass>) -> Self {
        self.passes.push(pass);
        self
    }

    /// 按配置组装
    ///
    /// `dev_mode` 启用全部环节；`revalidate_on_promotion` 单独启用提升校验。
    pub fn from_config(config: &LoaderConfig) -> Self {
        let mut pipeline = Self::new();
        if config.dev_mode {
            pipeline = pipeline.with_pass(Arc::new(CycleDiagnosticsPass));
        }
        if config.revalidate_on_promotion() {
            pipeline = pipeline.with_pass(Arc::new(PromotionRecheckPass));
        }
        pipeline
    }

    pub fn check_plan(&self, modules: &[Arc<ModuleDescriptor>]) -> Result<()> {
        for pass in &self.passes {
            debug!(pass = pass.name(), modules = modules.len(), "执行计划校验");
            pass.check_plan(modules)?;
        }
        Ok(())
    }

    pub fn check_promotion(&self, module: &ModuleDescriptor, validator: &ConditionValidator) -> Result<()> {
        for pass in &self.passes {
            pass.check_promotion(module, validator)?;
        }
        Ok(())
    }

    /// 已启用的环节名称
    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl std::fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("passes", &self.names())
            .finish()
    }
}
