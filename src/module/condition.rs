//! 加载条件校验
//!
//! 按固定顺序检查特性开关、访问权限和依赖模块，第一个失败的类别即为结果。
//! 提供者缺失或返回错误一律视为检查失败。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::host::{FeatureFlagProvider, HostBindings, PermissionProvider};
use crate::module::metadata::ModuleDescriptor;
use crate::utils::{LoaderError, Result};

/// 条件失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionFailure {
    FeatureFlags,
    Permissions,
    Dependencies,
}

impl fmt::Display for ConditionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionFailure::FeatureFlags => write!(f, "特性开关"),
            ConditionFailure::Permissions => write!(f, "访问权限"),
            ConditionFailure::Dependencies => write!(f, "依赖模块"),
        }
    }
}

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// 是否允许加载
    pub can_load: bool,
    /// 失败类别
    pub reason: Option<ConditionFailure>,
    /// 失败详情（缺失的开关、权限或依赖）
    pub details: Vec<String>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            can_load: true,
            reason: None,
            details: Vec::new(),
        }
    }

    pub fn failed(reason: ConditionFailure, details: Vec<String>) -> Self {
        Self {
            can_load: false,
            reason: Some(reason),
            details,
        }
    }

    /// 转换为 `ConditionsNotMet` 错误
    pub fn into_result(self, module_name: &str) -> Result<()> {
        match self.reason {
            Some(reason) if !self.can_load => Err(LoaderError::ConditionsNotMet {
                module_name: module_name.to_string(),
                reason,
                details: self.details,
            }),
            _ => Ok(()),
        }
    }
}

/// 加载条件校验器
#[derive(Clone, Default)]
pub struct ConditionValidator {
    feature_flags: Option<Arc<dyn FeatureFlagProvider>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
}

impl ConditionValidator {
    pub fn new(
        feature_flags: Option<Arc<dyn FeatureFlagProvider>>,
        permissions: Option<Arc<dyn PermissionProvider>>,
    ) -> Self {
        Self {
            feature_flags,
            permissions,
        }
    }

    /// 使用宿主装配中的提供者
    pub fn from_host(host: &HostBindings) -> Self {
        Self::new(host.feature_flags.clone(), host.permissions.clone())
    }

    /// 完整校验：特性开关、访问权限、依赖模块
    pub fn validate(&self, module: &ModuleDescriptor, is_loaded: impl Fn(&str) -> bool) -> ValidationResult {
        let Some(condition) = module.load_condition.as_ref() else {
            return ValidationResult::passed();
        };

        let capabilities = self.check_capabilities(module);
        if !capabilities.can_load {
            return capabilities;
        }

        let missing: Vec<String> = condition
            .dependencies
            .iter()
            .filter(|name| !is_loaded(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return ValidationResult::failed(ConditionFailure::Dependencies, missing);
        }

        ValidationResult::passed()
    }

    /// 只检查特性开关与访问权限
    pub fn check_capabilities(&self, module: &ModuleDescriptor) -> ValidationResult {
        let Some(condition) = module.load_condition.as_ref() else {
            return ValidationResult::passed();
        };

        if !condition.feature_flags.is_empty() {
            let granted = match self.feature_flags {
                Some(ref provider) => provider.has_feature_flags(&condition.feature_flags),
                None => Err(anyhow::anyhow!("未提供特性开关提供者")),
            };
            if !self.granted(&module.name, ConditionFailure::FeatureFlags, granted) {
                return ValidationResult::failed(ConditionFailure::FeatureFlags, condition.feature_flags.clone());
            }
        }

        if !condition.access_permissions.is_empty() {
            let granted = match self.permissions {
                Some(ref provider) => provider.has_permissions(&condition.access_permissions),
                None => Err(anyhow::anyhow!("未提供权限提供者")),
            };
            if !self.granted(&module.name, ConditionFailure::Permissions, granted) {
                return ValidationResult::failed(
                    ConditionFailure::Permissions,
                    condition.access_permissions.clone(),
                );
            }
        }

        ValidationResult::passed()
    }

    /// 预加载阶段是否应跳过该模块（不检查依赖）
    pub fn should_skip_during_preload(&self, module: &ModuleDescriptor) -> bool {
        !self.check_capabilities(module).can_load
    }

    fn granted(&self, module_name: &str, category: ConditionFailure, result: anyhow::Result<bool>) -> bool {
        match result {
            Ok(granted) => granted,
            Err(e) => {
                warn!(module = %module_name, category = %category, error = %e, "条件提供者不可用，按未满足处理");
                false
            }
        }
    }
}

impl fmt::Debug for ConditionValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionValidator")
            .field("feature_flags", &self.feature_flags.is_some())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}
