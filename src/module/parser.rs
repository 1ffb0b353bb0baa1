//! 模块清单解析器
//!
//! 负责从 YAML 或 JSON 清单解析模块描述。清单只包含调度信息（名称、加载类型、优先级、
//! 加载条件、远程位置），模块配置由宿主代码或远程容器提供。

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::module::metadata::{LoadCondition, LoadType, ModuleDescriptor, RemoteSpec};
use crate::utils::{LoaderError, Result};

/// 清单中的一个模块条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// 模块名称
    pub name: String,
    /// 加载类型
    #[serde(default, alias = "load_type")]
    pub load_type: LoadType,
    /// 加载优先级
    #[serde(default, alias = "load_priority")]
    pub load_priority: i32,
    /// 加载条件
    #[serde(default, alias = "load_condition", skip_serializing_if = "Option::is_none")]
    pub load_condition: Option<LoadCondition>,
    /// 远程位置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSpec>,
}

impl ManifestEntry {
    /// 转换为模块描述
    ///
    /// 有远程位置时配置从远程容器拉取，否则是空的已解析配置。
    pub fn into_descriptor(self) -> ModuleDescriptor {
        let mut builder = ModuleDescriptor::builder(self.name)
            .load_type(self.load_type)
            .priority(self.load_priority);
        if let Some(condition) = self.load_condition {
            builder = builder.condition(condition);
        }
        if let Some(remote) = self.remote {
            builder = builder.remote(remote);
        }
        builder.build()
    }
}

/// 模块清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub modules: Vec<ManifestEntry>,
}

/// 清单顶层既可以是列表，也可以是带 `modules` 键的映射
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    List(Vec<ManifestEntry>),
    Wrapped(ModuleManifest),
}

impl From<ManifestDocument> for ModuleManifest {
    fn from(doc: ManifestDocument) -> Self {
        match doc {
            ManifestDocument::List(modules) => ModuleManifest { modules },
            ManifestDocument::Wrapped(manifest) => manifest,
        }
    }
}

/// 清单格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    /// 根据扩展名判断格式，`.json` 之外一律按 YAML 处理
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ManifestFormat::Json,
            _ => ManifestFormat::Yaml,
        }
    }
}

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self
    }

    /// 从文件解析并校验清单
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 内容格式错误时返回 `Yaml` / `Json` 错误
    /// - 校验失败时返回 `InvalidManifest` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleManifest> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_str(&content, ManifestFormat::from_path(path))
    }

    /// 从字符串解析并校验清单
    pub fn parse_str(content: &str, format: ManifestFormat) -> Result<ModuleManifest> {
        let document: ManifestDocument = match format {
            ManifestFormat::Yaml => serde_yaml::from_str(content)?,
            ManifestFormat::Json => serde_json::from_str(content)?,
        };
        let manifest = ModuleManifest::from(document);
        Self::validate(&manifest)?;
        Ok(manifest)
    }

    /// 从文件解析并转换为模块描述
    pub async fn load_descriptors(path: &Path) -> Result<Vec<ModuleDescriptor>> {
        let manifest = Self::parse_file(path).await?;
        Ok(manifest.modules.into_iter().map(ManifestEntry::into_descriptor).collect())
    }

    /// 校验清单
    ///
    /// 执行以下校验，收集全部错误后一次返回：
    /// - 名称非空且只包含字母、数字、下划线和连字符
    /// - 名称在清单内唯一
    /// - INIT 模块不能声明加载条件
    /// - 远程模块需要 http(s) 入口地址和非空命名空间
    pub fn validate(manifest: &ModuleManifest) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let mut seen = HashSet::new();

        for (index, entry) in manifest.modules.iter().enumerate() {
            if entry.name.is_empty() {
                errors.push(format!("第 {} 个模块的名称不能为空", index + 1));
                continue;
            }
            if !Self::is_valid_module_name(&entry.name) {
                errors.push(format!(
                    "模块名称 '{}' 格式无效，只允许字母、数字、下划线和连字符",
                    entry.name
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                errors.push(format!("模块名称重复: '{}'", entry.name));
            }

            if entry.load_type == LoadType::Init && entry.load_condition.is_some() {
                errors.push(format!("INIT 模块 '{}' 不能声明加载条件", entry.name));
            }

            if let Some(ref remote) = entry.remote {
                if !(remote.entry.starts_with("http://") || remote.entry.starts_with("https://")) {
                    errors.push(format!(
                        "模块 '{}' 的远程入口必须是 http(s) 地址: '{}'",
                        entry.name, remote.entry
                    ));
                }
                if remote.scope.trim().is_empty() {
                    errors.push(format!("模块 '{}' 的远程命名空间不能为空", entry.name));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoaderError::InvalidManifest(errors.join("; ")))
        }
    }

    fn is_valid_module_name(name: &str) -> bool {
        name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}
