//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构、按依赖顺序加载的解析器以及分层构建。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，用于循环检测和拓扑排序
//! - [`DependencyResolver`] - 依赖解析器，在加载模块前按优先级顺序加载它的依赖
//! - [`build_dependency_levels`] - 把模块集合划分为可以层内并行加载的层级
//!
//! # 示例
//!
//! ```rust
//! use chips_loader::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("todo");
//! graph.add_module("core");
//! graph.add_dependency("todo", "core");
//!
//! assert_eq!(graph.get_dependencies("todo"), vec!["core".to_string()]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::module::metadata::ModuleDescriptor;
use crate::module::registry::ModuleRegistry;
use crate::module::status::StatusTracker;
use crate::utils::{LoaderError, Result};

/// 模块依赖关系图
///
/// 节点按名称有序保存，循环检测与拓扑排序的结果是确定的。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 -> 该模块依赖的模块列表
    edges: BTreeMap<String, Vec<String>>,
    /// 反向边：模块 -> 依赖该模块的模块列表
    reverse_edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 由模块描述构建依赖图
    pub fn from_descriptors(modules: &[Arc<ModuleDescriptor>]) -> Self {
        let mut graph = Self::new();
        for module in modules {
            graph.add_module(&module.name);
            for dep in module.dependencies() {
                graph.add_dependency(&module.name, dep);
            }
        }
        graph
    }

    /// 添加模块节点，已存在时不重复添加
    pub fn add_module(&mut self, module: &str) {
        self.edges.entry(module.to_string()).or_default();
        self.reverse_edges.entry(module.to_string()).or_default();
    }

    /// 添加依赖关系：`module` 依赖 `dependency`
    ///
    /// # 示例
    ///
    /// ```rust
    /// use chips_loader::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("report", "core");
    ///
    /// assert!(graph.get_dependencies("report").contains(&"core".to_string()));
    /// assert!(graph.get_dependents("core").contains(&"report".to_string()));
    /// ```
    pub fn add_dependency(&mut self, module: &str, dependency: &str) {
        self.add_module(module);
        self.add_module(dependency);

        let deps = self.edges.entry(module.to_string()).or_default();
        if !deps.iter().any(|d| d == dependency) {
            deps.push(dependency.to_string());
        }

        let dependents = self.reverse_edges.entry(dependency.to_string()).or_default();
        if !dependents.iter().any(|d| d == module) {
            dependents.push(module.to_string());
        }
    }

    /// 模块的直接依赖
    pub fn get_dependencies(&self, module: &str) -> Vec<String> {
        self.edges.get(module).cloned().unwrap_or_default()
    }

    /// 直接依赖该模块的模块
    pub fn get_dependents(&self, module: &str) -> Vec<String> {
        self.reverse_edges.get(module).cloned().unwrap_or_default()
    }

    /// 是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找循环依赖路径
    ///
    /// 返回的路径首尾相同，例如 `["a", "b", "a"]`。
    ///
    /// ```rust
    /// use chips_loader::module::dependency::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_dependency("a", "b");
    /// graph.add_dependency("b", "a");
    ///
    /// assert_eq!(graph.find_cycle().unwrap(), vec!["a", "b", "a"]);
    /// ```
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_from(node, &mut visited, &mut on_path, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        on_path: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if on_path.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node.to_string()) {
            return None;
        }

        on_path.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_from(neighbor, visited, on_path, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }

    /// 拓扑排序（Kahn 算法），依赖在前
    ///
    /// # 错误
    ///
    /// 存在循环依赖时返回 `LoaderError::CircularDependency`。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(path) = self.find_cycle() {
            return Err(LoaderError::CircularDependency { path });
        }

        // 入度 = 依赖了多少个模块
        let mut in_degree: BTreeMap<&str, usize> =
            self.edges.iter().map(|(node, deps)| (node.as_str(), deps.len())).collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for dependent in self.reverse_edges.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        Ok(order)
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.edges.contains_key(module)
    }

    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ============================================================================
// 分层
// ============================================================================

/// 因依赖缺失而跳过的模块
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedModule {
    pub module_name: String,
    pub missing_dependencies: Vec<String>,
}

/// 分层结果
#[derive(Debug, Clone, Default)]
pub struct DependencyLevels {
    /// 第 k 层模块的依赖都已就绪或位于更早的层
    pub levels: Vec<Vec<Arc<ModuleDescriptor>>>,
    /// 依赖缺失的模块
    pub skipped: Vec<SkippedModule>,
}

impl DependencyLevels {
    /// 各层的模块名
    pub fn level_names(&self) -> Vec<Vec<String>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|m| m.name.clone()).collect())
            .collect()
    }

    /// 分层中的模块总数（不含跳过的模块）
    pub fn module_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.skipped.is_empty()
    }
}

/// 把模块集合划分为依赖层级
///
/// 依赖就绪的条件：`is_ready`（已加载或已预加载）、已放入更早的层，或者不在输入集合中但已注册。
/// 某一轮没有模块可以放入时：
/// - 依赖从未注册（或依赖已被跳过）的模块移入 `skipped`，然后继续；
/// - 没有这样的模块时，剩余模块之间必然存在循环，返回 `CircularDependency`。
///
/// 每层内按优先级稳定排序。
pub fn build_dependency_levels(
    modules: &[Arc<ModuleDescriptor>],
    is_registered: impl Fn(&str) -> bool,
    is_ready: impl Fn(&str) -> bool,
) -> Result<DependencyLevels> {
    let input: HashSet<&str> = modules.iter().map(|m| m.name.as_str()).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut skipped_names: HashSet<String> = HashSet::new();
    let mut result = DependencyLevels::default();
    let mut remaining: Vec<Arc<ModuleDescriptor>> = modules.to_vec();

    while !remaining.is_empty() {
        let dep_ready = |dep: &str| {
            is_ready(dep) || placed.contains(dep) || (!input.contains(dep) && is_registered(dep))
        };
        let (mut ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|m| m.dependencies().iter().all(|d| dep_ready(d)));
        remaining = blocked;

        if !ready.is_empty() {
            ModuleRegistry::sort_by_priority(&mut ready);
            debug!(
                level = result.levels.len(),
                modules = ?ready.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
                "依赖层已构建"
            );
            placed.extend(ready.iter().map(|m| m.name.clone()));
            result.levels.push(ready);
            continue;
        }

        let mut newly_skipped = Vec::new();
        remaining.retain(|m| {
            let missing: Vec<String> = m
                .dependencies()
                .iter()
                .filter(|d| {
                    !is_ready(d.as_str())
                        && (skipped_names.contains(d.as_str()) || (!input.contains(d.as_str()) && !is_registered(d.as_str())))
                })
                .cloned()
                .collect();
            if missing.is_empty() {
                return true;
            }
            newly_skipped.push(SkippedModule {
                module_name: m.name.clone(),
                missing_dependencies: missing,
            });
            false
        });

        if newly_skipped.is_empty() {
            let path: Vec<String> = remaining.iter().map(|m| m.name.clone()).collect();
            warn!(modules = ?path, "剩余模块之间存在循环依赖");
            return Err(LoaderError::CircularDependency { path });
        }

        for skipped in newly_skipped {
            warn!(
                module = %skipped.module_name,
                missing = ?skipped.missing_dependencies,
                "依赖缺失，跳过模块"
            );
            skipped_names.insert(skipped.module_name.clone());
            result.skipped.push(skipped);
        }
    }

    Ok(result)
}

// ============================================================================
// 依赖解析器
// ============================================================================

/// 加载单个依赖的回调
pub type LoadOneFn = dyn Fn(Arc<ModuleDescriptor>) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// 判断模块是否已加载的回调
pub type IsLoadedFn = dyn Fn(&str) -> bool + Send + Sync;

/// 依赖解析器
///
/// 深度优先：依赖的依赖先加载；同一层的依赖按优先级顺序逐个加载（不并行）。
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    registry: Arc<ModuleRegistry>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    /// 在加载 `module` 前加载它的全部依赖
    ///
    /// # 错误
    ///
    /// - `CircularDependency`：访问路径中再次出现同一模块，错误包含完整环路
    /// - `MissingDependency`：依赖从未注册
    /// - `load_one` 返回的任何错误
    pub async fn load_dependencies(
        &self,
        module: &ModuleDescriptor,
        load_one: &LoadOneFn,
        is_loaded: &IsLoadedFn,
    ) -> Result<()> {
        if module.dependencies().is_empty() {
            return Ok(());
        }
        let mut path = vec![module.name.clone()];
        self.visit(module, &mut path, load_one, is_loaded).await
    }

    fn visit<'a>(
        &'a self,
        module: &'a ModuleDescriptor,
        path: &'a mut Vec<String>,
        load_one: &'a LoadOneFn,
        is_loaded: &'a IsLoadedFn,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut deps = Vec::new();
            let mut missing = Vec::new();
            for name in module.dependencies().iter().filter(|d| !is_loaded(d.as_str())) {
                match self.registry.get(name) {
                    Some(dep) => deps.push(dep),
                    None => missing.push(name.clone()),
                }
            }
            if !missing.is_empty() {
                return Err(LoaderError::MissingDependency {
                    module_name: module.name.clone(),
                    missing,
                });
            }

            ModuleRegistry::sort_by_priority(&mut deps);

            for dep in deps {
                if let Some(start) = path.iter().position(|n| *n == dep.name) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.name.clone());
                    return Err(LoaderError::CircularDependency { path: cycle });
                }
                // 前面的依赖可能已经顺带加载了它
                if is_loaded(&dep.name) {
                    continue;
                }

                path.push(dep.name.clone());
                self.visit(&dep, &mut *path, load_one, is_loaded).await?;
                path.pop();

                debug!(module = %module.name, dependency = %dep.name, "加载依赖");
                load_one(Arc::clone(&dep)).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// 对模块集合分层，就绪判断使用状态跟踪器
    pub fn build_levels(&self, modules: &[Arc<ModuleDescriptor>], status: &StatusTracker) -> Result<DependencyLevels> {
        build_dependency_levels(
            modules,
            |name| self.registry.contains(name),
            |name| status.is_preloaded_or_loaded(name),
        )
    }
}
