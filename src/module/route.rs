//! 路由描述
//!
//! 模块贡献给宿主路由器的路由树。路由名称是分层的（`todo.detail` 属于模块 `todo`），
//! 每个路由可以携带一个进入钩子。

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::utils::Result;

/// 路由进入钩子，参数为路由名称
pub type RouteEnterHook = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 按路由名称自动加载模块的钩子
pub type AutoLoadHook = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 路由描述
#[derive(Clone)]
pub struct RouteDescriptor {
    /// 路由名称（全局唯一，点号分层）
    pub name: String,
    /// 路由路径
    pub path: String,
    /// 菜单标题
    pub title: Option<String>,
    /// 附加元数据
    pub meta: Value,
    /// 子路由
    pub children: Vec<RouteDescriptor>,
    /// 进入钩子
    pub on_enter: Option<RouteEnterHook>,
}

impl RouteDescriptor {
    /// 创建路由
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            title: None,
            meta: Value::Null,
            children: Vec::new(),
            on_enter: None,
        }
    }

    /// 设置菜单标题
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// 设置元数据
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// 添加子路由
    pub fn with_child(mut self, child: RouteDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// 设置进入钩子
    pub fn with_on_enter<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_enter = Some(Arc::new(move |name| hook(name).boxed()));
        self
    }

    /// 进入路由：执行进入钩子（如果有）
    pub async fn enter(&self) -> anyhow::Result<()> {
        match self.on_enter {
            Some(ref hook) => hook(self.name.clone()).await,
            None => Ok(()),
        }
    }

    /// 在路由树中按名称查找（包括自身）
    pub fn find(&self, name: &str) -> Option<&RouteDescriptor> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// 路由树中的全部路由名称（先序）
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        for child in &self.children {
            names.extend(child.names());
        }
        names
    }
}

impl std::fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("title", &self.title)
            .field("children", &self.children)
            .field("on_enter", &self.on_enter.is_some())
            .finish()
    }
}

/// 在一组路由树中按名称查找
pub fn find_route<'a>(routes: &'a [RouteDescriptor], name: &str) -> Option<&'a RouteDescriptor> {
    routes.iter().find_map(|route| route.find(name))
}

/// 包装路由树：进入任一路由前先等待 `hook(路由名称)`，再执行原有的进入钩子
pub(crate) fn wrap_with_auto_load(routes: &[RouteDescriptor], hook: &AutoLoadHook) -> Vec<RouteDescriptor> {
    routes
        .iter()
        .map(|route| {
            let previous = route.on_enter.clone();
            let auto_load = Arc::clone(hook);
            let on_enter: RouteEnterHook = Arc::new(move |name: String| {
                let previous = previous.clone();
                let auto_load = Arc::clone(&auto_load);
                async move {
                    auto_load(name.clone()).await?;
                    if let Some(previous) = previous {
                        previous(name).await?;
                    }
                    Ok(())
                }
                .boxed()
            });

            RouteDescriptor {
                name: route.name.clone(),
                path: route.path.clone(),
                title: route.title.clone(),
                meta: route.meta.clone(),
                children: wrap_with_auto_load(&route.children, hook),
                on_enter: Some(on_enter),
            }
        })
        .collect()
}
