//! 主题订阅权限
//!
//! 分发前对每个订阅者调用 [`TopicPermission::can_subscribe`]，
//! 返回 `false` 的订阅者不会收到该事件，也不会产生故障记录。

use std::collections::HashSet;

use crate::module::{ModuleId, ModuleIdentity};

/// 主题权限检查
pub trait TopicPermission: Send + Sync {
    /// 订阅者是否可以接收该主题的事件
    fn can_subscribe(&self, subscriber: &ModuleIdentity, topic: &str) -> bool;
}

/// 默认实现：全部放行
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl TopicPermission for AllowAll {
    fn can_subscribe(&self, _subscriber: &ModuleIdentity, _topic: &str) -> bool {
        true
    }
}

/// 基于主题前缀的拒绝列表
///
/// 前缀按 `/` 分段匹配：`org/secret` 拒绝 `org/secret` 与 `org/secret/X`，
/// 但不拒绝 `org/secretive`。可以为部分模块豁免。
#[derive(Debug, Default, Clone)]
pub struct DenyTopics {
    prefixes: Vec<String>,
    exempt: HashSet<ModuleId>,
}

impl DenyTopics {
    /// 拒绝给定主题前缀及其子主题
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.into().trim_end_matches('/').to_string())
                .collect(),
            exempt: HashSet::new(),
        }
    }

    /// 豁免指定模块
    pub fn exempt(mut self, module_id: ModuleId) -> Self {
        self.exempt.insert(module_id);
        self
    }

    fn is_denied(&self, topic: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            topic == prefix
                || (topic.starts_with(prefix.as_str())
                    && topic.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }
}

impl TopicPermission for DenyTopics {
    fn can_subscribe(&self, subscriber: &ModuleIdentity, topic: &str) -> bool {
        self.exempt.contains(&subscriber.id) || !self.is_denied(topic)
    }
}
