//! 事件数据结构
//!
//! 事件由主题（`/` 分隔的层级字符串，如 `org/test/X`）和属性表组成，创建后不可变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::utils::{generate_uuid, CoreError, Result};

/// 事件属性表：发布者与过滤器之间的契约
pub type Properties = HashMap<String, Value>;

/// 事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    event_id: String,
    topic: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    properties: Properties,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// 创建新事件
    pub fn new(topic: impl Into<String>, properties: Properties) -> Self {
        Self {
            event_id: generate_uuid(),
            topic: topic.into(),
            properties,
            timestamp: Utc::now(),
        }
    }

    /// 使用 Builder 模式构建事件
    pub fn builder(topic: impl Into<String>) -> EventBuilder {
        EventBuilder::new(topic)
    }

    /// 事件 ID
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// 事件主题
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 事件属性
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// 读取单个属性
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// 创建时间
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// 事件构建器
#[derive(Debug)]
pub struct EventBuilder {
    topic: String,
    properties: Properties,
}

impl EventBuilder {
    /// 以主题创建构建器
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            properties: HashMap::new(),
        }
    }

    /// 添加属性
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// 合并一组属性
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    /// 构建事件
    pub fn build(self) -> Event {
        Event::new(self.topic, self.properties)
    }
}

/// 校验发布用的主题：非空，`/` 分隔的每一段都不能为空，不允许通配符
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.split('/').any(|token| token.is_empty() || token.contains('*')) {
        return Err(CoreError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// 校验订阅用的主题模式：`*`、具体主题，或以 `/*` 结尾的前缀
pub fn validate_topic_pattern(pattern: &str) -> Result<()> {
    if pattern == "*" {
        return Ok(());
    }
    let concrete = pattern.strip_suffix("/*").unwrap_or(pattern);
    validate_topic(concrete).map_err(|_| CoreError::InvalidTopic(pattern.to_string()))
}

/// 主题模式匹配（支持 `*` 与 `prefix/*`）
pub fn matches_topic(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return topic.len() > prefix.len() + 1
            && topic.starts_with(prefix)
            && topic.as_bytes()[prefix.len()] == b'/';
    }

    pattern == topic
}

/// 运行时自身发布的事件主题
pub mod system_events {
    /// 模块已安装
    pub const MODULE_INSTALLED: &str = "tendril/module/INSTALLED";
    /// 模块已启动
    pub const MODULE_STARTED: &str = "tendril/module/STARTED";
    /// 模块启动失败
    pub const MODULE_FAILED: &str = "tendril/module/FAILED";
    /// 模块已停止
    pub const MODULE_STOPPED: &str = "tendril/module/STOPPED";
    /// 模块已卸载
    pub const MODULE_UNINSTALLED: &str = "tendril/module/UNINSTALLED";
    /// 服务已注册
    pub const SERVICE_REGISTERED: &str = "tendril/service/REGISTERED";
    /// 服务正在注销
    pub const SERVICE_UNREGISTERING: &str = "tendril/service/UNREGISTERING";
    /// 运行时正在关闭
    pub const RUNTIME_SHUTDOWN: &str = "tendril/runtime/SHUTDOWN";
}

/// 运行时使用的标准属性键
pub mod property_keys {
    /// 模块 ID
    pub const MODULE_ID: &str = "module.id";
    /// 模块符号名
    pub const MODULE_SYMBOLIC_NAME: &str = "module.symbolic_name";
    /// 模块版本
    pub const MODULE_VERSION: &str = "module.version";
    /// 服务 ID
    pub const SERVICE_ID: &str = "service.id";
    /// 服务排序值，越大越优先
    pub const SERVICE_RANKING: &str = "service.ranking";
    /// 服务契约类型名
    pub const OBJECT_CLASS: &str = "objectClass";
}
