//! 事件系统
//!
//! 基于主题的异步事件总线、LDAP 风格过滤表达式与订阅权限检查。

pub mod event;
pub mod event_bus;
pub mod filter;
pub mod permission;

pub use event::{
    matches_topic, property_keys, system_events, validate_topic, validate_topic_pattern, Event,
    EventBuilder, Properties,
};
pub use event_bus::{DispatchReport, DispatchStats, EventBus, EventHandler};
pub use filter::Filter;
pub use permission::{AllowAll, DenyTopics, TopicPermission};
