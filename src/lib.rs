//! # tendril-core - 模块化运行时
//!
//! tendril 是一个进程内的模块运行时，提供以下核心功能：
//!
//! - **生命周期管理**: 模块的安装、启动、停止与卸载，激活器失败时隔离故障
//! - **服务注册表**: 按契约类型发布与查找服务，支持排序值与属性过滤
//! - **服务追踪**: 不论提供者与使用者的启动顺序，都能收到服务可用/不可用通知
//! - **事件总线**: 按主题发布/订阅，支持 LDAP 风格过滤与订阅权限检查
//! - **配置与日志**: YAML/JSON 配置加载，基于 `tracing` 的结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use tendril_core::{Activator, ModuleContext, ModuleDescriptor, Runtime, RuntimeConfig};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Activator for Hello {
//!     async fn start(&self, context: &ModuleContext) -> anyhow::Result<()> {
//!         context.subscribe(&["org/example/*"], Some("(level>=2)"), |event| {
//!             println!("收到事件 {}", event.topic());
//!             Ok(())
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::new(RuntimeConfig::default())?;
//!
//!     let descriptor = ModuleDescriptor::builder("org.example.hello")
//!         .version("1.0.0")
//!         .activator(Arc::new(Hello))
//!         .build()?;
//!     let id = runtime.install(descriptor)?;
//!     runtime.start(id).await?;
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块元数据、激活器、上下文与生命周期管理
//! - `service` - 服务注册表与追踪器
//! - `event` - 事件、过滤表达式与事件总线
//! - `core` - 运行时配置与故障通道
//! - `utils` - 错误类型、ID 生成与日志
//! - `api` - 运行时门面

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod event;
pub mod module;
pub mod service;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{Runtime, RuntimeBuilder, RuntimeState, ShutdownReport};

pub use module::{
    Activator, LifecycleManager, Module, ModuleContext, ModuleDescriptor, ModuleId,
    ModuleIdentity, ModuleInfo, ModuleState, SYSTEM_MODULE_ID,
};

pub use service::{
    ContractType, ServiceId, ServiceInfo, ServiceReference, ServiceRegistration,
    ServiceRegistry, ServiceTracker,
};

pub use event::{
    AllowAll, DenyTopics, DispatchReport, DispatchStats, Event, EventBuilder, EventBus, Filter,
    Properties, TopicPermission,
};

pub use utils::{error_code, generate_id, generate_uuid, CoreError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use crate::core::config::{EventBusConfig, LogConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use crate::core::fault::{FaultPhase, FaultRecord, FaultSink, MemoryFaultSink, TracingFaultSink};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
