//! 模块管理
//!
//! 包含模块系统的核心组件：
//! - 模块元数据与状态
//! - 激活器接口
//! - 模块上下文
//! - 生命周期管理器

pub mod activator;
pub mod context;
pub mod lifecycle;
pub mod metadata;

// 重导出常用类型
pub use activator::{Activator, ActivatorHandle};
pub use context::ModuleContext;
pub use lifecycle::LifecycleManager;
pub use metadata::{
    LoaderRef, Module, ModuleDescriptor, ModuleDescriptorBuilder, ModuleId, ModuleIdentity,
    ModuleInfo, ModuleState, SYSTEM_MODULE_ID,
};
