//! API 模块
//!
//! 对外部引导程序提供的运行时门面。
//!
//! # 模块概览
//!
//! - `runtime`: [`Runtime`] 主接口，组合生命周期、服务注册表与事件总线

pub mod runtime;

// 重导出主要类型
pub use runtime::{Runtime, RuntimeBuilder, RuntimeState, ShutdownReport};
