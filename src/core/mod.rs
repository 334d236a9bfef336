//! 核心模块
//!
//! 包含运行时配置与故障通道。

pub mod config;
pub mod fault;

pub use config::{EventBusConfig, LogConfig, RuntimeConfig, RuntimeConfigBuilder};
pub use fault::{FaultPhase, FaultRecord, FaultSink, MemoryFaultSink, TracingFaultSink};
