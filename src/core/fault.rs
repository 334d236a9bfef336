//! 故障通道
//!
//! 激活器启动/停止失败、事件处理器失败、服务追踪回调失败都会被捕获并隔离，
//! 然后以 [`FaultRecord`] 的形式交给宿主提供的 [`FaultSink`]。

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::module::ModuleId;

/// 故障发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPhase {
    /// 激活器 start
    Start,
    /// 激活器 stop
    Stop,
    /// 事件处理器
    Dispatch,
    /// 服务追踪回调
    ServiceCallback,
}

impl fmt::Display for FaultPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultPhase::Start => "start",
            FaultPhase::Stop => "stop",
            FaultPhase::Dispatch => "dispatch",
            FaultPhase::ServiceCallback => "service_callback",
        };
        f.write_str(name)
    }
}

/// 结构化故障记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    /// 出错模块 ID
    pub module_id: ModuleId,

    /// 出错模块符号名
    pub symbolic_name: String,

    /// 故障阶段
    pub phase: FaultPhase,

    /// 错误原因
    pub cause: String,

    /// 发生时间
    pub occurred_at: DateTime<Utc>,
}

impl FaultRecord {
    /// 创建故障记录
    pub fn new(
        module_id: ModuleId,
        symbolic_name: impl Into<String>,
        phase: FaultPhase,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            module_id,
            symbolic_name: symbolic_name.into(),
            phase,
            cause: cause.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// 故障接收器
///
/// 可能在任意线程上被调用，包括事件分发工作线程。
pub trait FaultSink: Send + Sync {
    /// 报告一条故障记录
    fn report(&self, record: &FaultRecord);
}

/// 默认故障接收器：写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, record: &FaultRecord) {
        match record.phase {
            FaultPhase::Start | FaultPhase::Stop => error!(
                module_id = record.module_id,
                symbolic_name = %record.symbolic_name,
                phase = %record.phase,
                cause = %record.cause,
                "模块激活器故障"
            ),
            FaultPhase::Dispatch | FaultPhase::ServiceCallback => warn!(
                module_id = record.module_id,
                symbolic_name = %record.symbolic_name,
                phase = %record.phase,
                cause = %record.cause,
                "回调执行故障"
            ),
        }
    }
}

/// 内存故障接收器，收集所有记录，便于宿主轮询或测试断言
#[derive(Debug, Default)]
pub struct MemoryFaultSink {
    records: Mutex<Vec<FaultRecord>>,
}

impl MemoryFaultSink {
    /// 创建空的故障收集器
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录的快照
    pub fn records(&self) -> Vec<FaultRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取出并清空所有记录
    pub fn drain(&self) -> Vec<FaultRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// 已收集的故障数量
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 是否没有任何故障
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FaultSink for MemoryFaultSink {
    fn report(&self, record: &FaultRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

/// 把 panic 负载转换为可读的原因字符串
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: <non-string payload>".to_string()
    }
}
