//! 运行时错误类型定义
//!
//! 本模块定义了运行时中使用的所有错误类型。

use thiserror::Error;

/// 运行时核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 生命周期错误 ====================

    /// 模块未找到
    #[error("模块未找到: id={0}")]
    ModuleNotFound(u64),

    /// 模块状态不允许该操作
    #[error("模块 {module_id} 当前状态 {state} 不允许执行 {operation}")]
    InvalidState {
        module_id: u64,
        state: String,
        operation: String,
    },

    /// 激活器启动或停止失败
    #[error("模块 {module_id} 激活器 {phase} 失败: {reason}")]
    ActivationFailed {
        module_id: u64,
        phase: String,
        reason: String,
    },

    // ==================== 事件系统错误 ====================

    /// 过滤表达式无效
    #[error("过滤表达式无效 '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// 主题无效
    #[error("主题无效: '{0}'")]
    InvalidTopic(String),

    /// 事件处理器执行失败
    #[error("事件处理失败: subscription '{subscription_id}' - {reason}")]
    Dispatch {
        subscription_id: String,
        reason: String,
    },

    /// 事件总线已关闭
    #[error("事件总线已关闭，拒绝发布")]
    EventBusClosed,

    // ==================== 运行时错误 ====================

    /// 运行时已关闭
    #[error("运行时已关闭")]
    RuntimeShutdown,

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue { key: String, reason: String },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    /// 模块不存在
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    /// 模块状态不允许该操作
    pub const MODULE_INVALID_STATE: &str = "MODULE-002";
    /// 激活器失败
    pub const MODULE_ACTIVATION_FAILED: &str = "MODULE-003";

    // 事件错误 (EVENT-xxx)
    /// 过滤表达式非法
    pub const EVENT_INVALID_FILTER: &str = "EVENT-001";
    /// 主题非法
    pub const EVENT_INVALID_TOPIC: &str = "EVENT-002";
    /// 事件分发失败
    pub const EVENT_DISPATCH_FAILED: &str = "EVENT-003";
    /// 总线已关闭
    pub const EVENT_BUS_CLOSED: &str = "EVENT-004";

    // 运行时错误 (RUNTIME-xxx)
    /// 运行时已关闭
    pub const RUNTIME_SHUTDOWN: &str = "RUNTIME-001";
    /// 运行时初始化失败
    pub const RUNTIME_INIT_FAILED: &str = "RUNTIME-002";

    // 配置错误 (CONFIG-xxx)
    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    /// 配置值非法
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::InvalidState { .. } => error_code::MODULE_INVALID_STATE,
            CoreError::ActivationFailed { .. } => error_code::MODULE_ACTIVATION_FAILED,
            CoreError::InvalidFilter { .. } => error_code::EVENT_INVALID_FILTER,
            CoreError::InvalidTopic(_) => error_code::EVENT_INVALID_TOPIC,
            CoreError::Dispatch { .. } => error_code::EVENT_DISPATCH_FAILED,
            CoreError::EventBusClosed => error_code::EVENT_BUS_CLOSED,
            CoreError::RuntimeShutdown => error_code::RUNTIME_SHUTDOWN,
            CoreError::InitFailed(_) => error_code::RUNTIME_INIT_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 构造状态错误
    pub(crate) fn invalid_state(
        module_id: u64,
        state: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::InvalidState {
            module_id,
            state: state.to_string(),
            operation: operation.into(),
        }
    }
}
