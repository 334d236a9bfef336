//! 运行时配置
//!
//! 定义运行时的配置结构和加载逻辑，支持 YAML 与 JSON 两种格式。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{CoreError, Result};

/// 默认系统模块符号名
pub const DEFAULT_SYSTEM_MODULE_NAME: &str = "tendril.system";

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// 分发工作线程数（默认 CPU 核心数）
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// 关闭时等待在途分发任务完成的宽限期（毫秒）
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_close_timeout_ms() -> u64 {
    60_000
}

impl EventBusConfig {
    /// 关闭宽限期
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// 单线程分发配置：同一主题的事件按提交顺序投递
    pub fn single_threaded() -> Self {
        Self {
            worker_count: 1,
            ..Default::default()
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 事件总线配置
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 运行时自注册的系统模块符号名
    #[serde(default = "default_system_module_name")]
    pub system_module_name: String,
}

fn default_system_module_name() -> String {
    DEFAULT_SYSTEM_MODULE_NAME.to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            event_bus: EventBusConfig::default(),
            logging: LogConfig::default(),
            system_module_name: default_system_module_name(),
        }
    }
}

impl RuntimeConfig {
    /// 创建配置构建器
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: RuntimeConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.event_bus.worker_count == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "event_bus.worker_count".to_string(),
                reason: "工作线程数必须大于 0".to_string(),
            });
        }
        if self.event_bus.close_timeout_ms == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "event_bus.close_timeout_ms".to_string(),
                reason: "关闭宽限期必须大于 0".to_string(),
            });
        }
        if self.system_module_name.trim().is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "system_module_name".to_string(),
                reason: "系统模块符号名不能为空".to_string(),
            });
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// 设置分发工作线程数
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.event_bus.worker_count = count;
        self
    }

    /// 设置关闭宽限期
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.event_bus.close_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置系统模块符号名
    pub fn system_module_name(mut self, name: impl Into<String>) -> Self {
        self.config.system_module_name = name.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}
