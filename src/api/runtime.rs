//! 运行时门面
//!
//! 将生命周期管理器、服务注册表与事件总线组合在一起，供外部引导程序使用。
//!
//! # 示例
//!
//! ```rust,no_run
//! use tendril_core::{ModuleDescriptor, Runtime, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::new(RuntimeConfig::default())?;
//!
//!     let id = runtime.install(ModuleDescriptor::builder("org.example.hello").build()?)?;
//!     runtime.start(id).await?;
//!
//!     let report = runtime.shutdown().await;
//!     assert!(report.faults.is_empty());
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::RuntimeConfig;
use crate::core::fault::{FaultRecord, FaultSink, TracingFaultSink};
use crate::event::{system_events, AllowAll, Event, EventBus, TopicPermission};
use crate::module::{LifecycleManager, Module, ModuleContext, ModuleDescriptor, ModuleId, ModuleInfo};
use crate::service::{ServiceInfo, ServiceRegistry};
use crate::utils::{CoreError, Result};

// ============================================================================
// 运行时状态
// ============================================================================

/// 运行时状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// 运行中
    Running,
    /// 正在关闭
    ShuttingDown,
    /// 已关闭
    Shutdown,
}

impl RuntimeState {
    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, RuntimeState::Running)
    }
}

/// 关闭报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// 停止模块时收集到的故障
    pub faults: Vec<FaultRecord>,
    /// 宽限期结束时被丢弃的待分发事件数
    pub dropped_events: u64,
}

// ============================================================================
// 构建器
// ============================================================================

/// 运行时构建器
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    fault_sink: Arc<dyn FaultSink>,
    permission: Arc<dyn TopicPermission>,
}

impl RuntimeBuilder {
    /// 使用默认配置创建构建器
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            fault_sink: Arc::new(TracingFaultSink),
            permission: Arc::new(AllowAll),
        }
    }

    /// 设置运行时配置
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置故障通道，默认写入日志
    pub fn fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = sink;
        self
    }

    /// 设置订阅权限检查，默认全部允许
    pub fn permission(mut self, permission: Arc<dyn TopicPermission>) -> Self {
        self.permission = permission;
        self
    }

    /// 构建运行时，需要在 tokio 运行时中调用
    pub fn build(self) -> Result<Runtime> {
        self.config.validate()?;

        info!("初始化 tendril 运行时 v{}", crate::VERSION);

        let event_bus = EventBus::new(
            self.config.event_bus.clone(),
            self.permission,
            self.fault_sink.clone(),
        )?;
        debug!(workers = self.config.event_bus.worker_count, "事件总线初始化完成");

        let registry = ServiceRegistry::new(event_bus.clone(), self.fault_sink.clone());
        debug!("服务注册表初始化完成");

        let lifecycle = LifecycleManager::new(
            registry.clone(),
            event_bus.clone(),
            self.fault_sink.clone(),
            &self.config.system_module_name,
        );
        debug!("生命周期管理器初始化完成");

        info!("tendril 运行时初始化完成");
        Ok(Runtime {
            config: self.config,
            state: RwLock::new(RuntimeState::Running),
            lifecycle: Arc::new(lifecycle),
            registry,
            event_bus,
            fault_sink: self.fault_sink,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// tendril 运行时
///
/// # 生命周期
///
/// 1. `new()` / `builder().build()` - 创建运行时，系统模块立即处于运行状态
/// 2. `install()` / `start()` / `stop()` / `uninstall()` - 管理模块
/// 3. `shutdown()` - 逆序停止所有模块，清空注册表并关闭事件总线
pub struct Runtime {
    config: RuntimeConfig,
    state: RwLock<RuntimeState>,
    lifecycle: Arc<LifecycleManager>,
    registry: ServiceRegistry,
    event_bus: EventBus,
    fault_sink: Arc<dyn FaultSink>,
}

impl Runtime {
    /// 使用给定配置创建运行时
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        RuntimeBuilder::new().config(config).build()
    }

    /// 创建构建器
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 安装模块
    pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        self.ensure_running()?;
        self.lifecycle.install(descriptor)
    }

    /// 启动模块
    pub async fn start(&self, module_id: ModuleId) -> Result<()> {
        self.ensure_running()?;
        self.lifecycle.start(module_id).await
    }

    /// 启动所有已安装但从未启动的模块
    pub async fn start_all(&self) -> Result<Vec<FaultRecord>> {
        self.ensure_running()?;
        Ok(self.lifecycle.start_all().await)
    }

    /// 停止模块
    pub async fn stop(&self, module_id: ModuleId) -> Result<()> {
        self.ensure_running()?;
        self.lifecycle.stop(module_id).await
    }

    /// 按启动的逆序停止所有模块，返回收集到的故障
    pub async fn stop_all(&self) -> Result<Vec<FaultRecord>> {
        self.ensure_running()?;
        Ok(self.lifecycle.stop_all().await)
    }

    /// 卸载模块
    pub async fn uninstall(&self, module_id: ModuleId) -> Result<()> {
        self.ensure_running()?;
        self.lifecycle.uninstall(module_id).await
    }

    /// 关闭运行时
    ///
    /// 重复调用是安全的，只有第一次调用会执行关闭流程。
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !state.is_running() {
                debug!(state = ?*state, "运行时已在关闭，忽略");
                return ShutdownReport::default();
            }
            *state = RuntimeState::ShuttingDown;
        }

        info!("正在关闭 tendril 运行时...");

        let event = Event::builder(system_events::RUNTIME_SHUTDOWN)
            .property("version", crate::VERSION)
            .build();
        if let Err(e) = self.event_bus.publish(event) {
            debug!(error = %e, "关闭事件未发布");
        }

        // 1. 停止所有模块
        let faults = self.lifecycle.stop_all().await;
        debug!(faults = faults.len(), "所有模块已停止");

        // 2. 清空注册表
        self.registry.clear();

        // 3. 关闭事件总线
        let dropped_events = self.event_bus.close().await;
        if dropped_events > 0 {
            warn!(dropped = dropped_events, "宽限期内未处理完的事件已丢弃");
        }

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = RuntimeState::Shutdown;
        info!("tendril 运行时已关闭");

        ShutdownReport {
            faults,
            dropped_events,
        }
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 所有模块的快照，包括系统模块
    pub fn get_modules(&self) -> Vec<ModuleInfo> {
        self.lifecycle.get_modules()
    }

    /// 获取模块
    pub fn get_module(&self, module_id: ModuleId) -> Option<Arc<Module>> {
        self.lifecycle.get_module(module_id)
    }

    /// 所有已注册服务的快照
    pub fn get_services(&self) -> Vec<ServiceInfo> {
        self.registry.all_services()
    }

    /// 系统模块的上下文，供引导程序注册运行时级服务
    pub fn system_context(&self) -> Result<ModuleContext> {
        let system = self
            .lifecycle
            .system_module()
            .ok_or_else(|| CoreError::Internal("系统模块缺失".to_string()))?;
        Ok(self.lifecycle.context_for(&system))
    }

    /// 事件总线
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// 服务注册表
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// 生命周期管理器
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// 故障通道
    pub fn fault_sink(&self) -> &Arc<dyn FaultSink> {
        &self.fault_sink
    }

    /// 当前状态
    pub fn state(&self) -> RuntimeState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// 运行时配置
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state().is_running() {
            Ok(())
        } else {
            Err(CoreError::RuntimeShutdown)
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("modules", &self.lifecycle.module_count())
            .field("services", &self.registry.service_count())
            .finish()
    }
}
