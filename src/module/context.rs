//! 模块上下文
//!
//! 激活器通过上下文访问运行时：注册与查找服务、追踪服务、发布与订阅事件。
//! 通过上下文创建的服务、订阅与追踪器都归该模块所有，模块停止时自动撤销。

use std::sync::Arc;

use super::metadata::{Module, ModuleId, ModuleIdentity};
use crate::event::{DispatchReport, Event, EventBus, Properties};
use crate::service::{ServiceReference, ServiceRegistration, ServiceRegistry, ServiceTracker};
use crate::utils::Result;

/// 模块上下文
#[derive(Clone)]
pub struct ModuleContext {
    module: Arc<Module>,
    registry: ServiceRegistry,
    event_bus: EventBus,
}

impl ModuleContext {
    pub(crate) fn new(module: Arc<Module>, registry: ServiceRegistry, event_bus: EventBus) -> Self {
        Self {
            module,
            registry,
            event_bus,
        }
    }

    /// 所属模块的身份
    pub fn identity(&self) -> &ModuleIdentity {
        self.module.identity()
    }

    /// 所属模块 ID
    pub fn module_id(&self) -> ModuleId {
        self.module.id()
    }

    // ==================== 服务 ====================

    /// 以本模块的名义注册服务
    pub fn register_service<T>(
        &self,
        service: Arc<T>,
        properties: Properties,
    ) -> Result<ServiceRegistration>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.register_service(&self.module, service, properties)
    }

    /// 注销本模块注册的服务
    pub fn unregister_service(&self, registration: &ServiceRegistration) -> bool {
        self.registry.unregister_service(registration)
    }

    /// 当前最优的服务实例
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_service::<T>()
    }

    /// 按查找顺序返回契约的所有服务
    pub fn get_services<T>(&self) -> Vec<ServiceReference<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_services::<T>()
    }

    /// 追踪服务，不论提供者先启动还是后启动都能收到通知
    pub fn track<T, A, U>(&self, on_available: A, on_unavailable: U) -> ServiceTracker<T>
    where
        T: ?Sized + Send + Sync + 'static,
        A: Fn(&ServiceReference<T>) + Send + Sync + 'static,
        U: Fn(&ServiceReference<T>) + Send + Sync + 'static,
    {
        self.registry
            .track(self.module.identity(), on_available, on_unavailable)
    }

    // ==================== 事件 ====================

    /// 异步发布事件
    pub fn publish(&self, event: Event) -> Result<()> {
        self.event_bus.publish(event)
    }

    /// 在当前线程同步分发事件
    pub fn publish_sync(&self, event: Event) -> Result<DispatchReport> {
        self.event_bus.publish_sync(event)
    }

    /// 以本模块的名义订阅事件
    pub fn subscribe<F>(&self, topics: &[&str], filter: Option<&str>, handler: F) -> Result<String>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.event_bus
            .subscribe(self.module.identity().clone(), topics, filter, handler)
    }

    /// 取消订阅
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.event_bus.unsubscribe(subscription_id)
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", self.module.identity())
            .finish()
    }
}
