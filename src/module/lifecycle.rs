//! 生命周期管理器
//!
//! 模块状态的唯一写入者。负责安装、启动、停止与卸载模块，调用激活器钩子，
//! 并在模块离开 `ACTIVE` 时撤销它拥有的服务、订阅与追踪器。
//!
//! ```text
//! INSTALLED ──start──▶ STARTING ──ok──▶ ACTIVE ──stop──▶ STOPPING ──▶ STOPPED
//!                          │                                            │
//!                          └──err/panic──▶ FAILED ◀───────(可再次 start)─┘
//! ```
//!
//! 同一模块的状态转换由模块自身的异步锁串行化，不同模块可以并发转换。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use super::context::ModuleContext;
use super::metadata::{Module, ModuleDescriptor, ModuleId, ModuleInfo, ModuleState, SYSTEM_MODULE_ID};
use crate::core::fault::{FaultPhase, FaultRecord, FaultSink};
use crate::event::{property_keys, system_events, Event, EventBus};
use crate::service::ServiceRegistry;
use crate::utils::{CoreError, IdSequence, Result};

enum StartOutcome {
    Started,
    AlreadyActive,
    Failed(FaultRecord),
}

/// 生命周期管理器
pub struct LifecycleManager {
    /// 已安装的模块，按 ID（即安装顺序）排列
    modules: RwLock<BTreeMap<ModuleId, Arc<Module>>>,

    /// 成功启动的顺序，用于逆序停止
    start_order: Mutex<Vec<ModuleId>>,

    module_ids: IdSequence,
    registry: ServiceRegistry,
    event_bus: EventBus,
    fault_sink: Arc<dyn FaultSink>,
}

impl LifecycleManager {
    /// 创建生命周期管理器，同时登记处于运行状态的系统模块
    pub fn new(
        registry: ServiceRegistry,
        event_bus: EventBus,
        fault_sink: Arc<dyn FaultSink>,
        system_module_name: &str,
    ) -> Self {
        let system = Arc::new(Module::system(system_module_name));
        info!(symbolic_name = %system_module_name, "创建生命周期管理器");

        let mut modules = BTreeMap::new();
        modules.insert(SYSTEM_MODULE_ID, system);

        Self {
            modules: RwLock::new(modules),
            start_order: Mutex::new(Vec::new()),
            module_ids: IdSequence::starting_at(SYSTEM_MODULE_ID + 1),
            registry,
            event_bus,
            fault_sink,
        }
    }

    // ==================== 安装 ====================

    /// 安装模块，不调用激活器
    pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        let id = self.module_ids.next_id();
        let module = Arc::new(Module::from_descriptor(id, descriptor));

        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, module.clone());

        info!(
            module_id = id,
            symbolic_name = %module.symbolic_name(),
            version = %module.version(),
            "模块已安装"
        );
        self.announce(system_events::MODULE_INSTALLED, &module);
        Ok(id)
    }

    // ==================== 启动 ====================

    /// 启动模块
    ///
    /// 对已运行的模块是空操作。激活器失败时模块进入 `FAILED`，
    /// 启动期间注册的服务与订阅被撤销，返回 `CoreError::ActivationFailed`。
    pub async fn start(&self, module_id: ModuleId) -> Result<()> {
        let module = self.require(module_id)?;
        match self.start_module(&module).await? {
            StartOutcome::Started | StartOutcome::AlreadyActive => Ok(()),
            StartOutcome::Failed(fault) => {
                self.fault_sink.report(&fault);
                Err(CoreError::ActivationFailed {
                    module_id,
                    phase: fault.phase.to_string(),
                    reason: fault.cause,
                })
            }
        }
    }

    /// 按安装顺序启动所有 `INSTALLED` 状态的模块
    ///
    /// 单个模块失败不影响其它模块，返回收集到的故障。
    pub async fn start_all(&self) -> Vec<FaultRecord> {
        let mut faults = Vec::new();
        for module in self.snapshot() {
            if module.state() != ModuleState::Installed {
                continue;
            }
            match self.start_module(&module).await {
                Ok(StartOutcome::Failed(fault)) => {
                    self.fault_sink.report(&fault);
                    faults.push(fault);
                }
                Ok(_) => {}
                // 期间被卸载
                Err(e) => debug!(module_id = module.id(), error = %e, "跳过模块"),
            }
        }
        faults
    }

    async fn start_module(&self, module: &Arc<Module>) -> Result<StartOutcome> {
        let _transition = module.transition.lock().await;

        match module.state() {
            ModuleState::Active => {
                debug!(module_id = module.id(), "模块已在运行中");
                return Ok(StartOutcome::AlreadyActive);
            }
            state if state.can_start() => {}
            state => return Err(CoreError::invalid_state(module.id(), state, "start")),
        }

        info!(module_id = module.id(), symbolic_name = %module.symbolic_name(), "启动模块");
        module.mark_starting();

        let outcome = match module.activator() {
            Some(handle) => handle.start(&self.context_for(module)).await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                module.mark_active();
                self.start_order
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(module.id());
                info!(module_id = module.id(), "模块启动成功");
                self.announce(system_events::MODULE_STARTED, module);
                Ok(StartOutcome::Started)
            }
            Err(cause) => {
                error!(module_id = module.id(), cause = %cause, "模块启动失败");
                // 先进入 FAILED，撤销期间的注册会被拒绝
                module.mark_failed(cause.clone());
                self.withdraw(module.id());
                self.announce(system_events::MODULE_FAILED, module);
                Ok(StartOutcome::Failed(FaultRecord::new(
                    module.id(),
                    module.symbolic_name(),
                    FaultPhase::Start,
                    cause,
                )))
            }
        }
    }

    // ==================== 停止 ====================

    /// 停止模块
    ///
    /// 对非 `ACTIVE` 状态的模块是空操作。激活器 `stop` 的错误只作为故障报告，
    /// 模块总会进入 `STOPPED`。系统模块不能单独停止。
    pub async fn stop(&self, module_id: ModuleId) -> Result<()> {
        if module_id == SYSTEM_MODULE_ID {
            return Err(CoreError::invalid_state(module_id, ModuleState::Active, "stop"));
        }
        let module = self.require(module_id)?;
        if let Some(fault) = self.stop_module(&module).await {
            self.fault_sink.report(&fault);
        }
        Ok(())
    }

    /// 按启动的逆序停止所有模块
    ///
    /// 故障在全部模块停止后统一报告，并作为返回值。
    pub async fn stop_all(&self) -> Vec<FaultRecord> {
        let order: Vec<ModuleId> = self
            .start_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .copied()
            .collect();

        info!(count = order.len(), "停止所有模块");

        let mut faults = Vec::new();
        for module_id in order {
            let Some(module) = self.get_module(module_id) else {
                continue;
            };
            if let Some(fault) = self.stop_module(&module).await {
                faults.push(fault);
            }
        }

        for fault in &faults {
            self.fault_sink.report(fault);
        }
        if !faults.is_empty() {
            warn!(faults = faults.len(), "部分模块停止时出现故障");
        }
        faults
    }

    async fn stop_module(&self, module: &Arc<Module>) -> Option<FaultRecord> {
        let _transition = module.transition.lock().await;
        self.stop_locked(module).await
    }

    /// 调用方必须持有模块的转换锁
    async fn stop_locked(&self, module: &Arc<Module>) -> Option<FaultRecord> {
        let state = module.state();
        if !state.can_stop() {
            debug!(module_id = module.id(), state = %state, "模块未运行，忽略停止");
            return None;
        }

        info!(module_id = module.id(), symbolic_name = %module.symbolic_name(), "停止模块");
        module.set_state(ModuleState::Stopping);

        let outcome = match module.activator() {
            Some(handle) => handle.stop(&self.context_for(module)).await,
            None => Ok(()),
        };

        self.withdraw(module.id());
        self.forget_start(module.id());

        let cause = outcome.err();
        if let Some(cause) = &cause {
            warn!(module_id = module.id(), cause = %cause, "停止钩子失败，继续停止流程");
        }
        module.mark_stopped(cause.clone());
        info!(module_id = module.id(), "模块已停止");
        self.announce(system_events::MODULE_STOPPED, module);

        cause.map(|cause| {
            FaultRecord::new(module.id(), module.symbolic_name(), FaultPhase::Stop, cause)
        })
    }

    // ==================== 卸载 ====================

    /// 卸载模块，运行中的模块会先被停止
    ///
    /// 停止与移除在同一次转换锁内完成，排队中的 `start` 只会看到 `UNINSTALLED`。
    pub async fn uninstall(&self, module_id: ModuleId) -> Result<()> {
        if module_id == SYSTEM_MODULE_ID {
            return Err(CoreError::invalid_state(
                module_id,
                ModuleState::Active,
                "uninstall",
            ));
        }
        let module = self.require(module_id)?;

        let fault = {
            let _transition = module.transition.lock().await;
            if module.state() == ModuleState::Uninstalled {
                return Err(CoreError::ModuleNotFound(module_id));
            }

            let fault = self.stop_locked(&module).await;
            // 启动失败时可能残留的订阅
            self.withdraw(module_id);
            self.forget_start(module_id);
            module.set_state(ModuleState::Uninstalled);
            self.modules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&module_id);
            fault
        };

        if let Some(fault) = fault {
            self.fault_sink.report(&fault);
        }
        info!(module_id = module_id, symbolic_name = %module.symbolic_name(), "模块已卸载");
        self.announce(system_events::MODULE_UNINSTALLED, &module);
        Ok(())
    }

    // ==================== 查询 ====================

    /// 所有模块的状态快照，包括系统模块
    pub fn get_modules(&self) -> Vec<ModuleInfo> {
        self.snapshot().iter().map(|m| m.info()).collect()
    }

    /// 按 ID 查找模块
    pub fn get_module(&self, module_id: ModuleId) -> Option<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&module_id)
            .cloned()
    }

    /// 系统模块
    pub fn system_module(&self) -> Option<Arc<Module>> {
        self.get_module(SYSTEM_MODULE_ID)
    }

    /// 已安装的模块数量，包括系统模块
    pub fn module_count(&self) -> usize {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 为模块创建上下文
    pub fn context_for(&self, module: &Arc<Module>) -> ModuleContext {
        ModuleContext::new(module.clone(), self.registry.clone(), self.event_bus.clone())
    }

    // ==================== 内部方法 ====================

    fn require(&self, module_id: ModuleId) -> Result<Arc<Module>> {
        self.get_module(module_id)
            .ok_or(CoreError::ModuleNotFound(module_id))
    }

    fn snapshot(&self) -> Vec<Arc<Module>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn forget_start(&self, module_id: ModuleId) {
        self.start_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| *id != module_id);
    }

    /// 撤销模块拥有的服务、追踪器与订阅
    fn withdraw(&self, module_id: ModuleId) {
        let services = self.registry.unregister_module(module_id);
        let subscriptions = self.event_bus.unsubscribe_owner(module_id);
        if services > 0 || subscriptions > 0 {
            debug!(
                module_id = module_id,
                services = services,
                subscriptions = subscriptions,
                "已撤销模块资源"
            );
        }
    }

    fn announce(&self, topic: &str, module: &Module) {
        let event = Event::builder(topic)
            .property(property_keys::MODULE_ID, module.id())
            .property(property_keys::MODULE_SYMBOLIC_NAME, module.symbolic_name())
            .property(property_keys::MODULE_VERSION, module.version().to_string())
            .build();
        if let Err(e) = self.event_bus.publish(event) {
            debug!(topic = %topic, error = %e, "生命周期事件未发布");
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("modules", &self.module_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EventBusConfig;
    use crate::core::fault::MemoryFaultSink;
    use crate::event::AllowAll;
    use crate::event::Properties;
    use crate::module::Activator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Marker: Send + Sync {}

    struct Unit;

    impl Marker for Unit {}

    /// 可配置的测试激活器
    #[derive(Default)]
    struct Scripted {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
        panic_start: bool,
        fail_stop: bool,
        register_before_failing: bool,
    }

    #[async_trait]
    impl Activator for Scripted {
        async fn start(&self, context: &ModuleContext) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.register_before_failing {
                let service: Arc<dyn Marker> = Arc::new(Unit);
                context.register_service(service, Properties::new())?;
                context.subscribe(&["any/topic"], None, |_| Ok(()))?;
            }
            if self.panic_start {
                panic!("activator panicked");
            }
            if self.fail_start {
                anyhow::bail!("refusing to start");
            }
            Ok(())
        }

        async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                anyhow::bail!("refusing to stop");
            }
            Ok(())
        }
    }

    struct Fixture {
        manager: LifecycleManager,
        registry: ServiceRegistry,
        bus: EventBus,
        sink: Arc<MemoryFaultSink>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemoryFaultSink::new());
        let bus = EventBus::new(EventBusConfig::single_threaded(), Arc::new(AllowAll), sink.clone())
            .unwrap();
        let registry = ServiceRegistry::new(bus.clone(), sink.clone());
        Fixture {
            manager: LifecycleManager::new(registry.clone(), bus.clone(), sink.clone(), "test.system"),
            registry,
            bus,
            sink,
        }
    }

    fn install(f: &Fixture, name: &str, scripted: &Arc<Scripted>) -> ModuleId {
        let descriptor = ModuleDescriptor::builder(name)
            .version("1.0.0")
            .activator(scripted.clone())
            .build()
            .unwrap();
        f.manager.install(descriptor).unwrap()
    }

    #[tokio::test]
    async fn test_system_module_present() {
        let f = fixture();
        assert_eq!(f.manager.module_count(), 1);
        let system = f.manager.system_module().unwrap();
        assert_eq!(system.symbolic_name(), "test.system");
        assert_eq!(system.state(), ModuleState::Active);

        assert!(matches!(
            f.manager.uninstall(SYSTEM_MODULE_ID).await,
            Err(CoreError::InvalidState { .. })
        ));
        assert!(matches!(
            f.manager.stop(SYSTEM_MODULE_ID).await,
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_install_does_not_invoke_activator() {
        let f = fixture();
        let scripted = Arc::new(Scripted::default());
        let id = install(&f, "demo", &scripted);

        assert_eq!(id, 1);
        assert_eq!(f.manager.module_count(), 2);
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 0);
        assert_eq!(f.manager.get_module(id).unwrap().state(), ModuleState::Installed);
    }

    #[tokio::test]
    async fn test_start_stop_invokes_hooks_once() {
        let f = fixture();
        let scripted = Arc::new(Scripted::default());
        let id = install(&f, "demo", &scripted);

        f.manager.start(id).await.unwrap();
        f.manager.start(id).await.unwrap();
        let module = f.manager.get_module(id).unwrap();
        assert_eq!(module.state(), ModuleState::Active);
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 1);
        assert_eq!(module.activator().unwrap().start_count(), 1);

        f.manager.stop(id).await.unwrap();
        f.manager.stop(id).await.unwrap();
        assert_eq!(module.state(), ModuleState::Stopped);
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
        assert_eq!(module.activator().unwrap().stop_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let f = fixture();
        let scripted = Arc::new(Scripted::default());
        let id = install(&f, "demo", &scripted);

        f.manager.start(id).await.unwrap();
        f.manager.stop(id).await.unwrap();
        f.manager.start(id).await.unwrap();
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 2);
        assert_eq!(f.manager.get_module(id).unwrap().state(), ModuleState::Active);
    }

    #[tokio::test]
    async fn test_start_failure_is_isolated_and_withdrawn() {
        let f = fixture();
        let failing = Arc::new(Scripted {
            fail_start: true,
            register_before_failing: true,
            ..Default::default()
        });
        let healthy = Arc::new(Scripted::default());
        let bad = install(&f, "bad", &failing);
        let good = install(&f, "good", &healthy);

        let err = f.manager.start(bad).await.unwrap_err();
        assert!(matches!(err, CoreError::ActivationFailed { module_id, .. } if module_id == bad));

        let module = f.manager.get_module(bad).unwrap();
        assert_eq!(module.state(), ModuleState::Failed);
        assert!(module.last_error().unwrap().contains("refusing to start"));
        assert_eq!(f.registry.service_count(), 0);
        assert_eq!(f.bus.subscription_count(), 0);

        let faults = f.sink.records();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].module_id, bad);
        assert_eq!(faults[0].phase, FaultPhase::Start);

        f.manager.start(good).await.unwrap();
        assert_eq!(f.manager.get_module(good).unwrap().state(), ModuleState::Active);
    }

    #[tokio::test]
    async fn test_start_panic_becomes_failed() {
        let f = fixture();
        let scripted = Arc::new(Scripted {
            panic_start: true,
            ..Default::default()
        });
        let id = install(&f, "panicky", &scripted);

        let err = f.manager.start(id).await.unwrap_err();
        assert!(err.to_string().contains("activator panicked"));
        assert_eq!(f.manager.get_module(id).unwrap().state(), ModuleState::Failed);

        // 失败后可以重新启动
        let _ = f.manager.start(id).await;
        assert_eq!(scripted.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_failure_still_stops() {
        let f = fixture();
        let scripted = Arc::new(Scripted {
            fail_stop: true,
            register_before_failing: true,
            ..Default::default()
        });
        let id = install(&f, "demo", &scripted);
        f.manager.start(id).await.unwrap();
        assert_eq!(f.registry.service_count(), 1);
        assert_eq!(f.bus.subscription_count(), 1);

        f.manager.stop(id).await.unwrap();
        let module = f.manager.get_module(id).unwrap();
        assert_eq!(module.state(), ModuleState::Stopped);
        assert!(module.last_error().unwrap().contains("refusing to stop"));
        assert_eq!(f.registry.service_count(), 0);
        assert_eq!(f.bus.subscription_count(), 0);

        let faults = f.sink.records();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].phase, FaultPhase::Stop);
    }

    #[tokio::test]
    async fn test_stop_all_reverse_order() {
        let f = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Recorder {
            name: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }

        #[async_trait]
        impl Activator for Recorder {
            async fn start(&self, _context: &ModuleContext) -> anyhow::Result<()> {
                Ok(())
            }

            async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
                self.order.lock().unwrap().push(self.name);
                if self.name == "b" {
                    anyhow::bail!("b failed to stop");
                }
                Ok(())
            }
        }

        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let descriptor = ModuleDescriptor::builder(name)
                .activator(Arc::new(Recorder {
                    name,
                    order: order.clone(),
                }))
                .build()
                .unwrap();
            ids.push(f.manager.install(descriptor).unwrap());
        }
        // 启动顺序 c, a, b
        for id in [ids[2], ids[0], ids[1]] {
            f.manager.start(id).await.unwrap();
        }

        let faults = f.manager.stop_all().await;
        assert_eq!(*order.lock().unwrap(), vec!["b", "a", "c"]);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].module_id, ids[1]);
        assert_eq!(f.sink.len(), 1);

        assert!(f.manager.stop_all().await.is_empty());
        assert_eq!(f.manager.get_module(SYSTEM_MODULE_ID).unwrap().state(), ModuleState::Active);
    }

    #[tokio::test]
    async fn test_start_all_collects_faults() {
        let f = fixture();
        let good = Arc::new(Scripted::default());
        let bad = Arc::new(Scripted {
            fail_start: true,
            ..Default::default()
        });
        let good_id = install(&f, "good", &good);
        let bad_id = install(&f, "bad", &bad);

        let faults = f.manager.start_all().await;
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].module_id, bad_id);
        assert_eq!(f.manager.get_module(good_id).unwrap().state(), ModuleState::Active);

        // FAILED 的模块不在 start_all 的范围内
        assert!(f.manager.start_all().await.is_empty());
        assert_eq!(bad.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uninstall() {
        let f = fixture();
        let scripted = Arc::new(Scripted::default());
        let id = install(&f, "demo", &scripted);
        f.manager.start(id).await.unwrap();

        f.manager.uninstall(id).await.unwrap();
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
        assert!(f.manager.get_module(id).is_none());
        assert_eq!(f.manager.module_count(), 1);

        assert!(matches!(f.manager.start(id).await, Err(CoreError::ModuleNotFound(_))));
        assert!(matches!(f.manager.uninstall(id).await, Err(CoreError::ModuleNotFound(_))));

        // ID 不复用
        let next = install(&f, "next", &Arc::new(Scripted::default()));
        assert!(next > id);
    }

    #[tokio::test]
    async fn test_uninstall_forgets_start_order() {
        let f = fixture();
        let scripted = Arc::new(Scripted::default());
        let id = install(&f, "demo", &scripted);
        f.manager.start(id).await.unwrap();
        assert_eq!(*f.manager.start_order.lock().unwrap(), vec![id]);

        f.manager.uninstall(id).await.unwrap();
        assert!(f.manager.start_order.lock().unwrap().is_empty());
        assert_eq!(scripted.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let f = fixture();
        let topics = Arc::new(Mutex::new(Vec::new()));
        let topics_clone = topics.clone();
        let system = f.manager.system_module().unwrap();
        f.bus
            .subscribe(system.identity().clone(), &["tendril/module/*"], None, move |event| {
                topics_clone.lock().unwrap().push(event.topic().to_string());
                Ok(())
            })
            .unwrap();

        let id = install(&f, "demo", &Arc::new(Scripted::default()));
        f.manager.start(id).await.unwrap();
        f.manager.stop(id).await.unwrap();
        f.manager.uninstall(id).await.unwrap();
        f.bus.close().await;

        assert_eq!(
            *topics.lock().unwrap(),
            vec![
                system_events::MODULE_INSTALLED,
                system_events::MODULE_STARTED,
                system_events::MODULE_STOPPED,
                system_events::MODULE_UNINSTALLED,
            ]
        );
    }

    #[tokio::test]
    async fn test_get_modules_snapshot() {
        let f = fixture();
        install(&f, "one", &Arc::new(Scripted::default()));
        install(&f, "two", &Arc::new(Scripted::default()));

        let names: Vec<String> = f
            .manager
            .get_modules()
            .iter()
            .map(|info| info.symbolic_name().to_string())
            .collect();
        assert_eq!(names, vec!["test.system", "one", "two"]);
    }
}
