//! 服务注册表
//!
//! 维护 契约类型 -> 提供者 的映射，支持注册、注销、查找与追踪。
//!
//! # 并发
//!
//! 所有状态由一把 `RwLock` 保护，读者只会看到修改前或修改后的快照。
//! 追踪器回调与总线事件都在释放锁之后触发。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, info};

use super::reference::{
    lookup_order, ranking_of, ContractType, ServiceEntry, ServiceId, ServiceInfo,
    ServiceReference, ServiceRegistration,
};
use super::tracker::{ServiceTracker, TrackerShared};
use crate::core::fault::FaultSink;
use crate::event::{property_keys, system_events, Event, EventBus, Filter, Properties};
use crate::module::{Module, ModuleId, ModuleIdentity};
use crate::utils::{CoreError, IdSequence, Result};

#[derive(Default)]
struct RegistryState {
    services: BTreeMap<ServiceId, Arc<ServiceEntry>>,
    trackers: HashMap<u64, Arc<TrackerShared>>,
}

impl RegistryState {
    fn trackers_for(&self, contract: ContractType) -> Vec<Arc<TrackerShared>> {
        let mut trackers: Vec<_> = self
            .trackers
            .values()
            .filter(|t| t.contract == contract)
            .cloned()
            .collect();
        trackers.sort_by_key(|t| t.id);
        trackers
    }

    fn matching(&self, contract: ContractType) -> Vec<Arc<ServiceEntry>> {
        let mut entries: Vec<_> = self
            .services
            .values()
            .filter(|e| e.contract == contract)
            .cloned()
            .collect();
        entries.sort_by(|a, b| lookup_order(a, b));
        entries
    }
}

pub(crate) struct RegistryInner {
    state: RwLock<RegistryState>,
    service_ids: IdSequence,
    tracker_ids: IdSequence,
    event_bus: EventBus,
    fault_sink: Arc<dyn FaultSink>,
}

impl RegistryInner {
    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn matching(&self, contract: ContractType) -> Vec<Arc<ServiceEntry>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(contract)
    }

    pub(crate) fn unregister(&self, service_id: ServiceId) -> bool {
        let removed = {
            let mut state = self.write();
            state
                .services
                .remove(&service_id)
                .map(|entry| {
                    let trackers = state.trackers_for(entry.contract);
                    (entry, trackers)
                })
        };

        match removed {
            Some((entry, trackers)) => {
                self.withdrawn(entry, trackers);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_tracker(&self, tracker_id: u64) {
        if let Some(tracker) = self.write().trackers.remove(&tracker_id) {
            tracker.close();
        }
    }

    fn withdrawn(&self, entry: Arc<ServiceEntry>, trackers: Vec<Arc<TrackerShared>>) {
        debug!(
            service_id = entry.id,
            contract = %entry.contract,
            module_id = entry.owner.id,
            "服务已注销"
        );
        for tracker in trackers {
            tracker.service_removed(entry.clone());
        }
        self.announce(system_events::SERVICE_UNREGISTERING, &entry);
    }

    fn announce(&self, topic: &str, entry: &ServiceEntry) {
        let event = Event::builder(topic)
            .property(property_keys::SERVICE_ID, entry.id)
            .property(property_keys::OBJECT_CLASS, entry.contract.name())
            .property(property_keys::MODULE_ID, entry.owner.id)
            .build();
        if let Err(e) = self.event_bus.publish(event) {
            debug!(topic = %topic, error = %e, "服务事件未发布");
        }
    }
}

/// 服务注册表
///
/// 克隆开销很小，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// 创建服务注册表
    pub fn new(event_bus: EventBus, fault_sink: Arc<dyn FaultSink>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(RegistryState::default()),
                service_ids: IdSequence::default(),
                tracker_ids: IdSequence::default(),
                event_bus,
                fault_sink,
            }),
        }
    }

    /// 注册服务
    ///
    /// 模块必须处于 `ACTIVE` 或 `STARTING` 状态。注册成功后同步通知追踪器，
    /// 并在总线上异步发布 `tendril/service/REGISTERED`。
    ///
    /// `service.id`、`objectClass`、`module.id` 三个属性由注册表写入。
    pub fn register_service<T>(
        &self,
        module: &Module,
        service: Arc<T>,
        properties: Properties,
    ) -> Result<ServiceRegistration>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let contract = ContractType::of::<T>();

        let (entry, trackers) = {
            let mut state = self.inner.write();

            // 状态检查与插入在同一把锁内，停止中的模块不会漏掉注销
            let module_state = module.state();
            if !module_state.accepts_services() {
                return Err(CoreError::invalid_state(
                    module.id(),
                    module_state,
                    format!("register_service<{}>", contract),
                ));
            }

            let id = self.inner.service_ids.next_id();
            let mut properties = properties;
            properties.insert(property_keys::SERVICE_ID.to_string(), Value::from(id));
            properties.insert(
                property_keys::OBJECT_CLASS.to_string(),
                Value::from(contract.name()),
            );
            properties.insert(property_keys::MODULE_ID.to_string(), Value::from(module.id()));

            let entry = Arc::new(ServiceEntry {
                id,
                contract,
                owner: module.identity().clone(),
                ranking: ranking_of(&properties),
                properties,
                instance: Arc::new(service),
            });
            state.services.insert(id, entry.clone());
            (entry, state.trackers_for(contract))
        };

        info!(
            service_id = entry.id,
            contract = %contract,
            module_id = entry.owner.id,
            ranking = entry.ranking,
            "服务已注册"
        );

        for tracker in trackers {
            tracker.service_added(entry.clone());
        }
        self.inner.announce(system_events::SERVICE_REGISTERED, &entry);

        Ok(ServiceRegistration::new(
            entry.id,
            contract,
            entry.owner.id,
            Arc::downgrade(&self.inner),
        ))
    }

    /// 注销服务，重复注销返回 `false`
    pub fn unregister_service(&self, registration: &ServiceRegistration) -> bool {
        self.inner.unregister(registration.id())
    }

    /// 按查找顺序返回契约的所有服务
    pub fn get_services<T>(&self) -> Vec<ServiceReference<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner
            .matching(ContractType::of::<T>())
            .into_iter()
            .map(ServiceReference::new)
            .collect()
    }

    /// 按过滤表达式筛选服务属性
    pub fn get_services_filtered<T>(&self, filter: &str) -> Result<Vec<ServiceReference<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let filter = Filter::parse(filter)?;
        Ok(self
            .inner
            .matching(ContractType::of::<T>())
            .into_iter()
            .filter(|entry| filter.matches(&entry.properties))
            .map(ServiceReference::new)
            .collect())
    }

    /// 最优服务的引用
    pub fn get_service_reference<T>(&self) -> Option<ServiceReference<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner
            .matching(ContractType::of::<T>())
            .into_iter()
            .next()
            .map(ServiceReference::new)
    }

    /// 最优服务实例
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_service_reference::<T>()
            .and_then(|reference| reference.service())
    }

    /// 追踪契约的服务
    ///
    /// 先对当前已注册的服务回放 `on_available`，之后接收实时变化。
    /// 快照与监听器登记在同一把写锁内完成，不会漏掉或重复任何服务。
    pub fn track<T, A, U>(
        &self,
        owner: &ModuleIdentity,
        on_available: A,
        on_unavailable: U,
    ) -> ServiceTracker<T>
    where
        T: ?Sized + Send + Sync + 'static,
        A: Fn(&ServiceReference<T>) + Send + Sync + 'static,
        U: Fn(&ServiceReference<T>) + Send + Sync + 'static,
    {
        let contract = ContractType::of::<T>();
        let tracker = Arc::new(TrackerShared::new(
            self.inner.tracker_ids.next_id(),
            owner.clone(),
            contract,
            Box::new(move |entry| on_available(&ServiceReference::new(entry.clone()))),
            Box::new(move |entry| on_unavailable(&ServiceReference::new(entry.clone()))),
            self.inner.fault_sink.clone(),
        ));

        let snapshot = {
            let mut state = self.inner.write();
            state.trackers.insert(tracker.id, tracker.clone());
            state.matching(contract)
        };

        debug!(
            tracker_id = tracker.id,
            contract = %contract,
            module_id = owner.id,
            replay = snapshot.len(),
            "创建服务追踪器"
        );

        for entry in snapshot {
            tracker.service_added(entry);
        }

        ServiceTracker::new(tracker, Arc::downgrade(&self.inner))
    }

    /// 移除模块的所有服务与追踪器
    ///
    /// 返回被注销的服务数量。
    pub fn unregister_module(&self, module_id: ModuleId) -> usize {
        let (removed, closed) = {
            let mut state = self.inner.write();

            let tracker_ids: Vec<u64> = state
                .trackers
                .values()
                .filter(|t| t.owner.id == module_id)
                .map(|t| t.id)
                .collect();
            let mut closed = Vec::with_capacity(tracker_ids.len());
            for id in tracker_ids {
                if let Some(tracker) = state.trackers.remove(&id) {
                    closed.push(tracker);
                }
            }

            let service_ids: Vec<ServiceId> = state
                .services
                .values()
                .filter(|e| e.owner.id == module_id)
                .map(|e| e.id)
                .collect();
            let mut removed = Vec::with_capacity(service_ids.len());
            for id in service_ids {
                if let Some(entry) = state.services.remove(&id) {
                    let trackers = state.trackers_for(entry.contract);
                    removed.push((entry, trackers));
                }
            }

            (removed, closed)
        };

        for tracker in &closed {
            tracker.close();
        }

        let count = removed.len();
        for (entry, trackers) in removed {
            self.inner.withdrawn(entry, trackers);
        }

        if count > 0 || !closed.is_empty() {
            debug!(
                module_id = module_id,
                services = count,
                trackers = closed.len(),
                "已撤销模块的服务与追踪器"
            );
        }
        count
    }

    /// 清空所有服务与追踪器
    ///
    /// 剩余追踪器会先收到 `on_unavailable`，然后被关闭。
    pub fn clear(&self) {
        let (entries, trackers) = {
            let mut state = self.inner.write();
            let entries: Vec<_> = std::mem::take(&mut state.services).into_values().collect();
            let trackers: Vec<_> = std::mem::take(&mut state.trackers).into_values().collect();
            (entries, trackers)
        };

        for entry in &entries {
            for tracker in trackers.iter().filter(|t| t.contract == entry.contract) {
                tracker.service_removed(entry.clone());
            }
        }
        for tracker in &trackers {
            tracker.close();
        }

        info!(
            services = entries.len(),
            trackers = trackers.len(),
            "服务注册表已清空"
        );
    }

    /// 所有服务的快照，按服务 ID 排序
    pub fn all_services(&self) -> Vec<ServiceInfo> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .values()
            .map(|entry| entry.info())
            .collect()
    }

    /// 模块提供的服务快照
    pub fn services_of(&self, module_id: ModuleId) -> Vec<ServiceInfo> {
        self.all_services()
            .into_iter()
            .filter(|info| info.owner == module_id)
            .collect()
    }

    /// 已注册的服务数量
    pub fn service_count(&self) -> usize {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .len()
    }

    /// 活跃追踪器数量
    pub fn tracker_count(&self) -> usize {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .trackers
            .len()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_count())
            .field("trackers", &self.tracker_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EventBusConfig;
    use crate::core::fault::{FaultPhase, MemoryFaultSink};
    use crate::event::AllowAll;
    use crate::module::{ModuleDescriptor, ModuleState};
    use serde_json::json;
    use std::sync::Mutex;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_string()
        }
    }

    struct Fixture {
        registry: ServiceRegistry,
        bus: EventBus,
        sink: Arc<MemoryFaultSink>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemoryFaultSink::new());
        let bus = EventBus::new(EventBusConfig::single_threaded(), Arc::new(AllowAll), sink.clone())
            .unwrap();
        Fixture {
            registry: ServiceRegistry::new(bus.clone(), sink.clone()),
            bus,
            sink,
        }
    }

    fn active_module(id: ModuleId) -> Module {
        let descriptor = ModuleDescriptor::builder(format!("module{}", id))
            .version("1.0.0")
            .build()
            .unwrap();
        let module = Module::from_descriptor(id, descriptor);
        module.mark_active();
        module
    }

    fn greeter(text: &'static str) -> Arc<dyn Greeter> {
        Arc::new(Fixed(text))
    }

    fn ranked(ranking: i64) -> Properties {
        let mut properties = Properties::new();
        properties.insert(property_keys::SERVICE_RANKING.to_string(), json!(ranking));
        properties
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let f = fixture();
        let module = active_module(1);

        let registration = f
            .registry
            .register_service(&module, greeter("hi"), Properties::new())
            .unwrap();
        assert_eq!(registration.owner(), 1);

        let service = f.registry.get_service::<dyn Greeter>().unwrap();
        assert_eq!(service.greet(), "hi");

        let references = f.registry.get_services::<dyn Greeter>();
        assert_eq!(references.len(), 1);
        let reference = &references[0];
        assert_eq!(reference.property(property_keys::SERVICE_ID), Some(&json!(registration.id())));
        assert_eq!(reference.property(property_keys::MODULE_ID), Some(&json!(1)));
        assert!(reference
            .property(property_keys::OBJECT_CLASS)
            .and_then(Value::as_str)
            .map_or(false, |name| name.contains("Greeter")));

        assert!(f.registry.get_service::<String>().is_none());
    }

    #[tokio::test]
    async fn test_register_requires_active_module() {
        let f = fixture();
        let module = active_module(1);
        module.set_state(ModuleState::Stopped);

        let err = f
            .registry
            .register_service(&module, greeter("hi"), Properties::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { module_id: 1, .. }));

        module.set_state(ModuleState::Starting);
        assert!(f
            .registry
            .register_service(&module, greeter("hi"), Properties::new())
            .is_ok());
    }

    #[tokio::test]
    async fn test_ranking_then_registration_order() {
        let f = fixture();
        let module = active_module(1);

        f.registry.register_service(&module, greeter("low"), ranked(-5)).unwrap();
        f.registry.register_service(&module, greeter("first"), Properties::new()).unwrap();
        f.registry.register_service(&module, greeter("high"), ranked(10)).unwrap();
        f.registry.register_service(&module, greeter("second"), Properties::new()).unwrap();

        let order: Vec<String> = f
            .registry
            .get_services::<dyn Greeter>()
            .iter()
            .filter_map(|r| r.service())
            .map(|s| s.greet())
            .collect();
        assert_eq!(order, vec!["high", "first", "second", "low"]);
        assert_eq!(f.registry.get_service::<dyn Greeter>().unwrap().greet(), "high");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let f = fixture();
        let module = active_module(1);
        let registration = f
            .registry
            .register_service(&module, greeter("hi"), Properties::new())
            .unwrap();

        assert!(f.registry.unregister_service(&registration));
        assert!(!f.registry.unregister_service(&registration));
        assert!(!registration.unregister());
        assert_eq!(f.registry.service_count(), 0);
    }

    #[tokio::test]
    async fn test_filtered_lookup() {
        let f = fixture();
        let module = active_module(1);
        let mut properties = Properties::new();
        properties.insert("lang".to_string(), json!("en"));
        f.registry.register_service(&module, greeter("hello"), properties).unwrap();
        f.registry.register_service(&module, greeter("hallo"), Properties::new()).unwrap();

        let english = f.registry.get_services_filtered::<dyn Greeter>("(lang=en)").unwrap();
        assert_eq!(english.len(), 1);
        assert_eq!(english[0].service().unwrap().greet(), "hello");

        assert!(f.registry.get_services_filtered::<dyn Greeter>("(lang=").is_err());
    }

    #[tokio::test]
    async fn test_tracker_replays_and_follows_changes() {
        let f = fixture();
        let provider = active_module(1);
        let consumer = active_module(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let existing = f
            .registry
            .register_service(&provider, greeter("existing"), Properties::new())
            .unwrap();

        let added = log.clone();
        let removed = log.clone();
        let tracker = f.registry.track::<dyn Greeter, _, _>(
            consumer.identity(),
            move |r| added.lock().unwrap().push(format!("+{}", r.id())),
            move |r| removed.lock().unwrap().push(format!("-{}", r.id())),
        );
        assert_eq!(tracker.len(), 1);

        let later = f
            .registry
            .register_service(&provider, greeter("later"), Properties::new())
            .unwrap();
        assert_eq!(tracker.len(), 2);

        existing.unregister();
        assert_eq!(tracker.service().unwrap().greet(), "later");

        let expected = vec![
            format!("+{}", existing.id()),
            format!("+{}", later.id()),
            format!("-{}", existing.id()),
        ];
        assert_eq!(*log.lock().unwrap(), expected);

        tracker.close();
        assert!(tracker.is_closed());
        later.unregister();
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(f.registry.tracker_count(), 0);
    }

    #[tokio::test]
    async fn test_tracker_callback_panic_is_reported() {
        let f = fixture();
        let provider = active_module(1);
        let consumer = active_module(2);

        let _tracker = f.registry.track::<dyn Greeter, _, _>(
            consumer.identity(),
            |_| panic!("tracker exploded"),
            |_| {},
        );
        f.registry
            .register_service(&provider, greeter("hi"), Properties::new())
            .unwrap();

        let faults = f.sink.records();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].module_id, 2);
        assert_eq!(faults[0].phase, FaultPhase::ServiceCallback);
        assert!(faults[0].cause.contains("tracker exploded"));
    }

    #[tokio::test]
    async fn test_tracker_callback_may_register_services() {
        let f = fixture();
        let provider = active_module(1);
        let consumer = active_module(2);
        let consumer_identity = consumer.identity().clone();
        let registry = f.registry.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _tracker = f.registry.track::<dyn Greeter, _, _>(
            &consumer_identity,
            move |r| {
                let text = r.service().map(|s| s.greet()).unwrap_or_default();
                seen_clone.lock().unwrap().push(text.clone());
                if text == "first" {
                    registry
                        .register_service(&consumer, greeter("echo"), Properties::new())
                        .unwrap();
                }
            },
            |_| {},
        );
        f.registry
            .register_service(&provider, greeter("first"), Properties::new())
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first", "echo"]);
    }

    #[tokio::test]
    async fn test_unregister_module() {
        let f = fixture();
        let provider = active_module(1);
        let consumer = active_module(2);
        f.registry.register_service(&provider, greeter("a"), Properties::new()).unwrap();
        f.registry.register_service(&provider, greeter("b"), Properties::new()).unwrap();
        f.registry.register_service(&consumer, greeter("c"), Properties::new()).unwrap();

        let removed = Arc::new(Mutex::new(0));
        let removed_clone = removed.clone();
        let _tracker = f.registry.track::<dyn Greeter, _, _>(
            consumer.identity(),
            |_| {},
            move |_| *removed_clone.lock().unwrap() += 1,
        );

        assert_eq!(f.registry.unregister_module(1), 2);
        assert_eq!(*removed.lock().unwrap(), 2);
        assert_eq!(f.registry.services_of(2).len(), 1);

        assert_eq!(f.registry.unregister_module(2), 1);
        assert_eq!(f.registry.tracker_count(), 0);
    }

    #[tokio::test]
    async fn test_service_events_published() {
        let f = fixture();
        let module = active_module(1);
        let topics = Arc::new(Mutex::new(Vec::new()));
        let topics_clone = topics.clone();
        f.bus
            .subscribe(
                module.identity().clone(),
                &["tendril/service/*"],
                None,
                move |event| {
                    topics_clone.lock().unwrap().push(event.topic().to_string());
                    Ok(())
                },
            )
            .unwrap();

        let registration = f
            .registry
            .register_service(&module, greeter("hi"), Properties::new())
            .unwrap();
        registration.unregister();
        f.bus.close().await;

        assert_eq!(
            *topics.lock().unwrap(),
            vec![system_events::SERVICE_REGISTERED, system_events::SERVICE_UNREGISTERING]
        );
    }

    #[tokio::test]
    async fn test_clear_notifies_remaining_trackers() {
        let f = fixture();
        let module = active_module(1);
        f.registry.register_service(&module, greeter("a"), Properties::new()).unwrap();

        let removed = Arc::new(Mutex::new(0));
        let removed_clone = removed.clone();
        let tracker = f.registry.track::<dyn Greeter, _, _>(
            module.identity(),
            |_| {},
            move |_| *removed_clone.lock().unwrap() += 1,
        );

        f.registry.clear();
        assert_eq!(*removed.lock().unwrap(), 1);
        assert!(tracker.is_closed());
        assert_eq!(f.registry.service_count(), 0);
        assert!(f.registry.all_services().is_empty());
    }
}
