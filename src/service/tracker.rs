//! 服务追踪器
//!
//! 追踪器创建时先回放当前已注册的服务，然后接收后续变化。
//! 同一追踪器的回调严格按变化发生的顺序执行：
//! 变化先进入队列，由当前持有队列的线程依次处理，回调执行期间不持有任何锁，
//! 因此回调中可以再注册或注销服务。

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::reference::{lookup_order, ContractType, ServiceEntry, ServiceId, ServiceReference};
use super::registry::RegistryInner;
use crate::core::fault::{panic_message, FaultPhase, FaultRecord, FaultSink};
use crate::module::ModuleIdentity;

pub(crate) type TrackerCallback = Box<dyn Fn(&Arc<ServiceEntry>) + Send + Sync>;

enum Change {
    Available(Arc<ServiceEntry>),
    Unavailable(Arc<ServiceEntry>),
}

#[derive(Default)]
struct TrackerState {
    tracked: BTreeMap<ServiceId, Arc<ServiceEntry>>,
    /// “不可用”先于“可用”到达的服务，等待对应的迟到通知后移除
    withdrawn: HashSet<ServiceId>,
    pending: VecDeque<Change>,
    draining: bool,
    closed: bool,
}

/// 注册表持有的类型擦除的追踪器
pub(crate) struct TrackerShared {
    pub(crate) id: u64,
    pub(crate) owner: ModuleIdentity,
    pub(crate) contract: ContractType,
    on_available: TrackerCallback,
    on_unavailable: TrackerCallback,
    fault_sink: Arc<dyn FaultSink>,
    state: Mutex<TrackerState>,
}

impl TrackerShared {
    pub(crate) fn new(
        id: u64,
        owner: ModuleIdentity,
        contract: ContractType,
        on_available: TrackerCallback,
        on_unavailable: TrackerCallback,
        fault_sink: Arc<dyn FaultSink>,
    ) -> Self {
        Self {
            id,
            owner,
            contract,
            on_available,
            on_unavailable,
            fault_sink,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn service_added(&self, entry: Arc<ServiceEntry>) {
        self.offer(Change::Available(entry));
    }

    pub(crate) fn service_removed(&self, entry: Arc<ServiceEntry>) {
        self.offer(Change::Unavailable(entry));
    }

    fn offer(&self, change: Change) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            match &change {
                // 每个服务对同一追踪器至多各有一次“可用”与“不可用”通知
                Change::Available(entry) => {
                    if state.withdrawn.remove(&entry.id) || state.tracked.contains_key(&entry.id) {
                        return;
                    }
                    state.tracked.insert(entry.id, entry.clone());
                }
                Change::Unavailable(entry) => {
                    if state.tracked.remove(&entry.id).is_none() {
                        state.withdrawn.insert(entry.id);
                        return;
                    }
                }
            }
            state.pending.push_back(change);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        loop {
            let change = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let (callback, entry) = match &change {
                Change::Available(entry) => (&self.on_available, entry),
                Change::Unavailable(entry) => (&self.on_unavailable, entry),
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(entry))) {
                self.fault_sink.report(&FaultRecord::new(
                    self.owner.id,
                    self.owner.symbolic_name.clone(),
                    FaultPhase::ServiceCallback,
                    format!(
                        "tracker {} ({}), service {}: {}",
                        self.id,
                        self.contract,
                        entry.id,
                        panic_message(payload.as_ref())
                    ),
                ));
            }
        }
    }

    /// 关闭后不再接收任何通知，尚未执行的回调被丢弃
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.pending.clear();
        state.tracked.clear();
        state.withdrawn.clear();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn tracked_entries(&self) -> Vec<Arc<ServiceEntry>> {
        let mut entries: Vec<_> = self.lock().tracked.values().cloned().collect();
        entries.sort_by(|a, b| lookup_order(a, b));
        entries
    }
}

/// 类型化的服务追踪器句柄
///
/// 追踪器归创建它的模块所有，模块停止时自动关闭。
pub struct ServiceTracker<T: ?Sized> {
    shared: Arc<TrackerShared>,
    registry: Weak<RegistryInner>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceTracker<T> {
    pub(crate) fn new(shared: Arc<TrackerShared>, registry: Weak<RegistryInner>) -> Self {
        Self {
            shared,
            registry,
            _marker: PhantomData,
        }
    }

    /// 追踪器 ID
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// 当前追踪的服务，按查找顺序排列
    pub fn tracked(&self) -> Vec<ServiceReference<T>> {
        self.shared
            .tracked_entries()
            .into_iter()
            .map(ServiceReference::new)
            .collect()
    }

    /// 当前最优的服务实例
    pub fn service(&self) -> Option<Arc<T>> {
        self.shared
            .tracked_entries()
            .first()
            .and_then(|entry| entry.downcast::<T>())
    }

    /// 当前追踪的服务数量
    pub fn len(&self) -> usize {
        self.shared.lock().tracked.len()
    }

    /// 是否没有追踪任何服务
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// 关闭追踪器并从注册表移除，重复调用无副作用
    pub fn close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_tracker(self.shared.id);
        }
        self.shared.close();
    }
}

impl<T: ?Sized> std::fmt::Debug for ServiceTracker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTracker")
            .field("id", &self.shared.id)
            .field("contract", &self.shared.contract)
            .field("owner", &self.shared.owner.id)
            .finish()
    }
}
