//! 事件总线
//!
//! 模块间的异步发布-订阅机制。
//!
//! # 主要功能
//!
//! - **异步发布**: `publish` 只把事件放入无界队列，立即返回
//! - **工作池分发**: 固定数量的 tokio 任务从队列取事件，处理器在阻塞线程池上执行
//! - **同步发布**: `publish_sync` 在调用线程上执行处理器并返回分发报告
//! - **权限与过滤**: 每个订阅者依次经过主题、权限、过滤器三道检查
//! - **订阅者隔离**: 处理器返回错误或 panic 都被记为故障，不影响其它订阅者
//! - **有界关闭**: `close` 等待在途事件处理完毕，超时后丢弃尚未开始的事件
//!
//! # 使用示例
//!
//! ```ignore
//! use tendril_core::event::{Event, EventBus};
//!
//! let bus = runtime.event_bus();
//! let id = bus.subscribe(owner, &["org/test/*"], Some("(k=v)"), |event| {
//!     println!("收到事件: {}", event.topic());
//!     Ok(())
//! })?;
//!
//! bus.publish(Event::builder("org/test/X").property("k", "v").build())?;
//! bus.unsubscribe(&id);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::event::{matches_topic, validate_topic, validate_topic_pattern, Event};
use super::filter::Filter;
use super::permission::TopicPermission;
use crate::core::config::EventBusConfig;
use crate::core::fault::{panic_message, FaultPhase, FaultRecord, FaultSink};
use crate::module::{ModuleId, ModuleIdentity};
use crate::utils::{generate_id, CoreError, Result};

/// 事件处理器
///
/// 处理器可能在任意阻塞线程上被并发调用。
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// 订阅条目
struct Subscription {
    subscription_id: String,
    owner: ModuleIdentity,
    /// 为空表示订阅全部主题
    topics: Vec<String>,
    filter: Option<Filter>,
    handler: EventHandler,
    /// 取消订阅后置为 false，已取出的快照不再调用它
    active: AtomicBool,
}

impl Subscription {
    fn wants_topic(&self, topic: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|pattern| matches_topic(pattern, topic))
    }
}

/// 分发统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// 成功提交的事件数（含同步发布）
    pub published: u64,

    /// 处理器成功执行次数
    pub delivered: u64,

    /// 处理器失败次数（返回错误或 panic）
    pub failed: u64,

    /// 因权限被跳过的订阅者次数
    pub rejected_by_permission: u64,

    /// 关闭超时后被丢弃的排队事件数
    pub dropped: u64,
}

#[derive(Default)]
struct StatsCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    rejected_by_permission: AtomicU64,
    dropped: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_by_permission: self.rejected_by_permission.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// 单个事件的分发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 主题与过滤器都匹配、且有权限的订阅者数
    pub matched: usize,

    /// 成功执行的处理器数
    pub delivered: usize,

    /// 执行失败的处理器数
    pub failed: usize,

    /// 因权限被跳过的订阅者数
    pub rejected: usize,
}

/// 工作任务与同步发布共享的分发状态
///
/// 不持有发送端，因此总线被丢弃后工作任务能自然退出。
struct Dispatcher {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    permission: Arc<dyn TopicPermission>,
    fault_sink: Arc<dyn FaultSink>,
    stats: StatsCounters,
    cancelled: AtomicBool,
}

impl Dispatcher {
    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispatch(&self, event: &Event) -> DispatchReport {
        let topic = event.topic();
        let mut report = DispatchReport::default();

        for subscription in self.snapshot() {
            if !subscription.active.load(Ordering::Acquire) || !subscription.wants_topic(topic) {
                continue;
            }

            if !self.permission.can_subscribe(&subscription.owner, topic) {
                report.rejected += 1;
                self.stats.rejected_by_permission.fetch_add(1, Ordering::Relaxed);
                trace!(
                    subscription_id = %subscription.subscription_id,
                    topic = %topic,
                    "订阅者无权接收该主题"
                );
                continue;
            }

            if let Some(filter) = &subscription.filter {
                if !filter.matches_event(event) {
                    continue;
                }
            }

            report.matched += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event)));
            let cause = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => panic_message(payload.as_ref()),
            };

            report.failed += 1;
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            let error = CoreError::Dispatch {
                subscription_id: subscription.subscription_id.clone(),
                reason: format!("topic '{}': {}", topic, cause),
            };
            self.fault_sink.report(&FaultRecord::new(
                subscription.owner.id,
                subscription.owner.symbolic_name.clone(),
                FaultPhase::Dispatch,
                error.to_string(),
            ));
        }

        report
    }
}

struct BusShared {
    dispatcher: Arc<Dispatcher>,
    sender: Mutex<Option<UnboundedSender<Event>>>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<Event>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    config: EventBusConfig,
}

/// 事件总线
///
/// 克隆开销很小，所有克隆共享同一组订阅和工作池。
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// 创建事件总线并启动分发工作池
    ///
    /// 必须在 tokio 运行时内调用，否则返回 `CoreError::InitFailed`。
    pub fn new(
        config: EventBusConfig,
        permission: Arc<dyn TopicPermission>,
        fault_sink: Arc<dyn FaultSink>,
    ) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::InitFailed(format!("事件总线需要 tokio 运行时: {}", e)))?;

        if config.worker_count == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "event_bus.worker_count".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }

        let dispatcher = Arc::new(Dispatcher {
            subscriptions: RwLock::new(Vec::new()),
            permission,
            fault_sink,
            stats: StatsCounters::default(),
            cancelled: AtomicBool::new(false),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..config.worker_count)
            .map(|index| {
                handle.spawn(worker_loop(index, dispatcher.clone(), receiver.clone()))
            })
            .collect();

        info!(
            worker_count = config.worker_count,
            close_timeout_ms = config.close_timeout_ms,
            "创建事件总线"
        );

        Ok(Self {
            shared: Arc::new(BusShared {
                dispatcher,
                sender: Mutex::new(Some(sender)),
                receiver,
                workers: Mutex::new(workers),
                closed: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// 订阅事件
    ///
    /// * `topics` - 主题模式列表，为空表示全部主题；支持 `*` 和 `prefix/*`
    /// * `filter` - 可选的过滤表达式，语法错误时返回 `CoreError::InvalidFilter`
    ///
    /// 返回订阅 ID。
    pub fn subscribe<F>(
        &self,
        owner: ModuleIdentity,
        topics: &[&str],
        filter: Option<&str>,
        handler: F,
    ) -> Result<String>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(owner, topics, filter, Arc::new(handler))
    }

    /// 使用已装箱的处理器订阅
    pub fn subscribe_handler(
        &self,
        owner: ModuleIdentity,
        topics: &[&str],
        filter: Option<&str>,
        handler: EventHandler,
    ) -> Result<String> {
        if self.is_closed() {
            return Err(CoreError::EventBusClosed);
        }

        for topic in topics {
            validate_topic_pattern(topic)?;
        }
        let filter = filter.map(Filter::parse).transpose()?;

        let subscription = Arc::new(Subscription {
            subscription_id: generate_id(),
            owner,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            filter,
            handler,
            active: AtomicBool::new(true),
        });
        let subscription_id = subscription.subscription_id.clone();

        debug!(
            subscription_id = %subscription_id,
            module_id = subscription.owner.id,
            topics = ?subscription.topics,
            filter = ?subscription.filter.as_ref().map(Filter::as_str),
            "事件订阅成功"
        );

        self.shared
            .dispatcher
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);

        Ok(subscription_id)
    }

    /// 取消订阅，重复调用返回 `false`
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = {
            let mut subscriptions = self
                .shared
                .dispatcher
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subscriptions
                .iter()
                .position(|s| s.subscription_id == subscription_id)
                .map(|index| subscriptions.remove(index))
        };

        match removed {
            Some(subscription) => {
                subscription.active.store(false, Ordering::Release);
                debug!(subscription_id = %subscription_id, "取消订阅");
                true
            }
            None => false,
        }
    }

    /// 取消模块的全部订阅，返回取消数量
    pub fn unsubscribe_owner(&self, module_id: ModuleId) -> usize {
        let removed: Vec<Arc<Subscription>> = {
            let mut subscriptions = self
                .shared
                .dispatcher
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let (removed, kept): (Vec<Arc<Subscription>>, Vec<Arc<Subscription>>) = subscriptions
                .drain(..)
                .partition(|s| s.owner.id == module_id);
            *subscriptions = kept;
            removed
        };

        for subscription in &removed {
            subscription.active.store(false, Ordering::Release);
        }
        if !removed.is_empty() {
            debug!(module_id = module_id, removed = removed.len(), "取消模块所有订阅");
        }
        removed.len()
    }

    /// 异步发布事件
    ///
    /// 只负责入队，不等待处理器执行。总线关闭后返回 `CoreError::EventBusClosed`。
    pub fn publish(&self, event: Event) -> Result<()> {
        validate_topic(event.topic())?;

        let guard = self.shared.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(CoreError::EventBusClosed)?;

        trace!(event_id = %event.event_id(), topic = %event.topic(), "发布事件");
        sender.send(event).map_err(|_| CoreError::EventBusClosed)?;
        self.shared.dispatcher.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 同步发布事件
    ///
    /// 在调用线程上依次执行匹配的处理器，全部完成后返回分发报告。
    pub fn publish_sync(&self, event: Event) -> Result<DispatchReport> {
        validate_topic(event.topic())?;
        if self.is_closed() {
            return Err(CoreError::EventBusClosed);
        }

        self.shared.dispatcher.stats.published.fetch_add(1, Ordering::Relaxed);
        let report = self.shared.dispatcher.dispatch(&event);
        debug!(
            event_id = %event.event_id(),
            topic = %event.topic(),
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "同步事件分发完成"
        );
        Ok(report)
    }

    /// 关闭事件总线
    ///
    /// 停止接受新事件，在宽限期内等待队列排空；超时后取消工作任务，
    /// 尚未开始的事件被丢弃，正在执行的处理器不会被中断。
    /// 返回被丢弃的事件数，重复调用立即返回 0。
    pub async fn close(&self) -> u64 {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        drop(
            self.shared
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let mut workers = {
            let mut guard = self.shared.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let grace = self.shared.config.close_timeout();
        let drained =
            tokio::time::timeout(grace, futures::future::join_all(workers.iter_mut())).await;

        if drained.is_ok() {
            info!("事件总线已关闭");
            return 0;
        }

        self.shared.dispatcher.cancelled.store(true, Ordering::SeqCst);
        for worker in &workers {
            worker.abort();
        }

        let mut dropped = 0u64;
        {
            let mut receiver = self.shared.receiver.lock().await;
            while receiver.try_recv().is_ok() {
                dropped += 1;
            }
        }
        self.shared.dispatcher.stats.dropped.fetch_add(dropped, Ordering::Relaxed);

        warn!(
            grace_ms = grace.as_millis() as u64,
            dropped = dropped,
            "事件总线关闭超时，已丢弃未分发事件"
        );
        dropped
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// 当前订阅总数
    pub fn subscription_count(&self) -> usize {
        self.shared
            .dispatcher
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 模块持有的订阅 ID
    pub fn subscriptions_of(&self, module_id: ModuleId) -> Vec<String> {
        self.shared
            .dispatcher
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.owner.id == module_id)
            .map(|s| s.subscription_id.clone())
            .collect()
    }

    /// 分发统计快照
    pub fn stats(&self) -> DispatchStats {
        self.shared.dispatcher.stats.snapshot()
    }

    /// 总线配置
    pub fn config(&self) -> &EventBusConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("worker_count", &self.shared.config.worker_count)
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn worker_loop(
    index: usize,
    dispatcher: Arc<Dispatcher>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<Event>>>,
) {
    trace!(worker = index, "分发工作任务启动");
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(event) = next else {
            break;
        };

        if dispatcher.cancelled.load(Ordering::SeqCst) {
            dispatcher.stats.dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let task_dispatcher = dispatcher.clone();
        let event_id = event.event_id().to_string();
        let outcome =
            tokio::task::spawn_blocking(move || task_dispatcher.dispatch(&event)).await;
        match outcome {
            Ok(report) => trace!(
                worker = index,
                event_id = %event_id,
                delivered = report.delivered,
                failed = report.failed,
                "事件分发完成"
            ),
            Err(e) => warn!(worker = index, event_id = %event_id, error = %e, "分发任务执行失败"),
        }
    }
    trace!(worker = index, "分发工作任务退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fault::MemoryFaultSink;
    use crate::event::permission::{AllowAll, DenyTopics};
    use semver::Version;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn owner(id: ModuleId) -> ModuleIdentity {
        ModuleIdentity::new(id, format!("module{}", id), Version::new(1, 0, 0))
    }

    fn bus_with(config: EventBusConfig, permission: Arc<dyn TopicPermission>) -> (EventBus, Arc<MemoryFaultSink>) {
        let sink = Arc::new(MemoryFaultSink::new());
        let bus = EventBus::new(config, permission, sink.clone()).unwrap();
        (bus, sink)
    }

    fn bus() -> (EventBus, Arc<MemoryFaultSink>) {
        bus_with(EventBusConfig::single_threaded(), Arc::new(AllowAll))
    }

    fn counter_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_requires_tokio_runtime() {
        let result = EventBus::new(
            EventBusConfig::default(),
            Arc::new(AllowAll),
            Arc::new(MemoryFaultSink::new()),
        );
        assert!(matches!(result, Err(CoreError::InitFailed(_))));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let config = EventBusConfig {
            worker_count: 0,
            ..Default::default()
        };
        let result = EventBus::new(config, Arc::new(AllowAll), Arc::new(MemoryFaultSink::new()));
        assert!(matches!(result, Err(CoreError::InvalidConfigValue { .. })));
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (bus, _) = bus();
        let id = bus.subscribe(owner(1), &["org/test/X"], None, |_| Ok(())).unwrap();
        assert_eq!(bus.subscription_count(), 1);
        assert_eq!(bus.subscriptions_of(1), vec![id.clone()]);

        assert!(bus.unsubscribe(&id));
        assert!(!bus.unsubscribe(&id));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_subscription_arguments() {
        let (bus, _) = bus();
        let err = bus.subscribe(owner(1), &["org/test/X"], Some("(k=v"), |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFilter { .. }));

        let err = bus.subscribe(owner(1), &["org//X"], None, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTopic(_)));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_owner() {
        let (bus, _) = bus();
        bus.subscribe(owner(1), &["a"], None, |_| Ok(())).unwrap();
        bus.subscribe(owner(1), &["b"], None, |_| Ok(())).unwrap();
        bus.subscribe(owner(2), &["a"], None, |_| Ok(())).unwrap();

        assert_eq!(bus.unsubscribe_owner(1), 2);
        assert_eq!(bus.unsubscribe_owner(1), 0);
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_sync_topic_and_filter() {
        let (bus, _) = bus();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(1), &["org/test/X"], Some("k=v"), counter_handler(&counter))
            .unwrap();

        let hit = Event::builder("org/test/X").property("k", "v").build();
        let wrong_value = Event::builder("org/test/X").property("k", "w").build();
        let wrong_topic = Event::builder("org/test/Y").property("k", "v").build();

        assert_eq!(bus.publish_sync(hit).unwrap().delivered, 1);
        assert_eq!(bus.publish_sync(wrong_value).unwrap().matched, 0);
        assert_eq!(bus.publish_sync(wrong_topic).unwrap().matched, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_topics_and_wildcards() {
        let (bus, _) = bus();
        let all = Arc::new(AtomicUsize::new(0));
        let prefixed = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(1), &[], None, counter_handler(&all)).unwrap();
        bus.subscribe(owner(2), &["org/test/*"], None, counter_handler(&prefixed))
            .unwrap();

        bus.publish_sync(Event::new("org/test/X", Default::default())).unwrap();
        bus.publish_sync(Event::new("org/other/X", Default::default())).unwrap();

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(prefixed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failures_are_isolated() {
        let (bus, sink) = bus();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(1), &["t"], None, |_| anyhow::bail!("handler error"))
            .unwrap();
        bus.subscribe(owner(2), &["t"], None, |_| panic!("handler panic")).unwrap();
        bus.subscribe(owner(3), &["t"], None, counter_handler(&counter)).unwrap();

        let report = bus.publish_sync(Event::new("t", Default::default())).unwrap();
        assert_eq!(report.matched, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let faults = sink.records();
        assert_eq!(faults.len(), 2);
        assert!(faults.iter().all(|f| f.phase == FaultPhase::Dispatch));
        assert!(faults.iter().any(|f| f.module_id == 1 && f.cause.contains("handler error")));
        assert!(faults.iter().any(|f| f.module_id == 2 && f.cause.contains("handler panic")));
    }

    #[tokio::test]
    async fn test_permission_rejects_subscriber() {
        let (bus, sink) = bus_with(
            EventBusConfig::single_threaded(),
            Arc::new(DenyTopics::new(["org/secret"])),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(1), &[], None, counter_handler(&counter)).unwrap();

        let report = bus.publish_sync(Event::new("org/secret/X", Default::default())).unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.delivered, 0);

        bus.publish_sync(Event::new("org/public/X", Default::default())).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().rejected_by_permission, 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_async_publish_preserves_order_with_single_worker() {
        let (bus, _) = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(owner(1), &["seq"], None, move |event| {
            let n = event.property("n").and_then(|v| v.as_u64()).unwrap_or_default();
            seen_clone.lock().unwrap().push(n);
            Ok(())
        })
        .unwrap();

        for n in 0..50u64 {
            bus.publish(Event::builder("seq").property("n", n).build()).unwrap();
        }
        assert_eq!(bus.close().await, 0);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        let stats = bus.stats();
        assert_eq!(stats.published, 50);
        assert_eq!(stats.delivered, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_publish_with_worker_pool() {
        let config = EventBusConfig {
            worker_count: 4,
            ..Default::default()
        };
        let (bus, _) = bus_with(config, Arc::new(AllowAll));
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(1), &["pool"], None, counter_handler(&counter)).unwrap();

        for _ in 0..100 {
            bus.publish(Event::new("pool", Default::default())).unwrap();
        }
        bus.close().await;
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_publish() {
        let (bus, _) = bus();
        assert!(!bus.is_closed());
        bus.close().await;
        bus.close().await;
        assert!(bus.is_closed());

        let err = bus.publish(Event::new("t", Default::default())).unwrap_err();
        assert!(matches!(err, CoreError::EventBusClosed));
        let err = bus.publish_sync(Event::new("t", Default::default())).unwrap_err();
        assert!(matches!(err, CoreError::EventBusClosed));
        let err = bus.subscribe(owner(1), &[], None, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CoreError::EventBusClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_timeout_drops_pending_events() {
        let config = EventBusConfig {
            worker_count: 1,
            close_timeout_ms: 50,
        };
        let (bus, _) = bus_with(config, Arc::new(AllowAll));
        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = started.clone();
        bus.subscribe(owner(1), &["slow"], None, move |_| {
            started_clone.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .unwrap();

        for _ in 0..5 {
            bus.publish(Event::new("slow", Default::default())).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let dropped = bus.close().await;
        assert!(dropped >= 3, "dropped {}", dropped);
        assert!(started.load(Ordering::SeqCst) <= 2);
        assert_eq!(bus.stats().dropped, dropped);
    }

    #[tokio::test]
    async fn test_handler_may_publish_and_subscribe() {
        let (bus, _) = bus();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(owner(2), &["second"], None, counter_handler(&counter)).unwrap();

        let inner = bus.clone();
        bus.subscribe(owner(1), &["first"], None, move |_| {
            inner.publish(Event::new("second", Default::default()))?;
            Ok(())
        })
        .unwrap();

        bus.publish(Event::new("first", Default::default())).unwrap();
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        bus.close().await;
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_not_invoked() {
        let (bus, _) = bus();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(owner(1), &[], None, counter_handler(&counter)).unwrap();
        bus.unsubscribe(&id);
        bus.publish_sync(Event::new("t", Default::default())).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
