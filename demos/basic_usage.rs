//! 基本使用示例
//!
//! 本示例展示了 tendril 运行时的基本使用方法，包括：
//!
//! - 创建运行时并初始化日志
//! - 安装与启动提供者、使用者模块
//! - 通过服务追踪器感知服务变化
//! - 发布与订阅带过滤条件的事件
//! - 优雅关闭
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tendril_core::{
    Activator, Event, LoggerConfig, Logger, ModuleContext, ModuleDescriptor, Properties, Runtime,
    RuntimeConfig, ServiceTracker,
};

/// 示例服务契约
trait Greeter: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct ChineseGreeter;

impl Greeter for ChineseGreeter {
    fn greet(&self, name: &str) -> String {
        format!("你好，{}！", name)
    }
}

/// 提供者：启动时注册 Greeter 服务
struct GreeterProvider;

#[async_trait]
impl Activator for GreeterProvider {
    async fn start(&self, context: &ModuleContext) -> anyhow::Result<()> {
        let greeter: Arc<dyn Greeter> = Arc::new(ChineseGreeter);
        let mut properties = Properties::new();
        properties.insert("language".to_string(), "zh".into());
        context.register_service(greeter, properties)?;
        println!("   [provider] Greeter 服务已注册");
        Ok(())
    }

    async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
        println!("   [provider] 停止");
        Ok(())
    }
}

/// 使用者：追踪 Greeter 服务并订阅订单事件
#[derive(Default)]
struct GreeterConsumer {
    tracker: Mutex<Option<ServiceTracker<dyn Greeter>>>,
}

#[async_trait]
impl Activator for GreeterConsumer {
    async fn start(&self, context: &ModuleContext) -> anyhow::Result<()> {
        let tracker = context.track::<dyn Greeter, _, _>(
            |reference| {
                if let Some(greeter) = reference.service() {
                    println!("   [consumer] 服务可用: {}", greeter.greet("tendril"));
                }
            },
            |reference| println!("   [consumer] 服务 {} 不可用", reference.id()),
        );
        *self.tracker.lock().unwrap_or_else(|e| e.into_inner()) = Some(tracker);

        context.subscribe(&["org/example/order/*"], Some("(amount>=100)"), |event| {
            println!(
                "   [consumer] 大额订单 {}: {:?}",
                event.topic(),
                event.property("amount")
            );
            Ok(())
        })?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== tendril 运行时基本使用示例 ===\n");

    // -------------------------------------------------------------------------
    // 1. 创建运行时
    // -------------------------------------------------------------------------
    println!("1. 创建运行时...");
    let config = RuntimeConfig::builder()
        .worker_count(2)
        .close_timeout(Duration::from_secs(5))
        .log_level("warn")
        .build();
    let _log_guard = Logger::try_init(LoggerConfig::from_log_config(&config.logging));

    let runtime = Runtime::new(config)?;
    println!("   模块数: {}（含系统模块）\n", runtime.get_modules().len());

    // -------------------------------------------------------------------------
    // 2. 安装模块（先使用者，后提供者）
    // -------------------------------------------------------------------------
    println!("2. 安装并启动模块...");
    let consumer = runtime.install(
        ModuleDescriptor::builder("org.example.consumer")
            .version("1.0.0")
            .activator(Arc::new(GreeterConsumer::default()))
            .build()?,
    )?;
    let provider = runtime.install(
        ModuleDescriptor::builder("org.example.provider")
            .version("1.2.0")
            .activator(Arc::new(GreeterProvider))
            .build()?,
    )?;

    let faults = runtime.start_all().await?;
    println!("   启动完成，故障数: {}\n", faults.len());

    // -------------------------------------------------------------------------
    // 3. 发布事件
    // -------------------------------------------------------------------------
    println!("3. 发布订单事件...");
    for amount in [20, 150, 999] {
        runtime.event_bus().publish(
            Event::builder("org/example/order/created")
                .property("amount", amount)
                .build(),
        )?;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!();

    // -------------------------------------------------------------------------
    // 4. 查看运行时状态
    // -------------------------------------------------------------------------
    println!("4. 运行时状态:");
    for info in runtime.get_modules() {
        println!("   - [{}] {} {}", info.id(), info.symbolic_name(), info.state);
    }
    for service in runtime.get_services() {
        println!("   - 服务 {} ({}) 来自模块 {}", service.id, service.contract, service.owner);
    }
    println!();

    // -------------------------------------------------------------------------
    // 5. 停止提供者，使用者收到通知
    // -------------------------------------------------------------------------
    println!("5. 停止提供者...");
    runtime.stop(provider).await?;
    println!("   使用者状态: {}\n", runtime.get_module(consumer).map(|m| m.state().to_string()).unwrap_or_default());

    // -------------------------------------------------------------------------
    // 6. 关闭
    // -------------------------------------------------------------------------
    println!("6. 关闭运行时...");
    let report = runtime.shutdown().await;
    println!(
        "   ✅ 已关闭，故障 {} 个，丢弃事件 {} 个",
        report.faults.len(),
        report.dropped_events
    );
    println!("   事件统计: {:?}", runtime.event_bus().stats());

    Ok(())
}
