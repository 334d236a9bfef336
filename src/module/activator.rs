//! 模块激活器
//!
//! 模块可以提供一个激活器，在启动和停止时收到回调。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use super::context::ModuleContext;
use crate::core::fault::panic_message;

/// 模块激活器接口
///
/// `start` 返回错误或 panic 时模块进入 `FAILED` 状态；
/// `stop` 的错误只会被记录，模块仍然进入 `STOPPED`。
#[async_trait]
pub trait Activator: Send + Sync {
    /// 模块启动
    async fn start(&self, context: &ModuleContext) -> anyhow::Result<()>;

    /// 模块停止
    async fn stop(&self, _context: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 激活器句柄
///
/// 包装模块提供的激活器，并记录各钩子的调用次数。
pub struct ActivatorHandle {
    activator: Arc<dyn Activator>,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
}

impl ActivatorHandle {
    pub(crate) fn new(activator: Arc<dyn Activator>) -> Self {
        Self {
            activator,
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
        }
    }

    /// 模块提供的激活器
    pub fn activator(&self) -> &Arc<dyn Activator> {
        &self.activator
    }

    /// `start` 被调用的次数
    pub fn start_count(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// `stop` 被调用的次数
    pub fn stop_count(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// 调用 `start`，错误与 panic 都转换为原因字符串
    pub(crate) async fn start(&self, context: &ModuleContext) -> Result<(), String> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Self::guard(self.activator.start(context)).await
    }

    pub(crate) async fn stop(&self, context: &ModuleContext) -> Result<(), String> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Self::guard(self.activator.stop(context)).await
    }

    async fn guard<F>(hook: F) -> Result<(), String>
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        match AssertUnwindSafe(hook).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

impl std::fmt::Debug for ActivatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatorHandle")
            .field("start_calls", &self.start_count())
            .field("stop_calls", &self.stop_count())
            .finish()
    }
}
