// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::settings::ShutdownSettings;

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// 关闭协调器
///
/// 持有进程级取消令牌，只注册一次中断信号处理。关闭钩子按注册顺序执行且只执行一次。
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace_period: Duration,
    signal_installed: AtomicBool,
    interrupted: Arc<AtomicBool>,
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
            signal_installed: AtomicBool::new(false),
            interrupted: Arc::new(AtomicBool::new(false)),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &ShutdownSettings) -> Self {
        Self::new(Duration::from_secs(settings.grace_period_secs))
    }

    /// 进程级取消令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// 注册Ctrl-C处理
    ///
    /// 重复调用不会再次注册，返回值表示本次调用是否完成了注册
    pub fn install_signal_handler(&self) -> bool {
        if self.signal_installed.swap(true, Ordering::AcqRel) {
            debug!("Signal handler already installed");
            return false;
        }

        let token = self.token.clone();
        let interrupted = self.interrupted.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        warn!("Interrupt received, shutting down gracefully");
                        interrupted.store(true, Ordering::Release);
                        token.cancel();
                    }
                    Err(e) => error!("Unable to listen for shutdown signal: {}", e),
                },
            }
        });
        true
    }

    /// 以中断方式触发关闭，效果与收到信号相同
    pub fn trigger(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// 注册关闭钩子
    pub fn add_hook<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ShutdownHook = Box::new(move || Box::pin(hook()));
        self.hooks.lock().push((name.into(), hook));
    }

    /// 按注册顺序执行所有关闭钩子
    pub async fn run_hooks(&self) {
        let hooks: Vec<(String, ShutdownHook)> = std::mem::take(&mut *self.hooks.lock());
        for (name, hook) in hooks {
            debug!(hook = %name, "Running shutdown hook");
            hook().await;
        }
        info!("Shutdown complete");
    }
}
