// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::settings::RenderSettings;
use crate::engines::traits::{RenderError, RenderOutput, Renderer};

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// Chromium渲染器
///
/// 基于chromiumoxide的无头浏览器渲染，首次使用时启动（或连接远程）浏览器，
/// 之后所有渲染共享同一个浏览器实例
pub struct ChromiumRenderer {
    settings: RenderSettings,
    session: RwLock<Option<BrowserSession>>,
    closed: AtomicBool,
}

impl ChromiumRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            session: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    async fn launch(&self) -> Result<BrowserSession, RenderError> {
        let (browser, mut handler) = if let Some(url) = &self.settings.remote_debugging_url {
            info!("Connecting to remote Chrome instance at: {}", url);
            Browser::connect(url)
                .await
                .map_err(|e| RenderError::Launch(format!("failed to connect to remote Chrome: {}", e)))?
        } else {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(self.timeout())
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage");
            for arg in &self.settings.chrome_args {
                builder = builder.arg(arg.as_str());
            }
            let config = builder.build().map_err(RenderError::Launch)?;
            Browser::launch(config)
                .await
                .map_err(|e| RenderError::Launch(e.to_string()))?
        };

        // Spawn a handler to process browser events
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession { browser, handler })
    }

    /// 确保浏览器已启动
    async fn ensure_session(&self) -> Result<(), RenderError> {
        if self.session.read().await.is_some() {
            return Ok(());
        }
        let mut session = self.session.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::Closed);
        }
        if session.is_none() {
            *session = Some(self.launch().await?);
        }
        Ok(())
    }

    async fn render_page(&self, url: &str) -> Result<RenderOutput, RenderError> {
        self.ensure_session().await?;
        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return Err(RenderError::Closed);
        };

        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let outcome = async {
            page.goto(url)
                .await
                .map_err(|e| RenderError::Navigation(e.to_string()))?;

            if self.settings.idle_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.settings.idle_secs)).await;
            }

            let html = page
                .content()
                .await
                .map_err(|e| RenderError::Capture(e.to_string()))?;

            let screenshot = if self.settings.screenshot {
                let params = ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build();
                Some(
                    page.screenshot(params)
                        .await
                        .map_err(|e| RenderError::Capture(e.to_string()))?,
                )
            } else {
                None
            };

            Ok(RenderOutput { html, screenshot })
        }
        .await;

        if let Err(e) = page.close().await {
            debug!(url, "Failed to close page: {}", e);
        }
        outcome
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    /// 渲染页面
    ///
    /// # 参数
    ///
    /// * `url` - 页面地址
    ///
    /// # 返回值
    ///
    /// * `Ok(RenderOutput)` - 渲染后的DOM和可选截图
    /// * `Err(RenderError)` - 浏览器不可用、导航失败或超时
    async fn render(&self, url: &str) -> Result<RenderOutput, RenderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RenderError::Closed);
        }
        // Wrap the entire operation in a timeout
        tokio::time::timeout(self.timeout(), self.render_page(url))
            .await
            .map_err(|_| RenderError::Timeout)?
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let session = self.session.write().await.take();
        if let Some(mut session) = session {
            if let Err(e) = session.browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
            session.handler.abort();
            info!("Headless browser closed");
        }
    }
}
