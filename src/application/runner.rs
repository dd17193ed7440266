// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::shutdown::ShutdownCoordinator;
use crate::config::settings::Settings;
use crate::domain::models::target::Target;
use crate::domain::services::dedup_service::DedupEngine;
use crate::domain::services::filter_service::ResultFilter;
use crate::domain::services::probe_pipeline::ProbePipeline;
use crate::engines::chromium_renderer::ChromiumRenderer;
use crate::engines::circuit_breaker::HostErrorBreaker;
use crate::engines::rate_limiter::RateLimiter;
use crate::engines::reqwest_engine::ReqwestEngine;
use crate::engines::resolvers::{HickoryDnsResolver, StaticCdnResolver};
use crate::engines::tech_detector::RuleTechDetector;
use crate::engines::tls_prober::ReqwestTlsProber;
use crate::engines::traits::{HttpClient, Renderer};
use crate::infrastructure::observability::metrics::describe_metrics;
use crate::infrastructure::output::{drain, OutputEvent, ResultSink};
use crate::infrastructure::resume_store::ResumeStore;
use crate::queue::target_source::TargetSource;
use crate::utils::errors::{OutputError, RunnerError};
use crate::workers::manager::{ScanReport, ScanScheduler};
use crate::workers::probe_worker::WorkerContext;

type CloseHook = Box<dyn FnOnce() + Send>;

/// 扫描运行器
///
/// 负责完整的生命周期：由配置构建各组件、运行调度器、把结果交给输出，
/// 结束或中断时依次执行关闭钩子（限速器停止、渲染器关闭、熔断器清理、断点写盘、on_close回调）。
pub struct Runner {
    settings: Settings,
    shutdown: Arc<ShutdownCoordinator>,
    http: Option<Arc<dyn HttpClient>>,
    renderer: Option<Arc<dyn Renderer>>,
    on_close: Option<CloseHook>,
}

impl Runner {
    /// 创建运行器
    ///
    /// # 返回值
    ///
    /// * `Ok(Runner)` - 配置校验通过
    /// * `Err(RunnerError::Configuration)` - 配置无效
    pub fn new(settings: Settings) -> Result<Self, RunnerError> {
        settings.validate()?;
        let shutdown = Arc::new(ShutdownCoordinator::from_settings(&settings.shutdown));
        Ok(Self {
            settings,
            shutdown,
            http: None,
            renderer: None,
            on_close: None,
        })
    }

    /// 替换默认的reqwest传输
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// 替换默认的chromium渲染器
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// 所有其他关闭钩子执行完后调用
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn shutdown(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    /// 从配置的输入（内联目标、文件或stdin）运行扫描
    pub async fn run_from_settings(
        self,
        sink: Box<dyn ResultSink>,
    ) -> Result<ScanReport, RunnerError> {
        let source = TargetSource::open(&self.settings.input, &self.settings.probe).await?;
        self.run(source.into_stream(), sink).await
    }

    /// 运行扫描直到目标耗尽或被中断
    ///
    /// 中断时返回的报告 `interrupted` 为true，已取消的目标不会写入断点
    pub async fn run<S>(
        mut self,
        targets: S,
        mut sink: Box<dyn ResultSink>,
    ) -> Result<ScanReport, RunnerError>
    where
        S: Stream<Item = Target> + Send + 'static,
    {
        describe_metrics();
        let on_close = self.on_close.take();
        let settings = &self.settings;
        let cancel = self.shutdown.token();

        let resume = if settings.resume.enabled {
            let store = ResumeStore::load(
                &settings.resume.path,
                &settings.fingerprint(),
                settings.resume.required,
            )
            .await?;
            Some(Arc::new(store))
        } else {
            None
        };

        let limiter = Arc::new(RateLimiter::from_settings(&settings.rate_limit));
        let breaker = Arc::new(HostErrorBreaker::from_settings(&settings.breaker));
        let dedup = Arc::new(DedupEngine::from_settings(&settings.dedup));
        let filter = Arc::new(ResultFilter::from_settings(&settings.filter)?);
        let http = match &self.http {
            Some(http) => http.clone(),
            None => Arc::new(
                ReqwestEngine::new(&settings.probe)
                    .map_err(|e| RunnerError::Init(format!("http client: {}", e)))?,
            ),
        };
        let renderer: Option<Arc<dyn Renderer>> = match (&self.renderer, settings.render.enabled()) {
            (_, false) => None,
            (Some(renderer), true) => Some(renderer.clone()),
            (None, true) => Some(Arc::new(ChromiumRenderer::new(settings.render.clone()))),
        };

        let mut pipeline =
            ProbePipeline::new(settings, http, limiter.clone(), breaker.clone(), filter)?;
        if settings.probe.tls_probe {
            pipeline = pipeline.with_tls_prober(Arc::new(ReqwestTlsProber));
        }
        if let Some(renderer) = &renderer {
            pipeline = pipeline.with_renderer(renderer.clone());
        }
        if settings.probe.tech_detect {
            pipeline = pipeline.with_tech_detector(Arc::new(RuleTechDetector::new()));
        }
        if settings.probe.cdn_detect || settings.probe.exclude_cdn {
            pipeline = pipeline.with_cdn_resolver(Arc::new(StaticCdnResolver::new()));
        }
        if settings.probe.resolve_dns {
            pipeline = pipeline.with_dns_resolver(Arc::new(HickoryDnsResolver::new()));
        }

        let flusher_stop = cancel.child_token();
        let flusher = resume.clone().map(|store| {
            store.spawn_flusher(
                Duration::from_secs(settings.resume.flush_interval_secs),
                flusher_stop.clone(),
            )
        });

        self.register_hooks(
            on_close,
            limiter,
            renderer,
            breaker.clone(),
            resume.clone(),
            flusher_stop,
            flusher,
        );

        let (results_tx, results_rx) = mpsc::channel::<OutputEvent>(settings.probe.threads * 4);
        let completed = resume.clone();
        let writer = tokio::spawn(async move {
            drain(results_rx, sink.as_mut(), completed.as_deref()).await
        });

        let context = WorkerContext {
            pipeline: Arc::new(pipeline),
            breaker,
            dedup: dedup.clone(),
            resume,
        };
        let mut handle = ScanScheduler::new(context, &settings.input, settings.probe.threads)
            .start(targets, results_tx, cancel.clone());

        let finished = tokio::select! {
            report = handle.wait() => Some(report),
            _ = cancel.cancelled() => None,
        };
        let mut report = match finished {
            Some(report) => report,
            None => {
                info!(
                    grace_secs = self.shutdown.grace_period().as_secs(),
                    "Waiting for in-flight probes"
                );
                handle.close(self.shutdown.grace_period()).await
            }
        };

        let written = match writer.await {
            Ok(written) => written,
            Err(e) => Err(OutputError::Io(std::io::Error::other(e.to_string()))),
        };

        report.clusters = dedup.clusters().len() as u64;
        report.interrupted = self.shutdown.is_interrupted();
        self.shutdown.run_hooks().await;

        info!(
            targets = report.targets,
            probed = report.probed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_host_errors = report.skipped_host_errors,
            skipped_resume = report.skipped_resume,
            suppressed = report.suppressed,
            clusters = report.clusters,
            interrupted = report.interrupted,
            elapsed_ms = report.elapsed_ms,
            "Scan finished"
        );

        written?;
        Ok(report)
    }

    /// 关闭钩子，按注册顺序执行
    #[allow(clippy::too_many_arguments)]
    fn register_hooks(
        &self,
        on_close: Option<CloseHook>,
        limiter: Arc<RateLimiter>,
        renderer: Option<Arc<dyn Renderer>>,
        breaker: Arc<HostErrorBreaker>,
        resume: Option<Arc<ResumeStore>>,
        flusher_stop: CancellationToken,
        flusher: Option<JoinHandle<()>>,
    ) {
        self.shutdown.add_hook("rate_limiter", move || async move {
            limiter.stop();
        });
        if let Some(renderer) = renderer {
            self.shutdown.add_hook("renderer", move || async move {
                renderer.close().await;
            });
        }
        self.shutdown.add_hook("host_breaker", move || async move {
            breaker.purge();
        });
        if let Some(store) = resume {
            self.shutdown.add_hook("resume_flush", move || async move {
                flusher_stop.cancel();
                if let Some(flusher) = flusher {
                    let _ = flusher.await;
                }
                match store.flush().await {
                    Ok(()) => info!(
                        path = %store.path().display(),
                        completed = store.completed_count(),
                        "Resume checkpoint saved"
                    ),
                    Err(e) => warn!(error = %e, "Failed to save resume checkpoint"),
                }
            });
        }
        if let Some(on_close) = on_close {
            self.shutdown.add_hook("on_close", move || async move {
                on_close();
            });
        }
    }
}
