// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::probe_result::ProbeResult;
use crate::domain::models::target::Target;
use crate::domain::services::dedup_service::DedupEngine;
use crate::domain::services::probe_pipeline::ProbePipeline;
use crate::engines::circuit_breaker::HostErrorBreaker;
use crate::infrastructure::output::OutputEvent;
use crate::infrastructure::resume_store::ResumeStore;

/// 工作者共享的扫描组件
#[derive(Clone)]
pub struct WorkerContext {
    pub pipeline: Arc<ProbePipeline>,
    pub breaker: Arc<HostErrorBreaker>,
    pub dedup: Arc<DedupEngine>,
    pub resume: Option<Arc<ResumeStore>>,
}

/// 扫描计数
#[derive(Debug, Default)]
pub struct ScanStats {
    pub targets: AtomicU64,
    pub skipped_resume: AtomicU64,
    pub skipped_duplicate: AtomicU64,
    pub skipped_host_errors: AtomicU64,
    pub probed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub suppressed: AtomicU64,
    pub emitted: AtomicU64,
    pub cancelled: AtomicU64,
    in_flight: AtomicU64,
}

impl ScanStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

/// 每个主机一把异步锁，同一主机的探测串行执行
///
/// 没有持有者时条目被移除，表的大小与正在探测的主机数成正比
#[derive(Default)]
pub struct HostLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HostLocks {
    fn handle(&self, host: &str) -> Arc<Mutex<()>> {
        self.locks.entry(host.to_string()).or_default().clone()
    }

    fn release(&self, host: &str, handle: Arc<Mutex<()>>) {
        drop(handle);
        // the shard lock makes the count check atomic with concurrent `handle` calls
        self.locks
            .remove_if(host, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// 探测工作者
pub struct ProbeWorker {
    id: usize,
    context: WorkerContext,
    host_locks: Arc<HostLocks>,
    results: mpsc::Sender<OutputEvent>,
    stats: Arc<ScanStats>,
}

impl ProbeWorker {
    pub fn new(
        id: usize,
        context: WorkerContext,
        host_locks: Arc<HostLocks>,
        results: mpsc::Sender<OutputEvent>,
        stats: Arc<ScanStats>,
    ) -> Self {
        Self {
            id,
            context,
            host_locks,
            results,
            stats,
        }
    }

    /// 从共享队列取目标直到队列关闭或停止接收新任务
    ///
    /// # 参数
    ///
    /// * `queue` - 共享的目标队列
    /// * `intake` - 触发后不再取新目标
    /// * `cancel` - 触发后取消正在进行的探测
    pub async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<Target>>>,
        intake: CancellationToken,
        cancel: CancellationToken,
    ) {
        debug!(worker = self.id, "Probe worker started");
        loop {
            let next = {
                let mut receiver = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = intake.cancelled() => None,
                    target = receiver.recv() => target,
                }
            };
            let Some(target) = next else {
                break;
            };
            self.process(target, &intake, &cancel).await;
        }
        debug!(worker = self.id, "Probe worker stopped");
    }

    /// 处理单个目标
    ///
    /// 结果流关闭时触发 `intake`，扫描不再领取新目标
    pub async fn process(
        &self,
        target: Target,
        intake: &CancellationToken,
        cancel: &CancellationToken,
    ) {
        let host = target.host_key().to_string();
        let handle = self.host_locks.handle(&host);
        {
            let guard = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                guard = handle.lock() => Some(guard),
            };
            match guard {
                Some(_guard) => {
                    self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
                    gauge!("targets_in_flight").increment(1.0);
                    if !self.probe_locked(&target, cancel).await {
                        warn!(worker = self.id, "Result stream closed, stopping intake");
                        intake.cancel();
                    }
                    self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
                    gauge!("targets_in_flight").decrement(1.0);
                }
                None => ScanStats::bump(&self.stats.cancelled),
            }
        }
        self.host_locks.release(&host, handle);
    }

    /// 返回false表示结果流已关闭，该目标不会被记为完成
    async fn probe_locked(&self, target: &Target, cancel: &CancellationToken) -> bool {
        // checked under the host lock so a failure recorded by the previous
        // probe of this host is visible here
        if self.context.breaker.is_tripped(target.host_key()) {
            debug!(target = %target.key(), "Host error threshold exceeded, skipping");
            ScanStats::bump(&self.stats.skipped_host_errors);
            counter!("targets_skipped_total", "reason" => "host_errors").increment(1);
            counter!("probe_results_total", "outcome" => "skipped").increment(1);
            return self.emit(ProbeResult::skipped(target)).await
                && self.mark_complete(target).await;
        }

        let run = self.context.pipeline.run(target, cancel).await;
        if run.cancelled {
            debug!(target = %target.key(), "Probe cancelled");
            ScanStats::bump(&self.stats.cancelled);
            return true;
        }
        ScanStats::bump(&self.stats.probed);

        for outcome in run.outcomes {
            let mut result = outcome.result;
            let mut suppressed = outcome.suppressed;

            if result.is_success() {
                ScanStats::bump(&self.stats.succeeded);
            } else if result.failed {
                ScanStats::bump(&self.stats.failed);
            }

            // rows dropped by the filter never enter the seen set
            if !suppressed && result.is_success() {
                if let Some(hashes) = &result.hashes {
                    let classification = self.context.dedup.classify(hashes.simhash, &result.url);
                    result.cluster_id = Some(classification.cluster_id);
                    suppressed =
                        outcome.has_body && self.context.dedup.should_suppress(&classification);
                }
            }

            if suppressed {
                ScanStats::bump(&self.stats.suppressed);
                counter!("probe_results_total", "outcome" => "suppressed").increment(1);
                continue;
            }
            let outcome = match (result.failed, result.skipped) {
                (true, _) => "failed",
                (_, true) => "skipped",
                _ => "success",
            };
            counter!("probe_results_total", "outcome" => outcome).increment(1);
            if !self.emit(result).await {
                return false;
            }
        }

        self.mark_complete(target).await
    }

    async fn emit(&self, result: ProbeResult) -> bool {
        if self.results.send(OutputEvent::Row(result)).await.is_err() {
            return false;
        }
        ScanStats::bump(&self.stats.emitted);
        true
    }

    /// 完成标记排在该目标的结果之后，由输出端在写出后记录
    async fn mark_complete(&self, target: &Target) -> bool {
        if self.context.resume.is_none() {
            return true;
        }
        self.results
            .send(OutputEvent::Completed(target.key()))
            .await
            .is_ok()
    }
}
