// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use futures::{Stream, StreamExt};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::settings::InputSettings;
use crate::domain::models::target::{Target, TargetKey};
use crate::infrastructure::cache::bounded_cache::BoundedCache;
use crate::infrastructure::output::OutputEvent;
use crate::infrastructure::resume_store::ResumeStore;
use crate::workers::probe_worker::{HostLocks, ProbeWorker, ScanStats, WorkerContext};

/// 扫描统计汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub targets: u64,
    pub skipped_resume: u64,
    pub skipped_duplicate: u64,
    pub skipped_host_errors: u64,
    pub probed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub suppressed: u64,
    pub emitted: u64,
    pub cancelled: u64,
    pub clusters: u64,
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

impl ScanReport {
    fn from_stats(stats: &ScanStats, elapsed: Duration) -> Self {
        Self {
            targets: stats.targets.load(Ordering::Relaxed),
            skipped_resume: stats.skipped_resume.load(Ordering::Relaxed),
            skipped_duplicate: stats.skipped_duplicate.load(Ordering::Relaxed),
            skipped_host_errors: stats.skipped_host_errors.load(Ordering::Relaxed),
            probed: stats.probed.load(Ordering::Relaxed),
            succeeded: stats.succeeded.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            suppressed: stats.suppressed.load(Ordering::Relaxed),
            emitted: stats.emitted.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
            clusters: 0,
            interrupted: false,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// 扫描调度器
///
/// 生产者从目标流中惰性读取，经过断点跳过和输入去重后写入容量为
/// `2 × threads` 的有界队列；`threads` 个工作者共享队列的接收端。
pub struct ScanScheduler {
    context: WorkerContext,
    threads: usize,
    skip_dedupe: bool,
    dedupe_capacity: usize,
}

impl ScanScheduler {
    pub fn new(context: WorkerContext, input: &InputSettings, threads: usize) -> Self {
        Self {
            context,
            threads: threads.max(1),
            skip_dedupe: input.skip_dedupe,
            dedupe_capacity: input.dedupe_capacity,
        }
    }

    /// 启动生产者和工作者
    ///
    /// # 参数
    ///
    /// * `targets` - 惰性目标流
    /// * `results` - 结果流发送端，所有工作者结束后关闭；接收端关闭时扫描停止领取新目标
    /// * `cancel` - 进程级取消令牌，触发时取消正在进行的探测
    pub fn start<S>(
        self,
        targets: S,
        results: mpsc::Sender<OutputEvent>,
        cancel: CancellationToken,
    ) -> ScanHandle
    where
        S: Stream<Item = Target> + Send + 'static,
    {
        let started = Instant::now();
        let stats = Arc::new(ScanStats::default());
        let host_locks = Arc::new(HostLocks::default());
        let intake = cancel.child_token();
        let (queue_tx, queue_rx) = mpsc::channel::<Target>(self.threads * 2);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let producer = tokio::spawn(produce(
            targets,
            queue_tx,
            self.context.resume.clone(),
            (!self.skip_dedupe).then(|| BoundedCache::new(self.dedupe_capacity)),
            stats.clone(),
            intake.clone(),
        ));

        let workers = (0..self.threads)
            .map(|id| {
                let worker = ProbeWorker::new(
                    id,
                    self.context.clone(),
                    host_locks.clone(),
                    results.clone(),
                    stats.clone(),
                );
                tokio::spawn(worker.run(queue_rx.clone(), intake.clone(), cancel.clone()))
            })
            .collect();

        info!(threads = self.threads, "Scan started");
        ScanHandle {
            producer: Some(producer),
            workers,
            intake,
            stats,
            host_locks,
            started,
        }
    }
}

/// 生产者：读取目标流并写入有界队列，队列满时等待
async fn produce<S>(
    targets: S,
    queue: mpsc::Sender<Target>,
    resume: Option<Arc<ResumeStore>>,
    seen: Option<BoundedCache<TargetKey, ()>>,
    stats: Arc<ScanStats>,
    intake: CancellationToken,
) where
    S: Stream<Item = Target> + Send + 'static,
{
    let mut targets = Box::pin(targets);
    loop {
        let next = tokio::select! {
            biased;
            _ = intake.cancelled() => break,
            target = targets.next() => target,
        };
        let Some(target) = next else {
            break;
        };
        stats.targets.fetch_add(1, Ordering::Relaxed);
        let key = target.key();

        if resume.as_ref().is_some_and(|store| store.should_skip(&key)) {
            stats.skipped_resume.fetch_add(1, Ordering::Relaxed);
            counter!("targets_skipped_total", "reason" => "resume").increment(1);
            continue;
        }
        if let Some(seen) = &seen {
            if !seen.insert_if_absent(key, ()) {
                stats.skipped_duplicate.fetch_add(1, Ordering::Relaxed);
                counter!("targets_skipped_total", "reason" => "duplicate").increment(1);
                continue;
            }
        }

        let sent = tokio::select! {
            biased;
            _ = intake.cancelled() => break,
            sent = queue.send(target) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
    debug!("Target producer finished");
}

/// 运行中的扫描
pub struct ScanHandle {
    producer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    intake: CancellationToken,
    stats: Arc<ScanStats>,
    host_locks: Arc<HostLocks>,
    started: Instant,
}

impl ScanHandle {
    pub fn stats(&self) -> Arc<ScanStats> {
        self.stats.clone()
    }

    /// 等待所有目标处理完毕（或取消）
    pub async fn wait(&mut self) -> ScanReport {
        // handles are only removed once joined, so a timed-out wait can still abort them
        if let Some(producer) = self.producer.as_mut() {
            if let Err(e) = producer.await {
                warn!("Target producer panicked: {}", e);
            }
            self.producer = None;
        }
        while let Some(worker) = self.workers.last_mut() {
            if let Err(e) = worker.await {
                warn!("Probe worker panicked: {}", e);
            }
            self.workers.pop();
        }
        self.report()
    }

    /// 停止接收新任务，在宽限期内等待进行中的探测结束，超时后中止剩余工作者
    pub async fn close(&mut self, grace: Duration) -> ScanReport {
        self.intake.cancel();
        if tokio::time::timeout(grace, self.wait()).await.is_err() {
            warn!(
                remaining = self.workers.len(),
                "Grace period elapsed, aborting probe workers"
            );
            for worker in self.workers.drain(..) {
                worker.abort();
            }
            if let Some(producer) = self.producer.take() {
                producer.abort();
            }
        }
        self.report()
    }

    fn report(&self) -> ScanReport {
        debug!(host_locks = self.host_locks.len(), "Scan stopped");
        ScanReport::from_stats(&self.stats, self.started.elapsed())
    }
}
