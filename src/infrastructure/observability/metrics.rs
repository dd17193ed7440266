// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge};
use std::sync::Once;

static DESCRIBE: Once = Once::new();

/// 注册扫描过程中使用的各类指标
///
/// 只登记描述，不安装导出器；嵌入方可以自行安装recorder
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!("targets_total", "Targets produced by the input source");
        describe_counter!(
            "targets_skipped_total",
            "Targets skipped before probing, labelled by reason"
        );
        describe_counter!(
            "probe_results_total",
            "Probe results, labelled by outcome (success, failed, skipped, suppressed)"
        );
        describe_gauge!("targets_in_flight", "Targets currently being probed");

        // Rate limiter
        describe_counter!(
            "rate_limiter_permits_total",
            "Permits granted by the global rate limiter"
        );
        describe_counter!(
            "rate_limiter_waits_total",
            "Times a caller had to wait for a permit"
        );

        // Host error breaker
        describe_counter!(
            "host_breaker_failures_total",
            "Target failures recorded against a host"
        );
        describe_counter!(
            "host_breaker_tripped_total",
            "Hosts that crossed the error threshold"
        );

        // Dedup
        describe_counter!(
            "dedup_exact_duplicates_total",
            "Responses whose SimHash was already seen"
        );
        describe_gauge!("dedup_clusters", "Number of near-duplicate clusters");

        describe_counter!(
            "resume_checkpoints_total",
            "Checkpoint files written to disk"
        );
    });
}
