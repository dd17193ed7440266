// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::settings::DedupSettings;
use crate::domain::services::hash_service::hamming_distance;
use crate::infrastructure::cache::bounded_cache::BoundedCache;

/// 每个簇保留的成员URL数量上限
const MAX_MEMBER_URLS: usize = 16;

/// 近似重复簇
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupCluster {
    pub id: u64,
    /// 创建簇的第一个哈希
    pub base_hash: u64,
    pub member_urls: Vec<String>,
    pub member_count: u64,
}

/// 一次分类的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub cluster_id: u64,
    /// 该哈希之前已经出现过
    pub exact_duplicate: bool,
    /// 与簇基准哈希的汉明距离
    pub distance: u32,
}

/// 响应去重引擎
///
/// 哈希与已有簇基准哈希的最小距离不超过阈值时加入该簇（距离相同取最早的簇），
/// 否则以该哈希为基准新建簇。簇之间不会合并。
pub struct DedupEngine {
    threshold: u32,
    suppress_exact: bool,
    clusters: Mutex<Vec<DedupCluster>>,
    /// 已见哈希 -> 所属簇
    seen: BoundedCache<u64, u64>,
}

impl DedupEngine {
    pub fn new(threshold: u32, suppress_exact: bool, capacity: usize) -> Self {
        Self {
            threshold,
            suppress_exact,
            clusters: Mutex::new(Vec::new()),
            seen: BoundedCache::new(capacity),
        }
    }

    pub fn from_settings(settings: &DedupSettings) -> Self {
        Self::new(settings.threshold, !settings.disabled, settings.capacity)
    }

    /// 对一个哈希分类
    ///
    /// # 参数
    ///
    /// * `hash` - 响应的SimHash
    /// * `url` - 响应地址，记录为簇成员
    pub fn classify(&self, hash: u64, url: &str) -> Classification {
        let mut clusters = self.clusters.lock();

        if let Some(cluster_id) = self.seen.get(&hash) {
            if let Some(cluster) = clusters.iter_mut().find(|c| c.id == cluster_id) {
                add_member(cluster, url);
                counter!("dedup_exact_duplicates_total").increment(1);
                return Classification {
                    cluster_id,
                    exact_duplicate: true,
                    distance: hamming_distance(cluster.base_hash, hash),
                };
            }
        }

        // strict comparison keeps the oldest cluster on ties
        let mut best: Option<(usize, u32)> = None;
        for (index, cluster) in clusters.iter().enumerate() {
            let distance = hamming_distance(cluster.base_hash, hash);
            if distance <= self.threshold && best.is_none_or(|(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        let classification = match best {
            Some((index, distance)) => {
                let cluster = &mut clusters[index];
                add_member(cluster, url);
                Classification {
                    cluster_id: cluster.id,
                    exact_duplicate: false,
                    distance,
                }
            }
            None => {
                let id = clusters.len() as u64 + 1;
                clusters.push(DedupCluster {
                    id,
                    base_hash: hash,
                    member_urls: vec![url.to_string()],
                    member_count: 1,
                });
                gauge!("dedup_clusters").set(clusters.len() as f64);
                Classification {
                    cluster_id: id,
                    exact_duplicate: false,
                    distance: 0,
                }
            }
        };

        self.seen.set(hash, classification.cluster_id);
        classification
    }

    /// 分类结果是否应从输出中抑制
    pub fn should_suppress(&self, classification: &Classification) -> bool {
        self.suppress_exact && classification.exact_duplicate
    }

    /// 当前所有簇的快照
    pub fn clusters(&self) -> Vec<DedupCluster> {
        self.clusters.lock().clone()
    }
}

fn add_member(cluster: &mut DedupCluster, url: &str) {
    cluster.member_count += 1;
    if cluster.member_urls.len() < MAX_MEMBER_URLS {
        cluster.member_urls.push(url.to_string());
    }
}
