// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 包含的服务：
/// - 去重服务（dedup_service）：基于SimHash的近似重复响应聚类
/// - 过滤服务（filter_service）：匹配/过滤条件的编译与求值
/// - 哈希服务（hash_service）：响应体、响应头、favicon哈希与SimHash
/// - 探测流水线（probe_pipeline）：单个目标的有序探测步骤
pub mod dedup_service;
pub mod filter_service;
pub mod hash_service;
pub mod probe_pipeline;
