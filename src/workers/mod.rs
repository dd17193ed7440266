// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 扫描调度：有界目标队列、固定数量的探测工作者和按主机串行化
pub mod manager;
pub mod probe_worker;
