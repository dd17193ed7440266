// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 缓存模块
///
/// 提供进程内的有界缓存实现，淘汰策略为LRU
pub mod bounded_cache;
