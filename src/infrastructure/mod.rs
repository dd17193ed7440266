// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 该模块包含系统的技术实现细节，提供对具体技术的抽象和封装。
///
/// 包含的子模块：
/// - 缓存（cache）：有界LRU缓存，供熔断器、响应去重和输入去重使用
/// - 可观测性（observability）：扫描指标的登记
/// - 输出（output）：把探测结果写为JSON行、CSV或纯文本
/// - 断点续扫（resume_store）：已完成目标的检查点持久化
pub mod cache;
pub mod observability;
pub mod output;
pub mod resume_store;
