// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 扫描运行器与关闭协调
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 探测目标、探测结果以及探测流水线、过滤、哈希和去重服务
pub mod domain;

/// 引擎模块
///
/// 协作者接口及其默认实现：HTTP传输、TLS、渲染、技术识别、DNS/CDN，以及限速器和主机熔断器
pub mod engines;

/// 基础设施模块
///
/// 有界缓存、断点续扫存储、结果输出和指标登记
pub mod infrastructure;

/// 队列模块
///
/// 目标输入的读取与展开
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 扫描调度与探测工作者
pub mod workers;
