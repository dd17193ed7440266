// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含扫描引擎的核心业务逻辑，包括：
/// - 领域模型（models）：探测目标与探测结果
/// - 服务（services）：探测流水线、响应哈希、匹配过滤和响应聚类
///
/// 网络、浏览器和解析器都通过引擎层定义的协作者接口注入。
pub mod models;
pub mod services;
