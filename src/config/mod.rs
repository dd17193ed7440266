// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理扫描运行的分组配置：探测、限速、熔断、去重、过滤、渲染、断点续扫和输出
pub mod settings;
