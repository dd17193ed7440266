// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 目标输入：从内联列表、文件或stdin惰性读取并展开目标
pub mod target_source;
