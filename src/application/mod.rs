// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 扫描生命周期：运行器负责组装和运行，关闭协调器负责信号、取消和关闭钩子
pub mod runner;
pub mod shutdown;
