// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了扫描的核心数据结构，包括：
/// - 探测目标（target）：协议、主机、端口、路径和方法组成的探测单元
/// - 探测结果（probe_result）：单个目标的协议与应用层元数据
pub mod probe_result;
pub mod target;
