// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod breaker_test;
pub mod helpers;
pub mod rate_limit_test;
pub mod resume_test;
pub mod runner_test;
