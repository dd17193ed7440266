// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod chromium_renderer;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod reqwest_engine;
pub mod resolvers;
pub mod tech_detector;
pub mod tls_prober;
pub mod traits;
