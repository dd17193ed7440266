// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{run_scan, shared, test_settings, ScriptedClient};
use probex::application::runner::Runner;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_rate_limit_bounds_wall_clock() {
    let mut settings = test_settings();
    settings.probe.threads = 10;
    settings.rate_limit.per_second = 20;
    let (client, http) = shared(ScriptedClient::default());

    let lines: Vec<String> = (0..20).map(|i| format!("http://fast{}.test/", i)).collect();
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);

    let started = Instant::now();
    let (report, results) = run_scan(runner, &lines, &settings).await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 20);
    assert_eq!(report.succeeded, 20);
    assert_eq!(client.calls.load(Ordering::SeqCst), 20);
    // one token up front, then 19 more at 50ms intervals
    assert!(elapsed >= Duration::from_millis(900), "finished in {:?}", elapsed);
}

#[tokio::test]
async fn test_scheme_fallback_requests_are_rate_limited() {
    let mut settings = test_settings();
    settings.probe.threads = 5;
    settings.rate_limit.per_second = 20;
    settings.breaker.max_host_errors = -1;
    let (client, http) = shared(ScriptedClient::refusing(&["down.test"]));

    // no scheme: https is tried first, then http
    let lines: Vec<String> = (0..10).map(|i| format!("down.test/{}", i)).collect();
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);

    let started = Instant::now();
    let (_, results) = run_scan(runner, &lines, &settings).await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.failed));
    assert_eq!(client.calls.load(Ordering::SeqCst), 20);
    assert!(elapsed >= Duration::from_millis(900), "finished in {:?}", elapsed);
}

#[tokio::test]
async fn test_unlimited_rate_does_not_throttle() {
    let mut settings = test_settings();
    settings.probe.threads = 10;
    let (_, http) = shared(ScriptedClient::default());

    let lines: Vec<String> = (0..50).map(|i| format!("http://quick{}.test/", i)).collect();
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);

    let started = Instant::now();
    let (_, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 50);
    assert!(started.elapsed() < Duration::from_secs(2));
}
