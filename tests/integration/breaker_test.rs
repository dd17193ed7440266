// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{run_scan, shared, test_settings, ScriptedClient};
use probex::application::runner::Runner;

fn host_lines(hosts: &[&str], attempts: usize) -> Vec<String> {
    hosts
        .iter()
        .flat_map(|host| (1..=attempts).map(move |i| format!("http://{}/attempt{}", host, i)))
        .collect()
}

#[tokio::test]
async fn test_failing_host_is_skipped_after_threshold() {
    let mut settings = test_settings();
    settings.breaker.max_host_errors = 2;
    let (client, http) = shared(ScriptedClient::refusing(&["h2.test"]));

    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let lines = host_lines(&["h1.test", "h2.test", "h3.test"], 3);
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 9);

    let h2: Vec<_> = results.iter().filter(|r| r.host == "h2.test").collect();
    assert_eq!(h2.iter().filter(|r| r.failed).count(), 2);
    assert_eq!(h2.iter().filter(|r| r.skipped).count(), 1);
    // the skipped row is distinct from the failures
    assert!(h2.iter().all(|r| !(r.failed && r.skipped)));
    assert_eq!(client.calls_for("h2.test"), 2);

    for host in ["h1.test", "h3.test"] {
        let rows: Vec<_> = results.iter().filter(|r| r.host == host).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.is_success() && r.status_code == 200));
        assert_eq!(client.calls_for(host), 3);
    }

    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped_host_errors, 1);
    assert_eq!(report.succeeded, 6);
}

#[tokio::test]
async fn test_negative_threshold_never_skips() {
    let mut settings = test_settings();
    settings.breaker.max_host_errors = -1;
    let (client, http) = shared(ScriptedClient::refusing(&["down.test"]));

    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let lines = host_lines(&["down.test"], 5);
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.failed && !r.skipped));
    assert_eq!(report.skipped_host_errors, 0);
    assert_eq!(client.calls_for("down.test"), 5);
}

#[tokio::test]
async fn test_threshold_one_skips_after_first_failure() {
    let mut settings = test_settings();
    settings.breaker.max_host_errors = 1;
    let (_, http) = shared(ScriptedClient::refusing(&["h2.test"]));

    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let lines = host_lines(&["h2.test"], 3);
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped_host_errors, 2);
    assert_eq!(results.iter().filter(|r| r.skipped).count(), 2);
}
