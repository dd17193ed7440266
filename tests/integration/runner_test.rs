// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{closed_port, run_scan, shared, start_test_server, test_settings};
use async_trait::async_trait;
use probex::application::runner::Runner;
use probex::config::settings::OutputFormat;
use probex::engines::traits::{HttpClient, HttpRequest, HttpResponse, ProbeError};
use probex::infrastructure::output::WriterSink;
use std::collections::BTreeMap;
use probex::queue::target_source::TargetSource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_end_to_end_against_local_server() {
    let addr = start_test_server().await;
    let settings = test_settings();
    let lines = vec![
        format!("http://{}/", addr),
        format!("http://{}/page/1", addr),
        format!("http://{}/page/2", addr),
    ];

    let runner = Runner::new(settings.clone()).unwrap();
    let (report, mut results) = run_scan(runner, &lines, &settings).await;
    results.sort_by(|a, b| a.path.cmp(&b.path));

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status_code == 200 && !r.failed));
    assert_eq!(results[0].title.as_deref(), Some("Home"));
    assert_eq!(results[1].title.as_deref(), Some("Page 1"));
    assert_eq!(results[2].title.as_deref(), Some("Page 2"));
    assert!(results.iter().all(|r| r.ip.as_deref() == Some("127.0.0.1")));
    assert!(results.iter().all(|r| r.hashes.is_some() && r.cluster_id.is_some()));

    assert_eq!(report.targets, 3);
    assert_eq!(report.succeeded, 3);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_exact_duplicates_are_suppressed() {
    let addr = start_test_server().await;
    let settings = test_settings();
    let lines: Vec<String> = (0..3)
        .map(|i| format!("http://{}/same?v={}", addr, i))
        .collect();

    let runner = Runner::new(settings.clone()).unwrap();
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 1);
    assert_eq!(report.suppressed, 2);
    assert_eq!(report.clusters, 1);
}

#[tokio::test]
async fn test_duplicates_share_cluster_when_suppression_disabled() {
    let addr = start_test_server().await;
    let mut settings = test_settings();
    settings.dedup.disabled = true;
    let lines: Vec<String> = (0..3)
        .map(|i| format!("http://{}/same?v={}", addr, i))
        .collect();

    let runner = Runner::new(settings.clone()).unwrap();
    let (_, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 3);
    let cluster = results[0].cluster_id;
    assert!(cluster.is_some());
    assert!(results.iter().all(|r| r.cluster_id == cluster));
}

#[tokio::test]
async fn test_filters_select_status_codes() {
    let addr = start_test_server().await;
    let mut settings = test_settings();
    settings.filter.match_status_codes = vec![404];
    let lines = vec![
        format!("http://{}/", addr),
        format!("http://{}/missing", addr),
    ];

    let runner = Runner::new(settings.clone()).unwrap();
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status_code, 404);
    assert_eq!(report.suppressed, 1);
}

#[tokio::test]
async fn test_unreachable_target_yields_failure_row() {
    let settings = test_settings();
    let lines = vec![format!("http://127.0.0.1:{}/", closed_port())];

    let runner = Runner::new(settings.clone()).unwrap();
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].failed);
    assert!(results[0].error.is_some());
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_on_close_runs_once_after_scan() {
    let addr = start_test_server().await;
    let settings = test_settings();
    let closed = Arc::new(AtomicUsize::new(0));

    let counter = closed.clone();
    let runner = Runner::new(settings.clone()).unwrap().on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let (_, results) = run_scan(runner, &[format!("http://{}/", addr)], &settings).await;

    assert_eq!(results.len(), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_json_lines_written_to_file() {
    let addr = start_test_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings();
    settings.output.format = OutputFormat::Json;
    settings.output.path = Some(dir.path().join("out.jsonl").display().to_string());

    let lines = vec![
        format!("http://{}/page/3", addr),
        format!("http://{}/page/4", addr),
    ];
    let sink = WriterSink::from_settings(&settings.output).await.unwrap();
    let source = TargetSource::from_lines(lines, &settings.probe);
    let runner = Runner::new(settings.clone()).unwrap();
    runner.run(source.into_stream(), Box::new(sink)).await.unwrap();

    let written = std::fs::read_to_string(settings.output.path.as_ref().unwrap()).unwrap();
    let rows: Vec<serde_json::Value> = written
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["status_code"] == 200));
}

#[tokio::test]
async fn test_run_from_settings_reads_inline_targets() {
    let addr = start_test_server().await;
    let mut settings = test_settings();
    settings.input.targets = vec![format!("http://{}/", addr), "ftp://example.test".to_string()];

    let sink = probex::infrastructure::output::CollectingSink::new();
    let runner = Runner::new(settings).unwrap();
    let report = runner
        .run_from_settings(Box::new(sink.clone()))
        .await
        .unwrap();

    assert_eq!(sink.results().len(), 1);
    assert_eq!(report.succeeded, 1);
}

/// 每个主机都以无正文的302跳转到自己的登录页
struct LoginRedirects;

#[async_trait]
impl HttpClient for LoginRedirects {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        let host = request.url.host_str().unwrap_or_default();
        let mut headers = BTreeMap::new();
        headers.insert("location".to_string(), format!("https://{}/login", host));
        headers.insert("content-length".to_string(), "0".to_string());
        Ok(HttpResponse {
            url: request.url.to_string(),
            status_code: 302,
            headers,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_bodiless_responses_are_not_exact_duplicates() {
    let settings = test_settings();
    let (_, http) = shared(LoginRedirects);
    let lines: Vec<String> = (0..10).map(|i| format!("http://r{}.test/", i)).collect();

    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 10);
    assert_eq!(report.suppressed, 0);
    assert!(results.iter().all(|r| r.status_code == 302));

    // the same host repeating an empty answer is still written
    let (_, http) = shared(LoginRedirects);
    let lines: Vec<String> = (0..3).map(|i| format!("http://same.test/{}", i)).collect();
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let (report, results) = run_scan(runner, &lines, &settings).await;

    assert_eq!(results.len(), 3);
    assert_eq!(report.suppressed, 0);
}
