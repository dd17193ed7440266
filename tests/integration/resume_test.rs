// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{run_scan, shared, test_settings, ScriptedClient};
use async_trait::async_trait;
use probex::application::runner::Runner;
use probex::application::shutdown::ShutdownCoordinator;
use probex::config::settings::Settings;
use probex::engines::traits::{HttpClient, HttpRequest, HttpResponse, ProbeError};
use probex::domain::models::probe_result::ProbeResult;
use probex::infrastructure::output::ResultSink;
use probex::infrastructure::resume_store::ResumeCheckpoint;
use probex::queue::target_source::TargetSource;
use probex::utils::errors::{OutputError, RunnerError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 前 `answer` 次请求正常返回，之后触发中断并挂起
struct InterruptingClient {
    inner: ScriptedClient,
    answer: usize,
    seen: AtomicUsize,
    shutdown: Arc<ShutdownCoordinator>,
}

#[async_trait]
impl HttpClient for InterruptingClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) >= self.answer {
            self.shutdown.trigger();
            futures::future::pending::<()>().await;
        }
        self.inner.send(request).await
    }
}

fn all_lines() -> Vec<String> {
    (0..20)
        .map(|i| format!("http://site{}.test/index", i))
        .collect()
}

fn resume_settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = test_settings();
    settings.probe.threads = 3;
    settings.resume.enabled = true;
    settings.resume.path = dir.path().join("resume.cfg.json").display().to_string();
    settings
}

fn keys(results: &[ProbeResult]) -> BTreeSet<String> {
    results.iter().map(|r| r.key.clone()).collect()
}

#[tokio::test]
async fn test_interrupted_then_resumed_run_covers_every_target() {
    let dir = tempfile::tempdir().unwrap();
    let settings = resume_settings(&dir);
    let lines = all_lines();

    // first run is interrupted after a handful of answers
    let runner = Runner::new(settings.clone()).unwrap();
    let client = InterruptingClient {
        inner: ScriptedClient::default(),
        answer: 7,
        seen: AtomicUsize::new(0),
        shutdown: runner.shutdown(),
    };
    let (_, http) = shared(client);
    let (first_report, first) = run_scan(runner.with_http_client(http), &lines, &settings).await;
    assert!(first_report.interrupted);
    assert!(first_report.cancelled > 0);

    let raw = std::fs::read_to_string(&settings.resume.path).unwrap();
    let checkpoint: ResumeCheckpoint = serde_json::from_str(&raw).unwrap();
    let completed: BTreeSet<String> = checkpoint
        .completed
        .iter()
        .map(|k| k.as_str().to_string())
        .collect();
    // only targets that produced a row are recorded
    assert_eq!(completed, keys(&first));
    assert!(completed.len() < lines.len());

    // second run probes exactly what is left
    let (client, http) = shared(ScriptedClient::default());
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let (second_report, second) = run_scan(runner, &lines, &settings).await;
    assert!(!second_report.interrupted);
    assert_eq!(second_report.skipped_resume as usize, completed.len());
    assert_eq!(
        client.calls.load(Ordering::SeqCst),
        lines.len() - completed.len()
    );

    let second_keys = keys(&second);
    assert!(second_keys.is_disjoint(&completed));

    // union matches an uninterrupted run
    let (_, http) = shared(ScriptedClient::default());
    let mut full_settings = settings.clone();
    full_settings.resume.enabled = false;
    let runner = Runner::new(full_settings.clone()).unwrap().with_http_client(http);
    let (_, full) = run_scan(runner, &lines, &full_settings).await;

    let union: BTreeSet<String> = completed.union(&second_keys).cloned().collect();
    assert_eq!(union, keys(&full));
}

#[tokio::test]
async fn test_missing_checkpoint_runs_like_fresh_scan() {
    let dir = tempfile::tempdir().unwrap();
    let settings = resume_settings(&dir);
    let lines = all_lines();

    let (_, http) = shared(ScriptedClient::default());
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let (report, with_resume) = run_scan(runner, &lines, &settings).await;

    let mut plain = settings.clone();
    plain.resume.enabled = false;
    let (_, http) = shared(ScriptedClient::default());
    let runner = Runner::new(plain.clone()).unwrap().with_http_client(http);
    let (_, without_resume) = run_scan(runner, &lines, &plain).await;

    assert_eq!(report.skipped_resume, 0);
    assert_eq!(keys(&with_resume), keys(&without_resume));
    assert_eq!(with_resume.len(), lines.len());

    // a checkpoint exists afterwards and covers the whole input
    let raw = std::fs::read_to_string(&settings.resume.path).unwrap();
    let checkpoint: ResumeCheckpoint = serde_json::from_str(&raw).unwrap();
    assert_eq!(checkpoint.completed.len(), lines.len());
}

#[tokio::test]
async fn test_corrupt_checkpoint_is_fatal_only_when_required() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = resume_settings(&dir);
    std::fs::write(&settings.resume.path, "{ not json").unwrap();
    let lines = all_lines();

    let (_, http) = shared(ScriptedClient::default());
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let (_, results) = run_scan(runner, &lines, &settings).await;
    assert_eq!(results.len(), lines.len());

    std::fs::write(&settings.resume.path, "{ not json").unwrap();
    settings.resume.required = true;
    let (_, http) = shared(ScriptedClient::default());
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let source = TargetSource::from_lines(lines, &settings.probe);
    let outcome = runner
        .run(
            source.into_stream(),
            Box::new(probex::infrastructure::output::CollectingSink::new()),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(RunnerError::ResumeLoad(_))
    ));
}

/// 每次写入都失败的输出
struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn write(&mut self, _result: &ProbeResult) -> Result<(), OutputError> {
        Err(OutputError::Io(std::io::Error::other("broken pipe")))
    }

    async fn finish(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unwritten_rows_are_not_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let settings = resume_settings(&dir);
    let lines = all_lines();

    let (client, http) = shared(ScriptedClient::default());
    let runner = Runner::new(settings.clone()).unwrap().with_http_client(http);
    let source = TargetSource::from_lines(lines.clone(), &settings.probe);
    let outcome = runner
        .run(source.into_stream(), Box::new(FailingSink))
        .await;

    assert!(matches!(outcome, Err(RunnerError::Output(_))));
    let raw = std::fs::read_to_string(&settings.resume.path).unwrap();
    let checkpoint: ResumeCheckpoint = serde_json::from_str(&raw).unwrap();
    assert!(checkpoint.completed.is_empty());
    // the scan stops instead of probing the whole input
    assert!(client.calls.load(Ordering::SeqCst) < lines.len());
}
