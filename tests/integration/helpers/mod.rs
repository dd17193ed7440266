// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use axum::{extract::Path, response::Html, routing::get, Router};
use probex::application::runner::Runner;
use probex::config::settings::Settings;
use probex::domain::models::probe_result::ProbeResult;
use probex::engines::traits::{HttpClient, HttpRequest, HttpResponse, ProbeError};
use probex::infrastructure::output::CollectingSink;
use probex::queue::target_source::TargetSource;
use probex::workers::manager::ScanReport;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// 启动本地测试服务器，每个路径返回不同内容
pub async fn start_test_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/",
            get(|| async { Html("<html><head><title>Home</title></head><body>index</body></html>") }),
        )
        .route(
            "/page/{id}",
            get(|Path(id): Path<u32>| async move {
                let words: Vec<String> = (0..50).map(|i| format!("p{}w{}", id, i)).collect();
                Html(format!(
                    "<html><head><title>Page {}</title></head><body>{}</body></html>",
                    id,
                    words.join(" ")
                ))
            }),
        )
        .route(
            "/same",
            get(|| async { Html("<html><body>identical content everywhere</body></html>") }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// 一个没有监听者的本地端口
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// 测试用基础配置：不限速、不去重抑制
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.probe.threads = 4;
    settings.probe.timeout_secs = 5;
    settings.rate_limit.per_second = 0;
    settings.rate_limit.per_minute = 0;
    settings.shutdown.grace_period_secs = 5;
    settings
}

/// 运行一次完整扫描并收集输出
pub async fn run_scan(runner: Runner, lines: &[String], settings: &Settings) -> (ScanReport, Vec<ProbeResult>) {
    let sink = CollectingSink::new();
    let source = TargetSource::from_lines(lines.iter().cloned(), &settings.probe);
    let report = runner
        .run(source.into_stream(), Box::new(sink.clone()))
        .await
        .unwrap();
    (report, sink.results())
}

/// 按主机名返回固定页面的假传输，`refused` 中的主机拒绝连接
#[derive(Default)]
pub struct ScriptedClient {
    pub refused: Vec<String>,
    pub calls: AtomicUsize,
    pub calls_per_host: parking_lot::Mutex<BTreeMap<String, usize>>,
}

impl ScriptedClient {
    pub fn refusing(hosts: &[&str]) -> Self {
        Self {
            refused: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls_for(&self, host: &str) -> usize {
        self.calls_per_host.lock().get(host).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let host = request.url.host_str().unwrap_or_default().to_string();
        *self.calls_per_host.lock().entry(host.clone()).or_default() += 1;

        if self.refused.contains(&host) {
            return Err(ProbeError::Connection(format!("{}: connection refused", host)));
        }
        Ok(HttpResponse {
            url: request.url.to_string(),
            status_code: 200,
            headers: BTreeMap::new(),
            body: format!("<html><body>{} {}</body></html>", host, request.url.path()).into_bytes(),
            ..Default::default()
        })
    }
}

pub fn shared<T: HttpClient + 'static>(client: T) -> (Arc<T>, Arc<dyn HttpClient>) {
    let client = Arc::new(client);
    let dynamic: Arc<dyn HttpClient> = client.clone();
    (client, dynamic)
}
