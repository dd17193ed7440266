// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::settings::{OutputFormat, OutputSettings};
use crate::domain::models::probe_result::ProbeResult;
use crate::domain::models::target::TargetKey;
use crate::infrastructure::resume_store::ResumeStore;
use crate::utils::errors::OutputError;

/// 结果输出
#[async_trait]
pub trait ResultSink: Send {
    /// 写入一条结果
    async fn write(&mut self, result: &ProbeResult) -> Result<(), OutputError>;

    /// 刷新并结束输出
    async fn finish(&mut self) -> Result<(), OutputError>;
}

/// 按格式写入任意异步输出流
pub struct WriterSink {
    format: OutputFormat,
    omit_failed: bool,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    header_written: bool,
}

impl WriterSink {
    pub fn new(
        format: OutputFormat,
        omit_failed: bool,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            format,
            omit_failed,
            writer,
            header_written: false,
        }
    }

    /// 根据输出配置打开文件或stdout
    pub async fn from_settings(settings: &OutputSettings) -> Result<Self, OutputError> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match &settings.path {
            Some(path) => {
                info!(path = %path, "Writing results to file");
                Box::new(tokio::fs::File::create(path).await?)
            }
            None => Box::new(tokio::io::stdout()),
        };
        Ok(Self::new(settings.format, settings.omit_failed, writer))
    }

    fn encode(&mut self, result: &ProbeResult) -> Result<Vec<u8>, OutputError> {
        match self.format {
            OutputFormat::Json => {
                let mut line = serde_json::to_vec(result)?;
                line.push(b'\n');
                Ok(line)
            }
            OutputFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(!self.header_written)
                    .from_writer(Vec::new());
                writer.serialize(CsvRow::from(result))?;
                self.header_written = true;
                writer
                    .into_inner()
                    .map_err(|e| OutputError::Io(e.into_error()))
            }
            OutputFormat::Plain => {
                let mut line = plain_line(result);
                line.push('\n');
                Ok(line.into_bytes())
            }
        }
    }
}

#[async_trait]
impl ResultSink for WriterSink {
    async fn write(&mut self, result: &ProbeResult) -> Result<(), OutputError> {
        if self.omit_failed && !result.is_success() {
            return Ok(());
        }
        let bytes = self.encode(result)?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), OutputError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// 把结果收集在内存中，供嵌入方和测试读取
#[derive(Clone, Default)]
pub struct CollectingSink {
    results: Arc<Mutex<Vec<ProbeResult>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<ProbeResult> {
        self.results.lock().clone()
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn write(&mut self, result: &ProbeResult) -> Result<(), OutputError> {
        self.results.lock().push(result.clone());
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// 结果流中的事件
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// 一条待写出的结果
    Row(ProbeResult),
    /// 目标的所有结果都已在此之前发出
    Completed(TargetKey),
}

/// 消费结果流直到所有发送方关闭，返回写出的条数
///
/// 目标只有在它之前的结果全部写出后才记入断点；写出失败时立即返回，
/// 接收端随之关闭，后续的完成事件不会被记录
pub async fn drain(
    mut events: mpsc::Receiver<OutputEvent>,
    sink: &mut dyn ResultSink,
    resume: Option<&ResumeStore>,
) -> Result<u64, OutputError> {
    let mut written = 0u64;
    while let Some(event) = events.recv().await {
        match event {
            OutputEvent::Row(result) => {
                if let Err(e) = sink.write(&result).await {
                    if let Err(finish) = sink.finish().await {
                        warn!(error = %finish, "Failed to flush output after write error");
                    }
                    return Err(e);
                }
                written += 1;
            }
            OutputEvent::Completed(key) => {
                if let Some(store) = resume {
                    store.mark_complete(&key);
                }
            }
        }
    }
    sink.finish().await?;
    debug!(written, "Result stream closed");
    Ok(written)
}

/// httpx风格的单行文本
fn plain_line(result: &ProbeResult) -> String {
    let url = result.final_url.as_deref().unwrap_or(&result.url);
    if !result.is_success() {
        let state = if result.skipped { "SKIPPED" } else { "FAILED" };
        return format!(
            "{} [{}] [{}]",
            url,
            state,
            result.error.as_deref().unwrap_or_default()
        );
    }

    let mut line = url.to_string();
    let status = if result.chain_status_codes.len() > 1 {
        result
            .chain_status_codes
            .iter()
            .map(|code| code.to_string())
            .collect::<Vec<_>>()
            .join(",")
    } else {
        result.status_code.to_string()
    };
    line.push_str(&format!(" [{}]", status));
    if let Some(title) = &result.title {
        line.push_str(&format!(" [{}]", title));
    }
    if let Some(server) = &result.webserver {
        line.push_str(&format!(" [{}]", server));
    }
    if !result.technologies.is_empty() {
        let names: Vec<&str> = result.technologies.iter().map(|t| t.name.as_str()).collect();
        line.push_str(&format!(" [{}]", names.join(",")));
    }
    if let Some(cdn) = &result.cdn_info {
        line.push_str(&format!(" [{}]", cdn.name));
    }
    if let Some(error) = &result.render_error {
        line.push_str(&format!(" [render: {}]", error));
    }
    line
}

/// CSV中的一行，嵌套字段被压平
#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    input: &'a str,
    url: &'a str,
    final_url: Option<&'a str>,
    method: &'a str,
    vhost: Option<&'a str>,
    status_code: u16,
    chain_status_codes: String,
    content_length: u64,
    content_type: Option<&'a str>,
    title: Option<&'a str>,
    webserver: Option<&'a str>,
    location: Option<&'a str>,
    response_time_ms: u64,
    lines: usize,
    words: usize,
    ip: Option<&'a str>,
    cdn: Option<&'a str>,
    asn: Option<&'a str>,
    technologies: String,
    http2: bool,
    body_sha256: Option<&'a str>,
    simhash: Option<u64>,
    favicon_mmh3: Option<&'a str>,
    cluster_id: Option<u64>,
    failed: bool,
    skipped: bool,
    error: Option<&'a str>,
}

impl<'a> From<&'a ProbeResult> for CsvRow<'a> {
    fn from(result: &'a ProbeResult) -> Self {
        Self {
            timestamp: result.timestamp.to_rfc3339(),
            input: &result.input,
            url: &result.url,
            final_url: result.final_url.as_deref(),
            method: &result.method,
            vhost: result.vhost.as_deref(),
            status_code: result.status_code,
            chain_status_codes: result
                .chain_status_codes
                .iter()
                .map(|code| code.to_string())
                .collect::<Vec<_>>()
                .join(","),
            content_length: result.content_length,
            content_type: result.content_type.as_deref(),
            title: result.title.as_deref(),
            webserver: result.webserver.as_deref(),
            location: result.location.as_deref(),
            response_time_ms: result.response_time_ms,
            lines: result.lines,
            words: result.words,
            ip: result.ip.as_deref(),
            cdn: result.cdn_info.as_ref().map(|c| c.name.as_str()),
            asn: result.asn.as_ref().map(|a| a.number.as_str()),
            technologies: result
                .technologies
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            http2: result.http2,
            body_sha256: result.hashes.as_ref().map(|h| h.body_sha256.as_str()),
            simhash: result.hashes.as_ref().map(|h| h.simhash),
            favicon_mmh3: result.favicon_mmh3.as_deref(),
            cluster_id: result.cluster_id,
            failed: result.failed,
            skipped: result.skipped,
            error: result.error.as_deref(),
        }
    }
}
