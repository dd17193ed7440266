// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use probex::application::runner::Runner;
use probex::config::settings::{OutputFormat, Settings};
use probex::infrastructure::output::WriterSink;
use probex::utils::errors::{ConfigurationError, RunnerError};
use probex::utils::telemetry;
use std::process::ExitCode;
use tracing::{error, info};

/// 配置错误的退出码
const EXIT_CONFIG: u8 = 1;
/// 被中断的退出码
const EXIT_INTERRUPTED: u8 = 130;

/// probex - bulk HTTP reconnaissance
#[derive(Parser, Debug)]
#[command(name = "probex")]
#[command(version)]
#[command(about = "Bulk HTTP probing with rate limiting, host error breaking and resumable scans", long_about = None)]
struct Args {
    /// Configuration file (overrides config/default and config/$PROBEX_ENV)
    #[arg(short, long)]
    config: Option<String>,

    /// Target to probe, may be repeated
    #[arg(short = 'u', long = "target")]
    targets: Vec<String>,

    /// File with one target per line, `-` reads stdin
    #[arg(short, long)]
    list: Option<String>,

    /// Write results to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// JSON lines output
    #[arg(long, conflicts_with = "csv")]
    json: bool,

    /// CSV output
    #[arg(long)]
    csv: bool,

    /// Number of concurrent workers
    #[arg(short, long)]
    threads: Option<usize>,

    /// Maximum requests per second
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Resume from (and keep updating) the checkpoint file
    #[arg(long)]
    resume: bool,

    /// Structured JSON logs on stderr
    #[arg(long)]
    json_logs: bool,
}

/// 加载配置文件后应用命令行覆盖，再整体校验一次
fn load_settings(args: &Args) -> Result<Settings, ConfigurationError> {
    let mut settings = Settings::new(args.config.as_deref())?;

    settings.input.targets.extend(args.targets.iter().cloned());
    if let Some(list) = &args.list {
        settings.input.file = Some(list.clone());
    }
    if let Some(output) = &args.output {
        settings.output.path = Some(output.clone());
    }
    if args.json {
        settings.output.format = OutputFormat::Json;
    } else if args.csv {
        settings.output.format = OutputFormat::Csv;
    }
    if let Some(threads) = args.threads {
        settings.probe.threads = threads;
    }
    if let Some(rate) = args.rate_limit {
        settings.rate_limit.per_second = rate;
        settings.rate_limit.per_minute = 0;
    }
    if args.resume {
        settings.resume.enabled = true;
    }
    if args.json_logs {
        settings.output.json_logs = true;
    }

    if settings.input.targets.is_empty() && settings.input.file.is_none() {
        return Err(ConfigurationError::Input(
            "no targets given (use --target or --list)".to_string(),
        ));
    }
    settings.validate()?;
    Ok(settings)
}

/// 主函数
///
/// 退出码：0 正常结束，1 配置错误，130 被中断
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            telemetry::init_telemetry(args.json_logs);
            error!("{}", e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    telemetry::init_telemetry(settings.output.json_logs);
    info!("Starting probex...");

    let sink = WriterSink::from_settings(&settings.output).await?;
    let runner = Runner::new(settings)?;
    runner.shutdown().install_signal_handler();

    match runner.run_from_settings(Box::new(sink)).await {
        Ok(report) if report.interrupted => {
            info!("Scan interrupted, progress saved");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e @ (RunnerError::Configuration(_) | RunnerError::ResumeLoad(_))) => {
            error!("{}", e);
            Ok(ExitCode::from(EXIT_CONFIG))
        }
        Err(e) => Err(e.into()),
    }
}
