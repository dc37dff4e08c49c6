//! hlscast - relay a local video or a remote URL as a live HLS stream on the LAN.

mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use hlscast_core::orchestrator::stream_url;
use hlscast_core::supervisor::build_encoder_args;
use hlscast_core::tracing_setup::{CliLogLevel, init_tracing};
use hlscast_core::{
    CodecProber, EXIT_FAILURE, FfprobeProber, HlscastConfig, HlscastError, Orchestrator,
    RunInputs, TranscodePlan, network, streaming,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "hlscast")]
#[command(about = "Serve a video file or URL as a live HLS stream on the local network")]
#[command(version)]
#[command(group(ArgGroup::new("source").required(true).args(["local_path", "remote_url"])))]
struct Cli {
    /// Server port (49152-65535)
    #[arg(short, long)]
    port: u16,

    /// Streaming directory (default: the current directory)
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Transcode to H.264/AAC when the source codecs need it
    #[arg(short, long)]
    transcode: bool,

    /// Absolute path of the local video
    #[arg(short, long)]
    local_path: Option<PathBuf>,

    /// Remote http(s) URL of the video
    #[arg(short, long)]
    remote_url: Option<String>,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::default())]
    log_level: CliLogLevel,

    /// Also write a full trace of the run to this directory
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Probe and plan, print the encoder invocation, start nothing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize logging")?;

    let config = Arc::new(HlscastConfig::from_env());
    let inputs = match validate(&cli, &config).await {
        Ok(inputs) => inputs,
        Err(e) => return Ok(report_error(&e)),
    };

    let prober = Arc::new(FfprobeProber::from_config(&config.tools));
    if cli.dry_run {
        return dry_run(&config, prober.as_ref(), &inputs).await;
    }
    print_summary(&inputs);

    let orchestrator = Orchestrator::new(config, prober);
    let report = orchestrator.run(inputs, shutdown_signal()).await;
    if let Err(e) = &report.outcome {
        report_error(e);
    }
    Ok(report.exit_code())
}

async fn validate(cli: &Cli, config: &HlscastConfig) -> Result<RunInputs, HlscastError> {
    validation::check_tools(&config.tools).await?;

    let bind_address =
        network::discover_private_ipv4().ok_or_else(|| HlscastError::Validation {
            reason: "the private IP wasn't found.".to_string(),
        })?;
    let port = validation::validate_port(&config.network, bind_address, cli.port)?;
    let streaming_dir = validation::prepare_streaming_dir(&cli.dir)?;

    let source = match (&cli.local_path, &cli.remote_url) {
        (Some(path), _) => validation::validate_local_video(path, &config.validation)?,
        (None, Some(url)) => validation::validate_remote_url(url)?,
        (None, None) => {
            return Err(HlscastError::Validation {
                reason: "a local path or a remote URL is required.".to_string(),
            });
        }
    };

    Ok(RunInputs {
        bind_address,
        port,
        streaming_dir,
        transcode: cli.transcode,
        source,
    })
}

fn report_error(error: &HlscastError) -> i32 {
    eprintln!("Error: {}", error.user_message());
    error.exit_code()
}

fn print_summary(inputs: &RunInputs) {
    println!("- Private IP Server: {}", inputs.bind_address);
    println!("- Server port: {}", inputs.port);
    println!(
        "- Directory server (streaming): {}",
        inputs.streaming_dir.display()
    );
    println!("- Video source: {}", inputs.source);
}

#[derive(Serialize)]
struct DryRun<'a> {
    inputs: &'a RunInputs,
    plan: &'a TranscodePlan,
    stream_url: String,
    encoder: &'a std::path::Path,
    encoder_args: Vec<String>,
}

async fn dry_run(
    config: &HlscastConfig,
    prober: &dyn CodecProber,
    inputs: &RunInputs,
) -> anyhow::Result<i32> {
    let plan = match streaming::plan_for_source(config, prober, &inputs.source, inputs.transcode)
        .await
    {
        Ok(plan) => plan,
        Err(e) => return Ok(report_error(&HlscastError::from(e))),
    };

    let dry_run = DryRun {
        inputs,
        plan: &plan,
        stream_url: stream_url(inputs.bind_address, inputs.port, &config.hls.playlist_name),
        encoder: &config.tools.ffmpeg_path,
        encoder_args: build_encoder_args(
            config,
            inputs.bind_address,
            inputs.port,
            &inputs.streaming_dir,
            &plan,
            &inputs.source,
        ),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&dry_run).context("failed to render the dry run")?
    );
    Ok(hlscast_core::EXIT_OK)
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
