//! speedprobe - measure upload bandwidth to an HTTP endpoint

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use speedprobe::{BytesPerSecond, Client, Config, ConfigOptions, ProbeContext, Server};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "speedprobe")]
#[command(version)]
#[command(about = "Measure upload bandwidth with concurrent HTTP transfers")]
struct Args {
    /// Upload endpoint URL
    #[arg(long)]
    url: String,

    /// Maximum concurrent uploads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Uploads per payload size
    #[arg(long)]
    repeats: Option<usize>,

    /// Payload sizes in bytes, comma separated
    #[arg(long, value_delimiter = ',')]
    sizes: Option<Vec<usize>>,

    /// Overall probe deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    server: &'a Server,
    upload_bytes_per_second: BytesPerSecond,
    upload_mbps: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Progress goes to stderr, the result to stdout
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::new(
        args.url,
        ConfigOptions {
            upload_sizes: args.sizes,
            upload_repeats: args.repeats,
            upload_concurrency: args.concurrency,
            timeout_secs: args.timeout,
            request_timeout_secs: args.request_timeout,
            ..ConfigOptions::default()
        },
    )?;

    let client = Client::new(config.clone())?;
    let server = Server::from_config(&config);
    let ctx = ProbeContext::with_timeout(Duration::from_secs(config.timeout_secs));

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing with the samples collected so far");
            interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel(config.stream_buffer);
    let reporter = tokio::spawn(async move {
        while let Some(speed) = rx.recv().await {
            info!("Upload: {}", speed);
        }
    });

    let result = server.probe_upload_speed(&ctx, &client, Some(&tx)).await;
    drop(tx);
    finish_reporter(reporter).await;
    let speed = result?;

    if args.json {
        let report = Report {
            server: &server,
            upload_bytes_per_second: speed,
            upload_mbps: speed.megabits_per_second(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Upload: {}", speed);
    }

    Ok(())
}

/// Wait for the progress reporter; a panic is logged
async fn finish_reporter(reporter: JoinHandle<()>) -> bool {
    match reporter.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Progress reporter failed: {}", e);
            false
        }
    }
}
