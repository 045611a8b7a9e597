use anyhow::Context;
use clap::Parser;
use generator::capture::GeneratorConfig;
use log::info;
use status_bridge::bridge::StatusBridge;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use workflow::config::WorkerConfig;
use workflow::runner::Runner;

mod generator;
mod status_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Spectrum capture ingestion worker")]
struct Args {
    /// Load the worker config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the number of worker instances
    #[arg(long)]
    instances: Option<usize>,
    /// Drain the queue once and print a summary instead of running forever
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Synthetic captures to upload and queue per station at startup
    #[arg(long, default_value_t = 0)]
    files: usize,
    /// Host the HTTP status bridge
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: SocketAddr,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(instances) = args.instances {
        config.worker.instances = instances;
    }

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating worker runtime")?;
    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: WorkerConfig) -> anyhow::Result<()> {
    let runner = Runner::new(config)?;
    if args.files > 0 {
        runner
            .seed_synthetic(args.files, GeneratorConfig::default())
            .await
            .context("seeding synthetic captures")?;
    }

    if args.offline {
        let summary = runner.drain().await?;
        let metrics = runner.context().metrics.snapshot();
        println!(
            "Offline run -> dispatched {}, dropped {}, files processed {}, failed {}",
            summary.dispatched, summary.dropped, metrics.files_processed, metrics.failed
        );
        let status = StatusBridge::new(runner.context().clone(), runner.queue())
            .snapshot()
            .await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let mut handles = runner.spawn(&cancel);
    if args.serve {
        let bridge = StatusBridge::new(runner.context().clone(), runner.queue());
        let stop = cancel.clone();
        let bind = args.bind;
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = bridge.serve(bind) => {}
            }
        }));
    }

    info!("worker running (Ctrl+C to stop)");
    signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
    cancel.cancel();
    for handle in handles {
        handle.await.context("joining worker task")?;
    }
    info!("worker stopped");
    Ok(())
}
