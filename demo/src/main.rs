use anyhow::{Context, Error, Result};
use clap::Parser;
use perfect_shutdown::{signal, Shutdown};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// path to the config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// number of background loops
    #[arg(short, long)]
    workers: Option<usize>,
    /// seconds each loop waits between iterations
    #[arg(short, long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // load config from path
    let mut config = config::Config::load(args.config)?;
    if let Some(workers) = args.workers {
        config.demo.workers = workers;
    }
    if let Some(interval_secs) = args.interval_secs {
        config.demo.interval_secs = interval_secs;
    }

    // init tracing
    let _ = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    info!(pid = std::process::id(), "start demo, send SIGINT/SIGTERM/SIGQUIT to stop");

    let shutdown = Shutdown::with_config(config.shutdown.clone());
    shutdown.on_before_close(|| info!("closing, stop accepting new work"));
    shutdown.on_closed(|| info!("all loops exited"));

    let _listener = signal::listen(&shutdown, &shutdown.config().signals)
        .context("fail install signal listener")?;

    let interval = config.demo.interval();
    let workers: Vec<_> = (0..config.demo.workers)
        .map(|worker| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown
                    .run_loop(move |index, shutdown| async move {
                        info!(worker = worker, index = index, "loop");
                        let key = format!("worker{}", worker);
                        if !shutdown.wait_key(&key, interval).await {
                            debug!(worker = worker, "wait interrupted");
                        }
                    })
                    .await
            })
        })
        .collect();

    // the main task participates too, so the process stays up until close
    shutdown
        .run_loop(|index, shutdown| async move {
            info!(index = index, "main loop");
            shutdown.wait(interval).await;
        })
        .await?;

    for worker in workers {
        worker.await.context("worker loop panicked")??;
    }

    if tokio::time::timeout(Duration::from_secs(5), shutdown.finished())
        .await
        .is_err()
    {
        warn!("timeout wait for shutdown to finish");
    }
    info!("demo exit");
    Ok(())
}
