use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shoal_gateway::{build_router, AppState};
use shoal_pool::{PoolOptions, WorkerPool};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Multi-tenant app runtime: one front door, isolated subprocess workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the front-door HTTP server.
    Serve(ServeArgs),
    /// Internal: run as a worker child. Spawned by the pool, configured via
    /// environment.
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Directory containing one subdirectory per app.
    #[arg(long, default_value = "./apps")]
    apps_root: PathBuf,

    /// App that receives requests matching no app prefix.
    #[arg(long)]
    default_app: Option<String>,

    /// Cap on live persistent workers.
    #[arg(long)]
    max_workers: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn")),
                )
                .init();
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(serve(args))
        }
        Command::Worker => {
            // stdout carries frames; the worker logs to stderr.
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(shoal_worker::run_from_env())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut options = PoolOptions::default();
    if let Some(max_workers) = args.max_workers {
        options.max_pool_size = max_workers;
    }

    let pool = WorkerPool::new(options);
    let sweeper = pool.spawn_sweeper();

    let apps_root = args
        .apps_root
        .canonicalize()
        .unwrap_or_else(|_| args.apps_root.clone());
    let state = AppState::new(pool.clone(), apps_root.clone(), args.default_app);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!(addr = %args.bind, apps_root = %apps_root.display(), "shoal listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining worker pool");
    pool.shutdown().await;
    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
