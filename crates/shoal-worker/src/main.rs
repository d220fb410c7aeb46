use tracing_subscriber::EnvFilter;

/// Standalone worker binary. Production workers are spawned through the
/// `shoal worker` subcommand; this target exists so the child runtime can be
/// driven directly in tests.
fn main() -> anyhow::Result<()> {
    // stdout carries frames; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(shoal_worker::run_from_env())
}
