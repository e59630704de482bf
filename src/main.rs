use similarity_cluster::config::Config;
use similarity_cluster::context::AppContext;
use similarity_cluster::extract::RemoteFeatureExtractor;
use similarity_cluster::index::placement::NoAccelerator;

use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: {} [--bind <addr:port>] [--index-folder <dir>] [--progress-folder <dir>]",
            args[0]
        );
        eprintln!(
            "       [--dim <n>] [--workers <n>] [--sigma <f>] [--max-retries <n>] [--extractor-url <url>] [--log-level <level>]"
        );
        eprintln!("Example: {} --bind 127.0.0.1:6000 --workers 8", args[0]);
        std::process::exit(1);
    }

    let config = Config::from_args(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    // 1. Collaborators:
    let extractor = Arc::new(
        RemoteFeatureExtractor::new(&config.extractor_url, config.vector_dim)
            .with_timeout(config.extraction_timeout),
    );
    let ctx = Arc::new(AppContext::new(config, extractor, Arc::new(NoAccelerator))?);

    // 2. Processors and workers:
    ctx.register_default_processors();
    tracing::info!("Registered processors: {:?}", ctx.registry.list_processors());
    let workers = ctx.start_workers();

    // 3. Janitor for expired task state:
    let janitor = ctx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));

        loop {
            interval.tick().await;
            let purged = janitor.purge_expired();
            let (pending, processing, completed, failed) = janitor.dispatcher.status_counts();
            tracing::info!(
                "Task stats: queued={} pending={} processing={} completed={} failed={} (purged {})",
                janitor.dispatcher.pending_len().await,
                pending,
                processing,
                completed,
                failed,
                purged
            );
        }
    });

    // 4. HTTP server:
    let app = ctx.router();
    let bind_addr = ctx.config.bind_addr;

    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    ctx.shutdown();
    for worker in workers {
        let _ = worker.await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}
