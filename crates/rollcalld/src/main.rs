use anyhow::Result;
use rollcall_core::{FaceEmbedder, HttpImageResolver, ImageResolver};
use rollcall_vision::OnnxFaceEmbedder;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        tolerance = config.tolerance,
        "rollcalld starting"
    );

    let model_dir = config.model_dir.clone();
    let timeout = config.download_timeout();
    let engine = engine::spawn_engine(config.storage_layout(), config.tolerance, move || {
        let embedder = OnnxFaceEmbedder::load(&model_dir)?;
        let resolver = HttpImageResolver::new(timeout)?;
        Ok((
            Box::new(embedder) as Box<dyn FaceEmbedder>,
            Box::new(resolver) as Box<dyn ImageResolver>,
        ))
    })
    .await?;

    let app = http::router(engine, config.max_upload_bytes());
    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
