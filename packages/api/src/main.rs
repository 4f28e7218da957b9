use anyhow::Context;
use curve_launch_api::{router, spawn_sweeper, AppState, ServiceConfig};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if not found)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("curve_launch_sdk=info".parse()?),
        )
        .init();

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    info!(
        keypairs_dir = %config.keypairs_dir.display(),
        used_keypairs_dir = %config.used_keypairs_dir.display(),
        claims_dir = %config.claims_dir.display(),
        dbc_program = %config.dbc_program_id,
        claim_ttl_secs = config.claim_ttl.as_secs(),
        pending_ttl_secs = config.pending_ttl.as_secs(),
        "Configuration loaded"
    );

    let state = AppState::from_config(&config);
    match state.store.list_available() {
        Ok(available) => info!(available = available.len(), "Co-signer keypair pool ready"),
        Err(e) => tracing::warn!(error = %e, "Keypair pool unreadable; creation requests will fail"),
    }

    let sweeper = spawn_sweeper(state.orchestrator.clone(), config.sweep_interval);
    let app = router(state, config.cors_enabled);

    let addr = config.address();
    info!(address = %addr, "Starting Curve Launch API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .context("API server error")?;

    sweeper.abort();
    Ok(())
}
