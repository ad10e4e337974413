use quiz_grader::{build_state, config::Config, routes::build_router};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = config.bind_addr().parse()?;
    let state = build_state(config).await?;
    let _sweeper = state.spawn_revocation_sweep();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("backend listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
