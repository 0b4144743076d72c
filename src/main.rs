use slotmatch::{router, AppState, Config, Database};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter)?)
        .init();

    let db = Database::open(&config.database)?;
    let listen = config.listen;
    let app = router(AppState::new(db, config)?);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(event = "listening", addr = %listen);
    axum::serve(listener, app).await?;
    Ok(())
}
