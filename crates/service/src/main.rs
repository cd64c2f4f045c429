use wallet_infra::WalletConfig;
use wallet_observability::LogConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wallet_observability::init_with(&LogConfig::from_env());

    let config = WalletConfig::from_env()?;
    tracing::info!(config = ?config, "starting wallet service");

    let service = wallet_service::build_service(&config).await?;
    let reconciler = service.reconciler().spawn();

    tracing::info!("wallet service ready");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    reconciler.shutdown().await;
    Ok(())
}
