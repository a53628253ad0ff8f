use trade_ledger_lib::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!("Starting trade-ledger {}", env!("CARGO_PKG_VERSION"));

    trade_ledger_lib::run(config).await
}
