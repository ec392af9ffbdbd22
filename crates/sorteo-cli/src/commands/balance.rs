use anyhow::Result;
use sorteo_core::balance::Balance;

use crate::engine;

/// Prints the connected wallet's balance, optionally polling for updates.
pub async fn run(watch: bool) -> Result<()> {
    let engine = engine::build()?;

    let Some(connection) = engine.controller.initialize().await? else {
        engine.controller.shutdown().await;
        anyhow::bail!("not connected; run `sorteo connect` first");
    };

    let balance = engine.controller.balances().get(&connection.address).await;
    print_balance(&balance);

    if watch {
        println!("   Watching; press Ctrl-C to stop.");
        let period = engine.config.auto_refresh_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    let balance = engine.controller.balances().get(&connection.address).await;
                    print_balance(&balance);
                }
            }
        }
    }

    engine.controller.shutdown().await;
    Ok(())
}

fn print_balance(balance: &Balance) {
    match &balance.error {
        Some(error) => println!("⚠️ {} (last fetch failed: {})", balance.formatted, error),
        None => println!("💰 {} (as of {})", balance.formatted, balance.last_updated),
    }
}
