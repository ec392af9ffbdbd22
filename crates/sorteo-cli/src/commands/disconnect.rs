use anyhow::Result;

use crate::engine;

/// Signs out and clears the stored session.
pub async fn run() -> Result<()> {
    let engine = engine::build()?;

    let resumed = engine.controller.initialize().await?;
    if resumed.is_none() && engine.controller.sessions().current().await.is_none() {
        println!("⚪ Nothing to disconnect");
        engine.controller.shutdown().await;
        return Ok(());
    }

    engine.controller.disconnect().await?;
    println!("✅ Disconnected; session cleared");

    engine.controller.shutdown().await;
    Ok(())
}
