use anyhow::Result;

use crate::engine;

/// Connects the wallet, persisting the session for later invocations.
pub async fn run(persona: Option<String>) -> Result<()> {
    let engine = engine::build()?;

    if let Some(id) = &persona {
        match &engine.simulated {
            Some(sim) => {
                let persona = sim.switch_persona(id)?;
                println!("👤 Signing in as {} ({})", persona.name, persona.wallet_address);
            }
            None => {
                engine.controller.shutdown().await;
                anyhow::bail!("--persona requires simulate_provider = true in the config");
            }
        }
    }

    if let Some(connection) = engine.controller.initialize().await? {
        println!("✅ Already connected as {}", connection.address);
        println!("   Run `sorteo disconnect` first to switch wallets.");
        engine.controller.shutdown().await;
        return Ok(());
    }

    println!("🔌 Connecting wallet...");
    let outcome = engine.controller.connect().await;
    engine.controller.shutdown().await;

    match outcome {
        Ok(connection) => {
            println!("✅ Connected as {}", connection.address);
            println!("   Session saved; `sorteo status` shows it.");
            Ok(())
        }
        Err(report) => {
            println!("❌ Connect failed: {}", report.message);
            if report.retryable {
                println!("   This looks transient; try again.");
            }
            anyhow::bail!("connect failed ({})", report.code)
        }
    }
}
