use anyhow::Result;

use crate::engine;

/// Prints the connection state and the stored session, when one exists.
pub async fn run() -> Result<()> {
    let engine = engine::build()?;

    match engine.controller.initialize().await? {
        Some(connection) => {
            println!("✅ Connected as {}", connection.address);
            println!("   Connected at: {}", connection.connected_at);
            if let Some(refreshed) = connection.last_refresh_at {
                println!("   Refreshed at: {}", refreshed);
            }
            if let Some(session) = engine.controller.sessions().current().await {
                println!("   Session id:   {}", session.session_id);
                println!("   Expires at:   {}", session.expires_at);
                if let Some(persona) = session.mock_user_id {
                    println!("   Persona:      {}", persona);
                }
            }
        }
        None => match engine.controller.sessions().current().await {
            Some(session) => {
                println!("⏸️ Session for {} (auto-connect off)", session.wallet_address);
                println!("   Run `sorteo connect` to resume it.");
            }
            None => match engine.controller.last_error() {
                Some(report) => println!("❌ Not connected: {}", report.message),
                None => println!("⚪ Not connected"),
            },
        },
    }

    engine.controller.shutdown().await;
    Ok(())
}
