use anyhow::Result;
use sorteo_core::balance::format_amount;
use sorteo_core::provider::builtin_personas;
use sorteo_infrastructure::ConfigService;

/// Lists the built-in personas the simulated provider can sign in as.
pub fn run() -> Result<()> {
    println!("Built-in personas:");
    for persona in builtin_personas() {
        println!(
            "  {:<6} {:<6} {:<44} {:>14}",
            persona.id,
            persona.name,
            persona.wallet_address,
            format_amount(persona.balance),
        );
    }

    if !ConfigService::new().get_config().simulate_provider {
        println!();
        println!("⚠️ simulate_provider is off; personas only apply to the simulated wallet.");
    }

    Ok(())
}
