//! Built-in persona roster.
//!
//! Deterministic profiles covering the situations the UI needs to exercise:
//! an established player, a first-time user with a small balance, and a
//! high-balance account.

use super::persona::Persona;

/// Address for the Luna persona (fixed so sessions restore across runs).
const LUNA_ADDRESS: &str = "0x4b2ca2f8f508f9cd4707a6ab01eb0d5e87aa9c11";

/// Address for the Remy persona.
const REMY_ADDRESS: &str = "0x91d7ac233ce5ff230a0f92dd7b2b7e5a5a3f60d4";

/// Address for the Vera persona.
const VERA_ADDRESS: &str = "0xe0c86aa45f2bd1954e68b4457f082f2b3c2a88e7";

/// Returns the built-in simulated identity profiles.
pub fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona {
            id: "luna".to_string(),
            name: "Luna".to_string(),
            wallet_address: LUNA_ADDRESS.to_string(),
            username: "luna.eth".to_string(),
            balance: 100.0,
        },
        Persona {
            id: "remy".to_string(),
            name: "Remy".to_string(),
            wallet_address: REMY_ADDRESS.to_string(),
            username: "remy_plays".to_string(),
            balance: 2.5,
        },
        Persona {
            id: "vera".to_string(),
            name: "Vera".to_string(),
            wallet_address: VERA_ADDRESS.to_string(),
            username: "vera.world".to_string(),
            balance: 15_000.0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_ids_and_addresses_unique() {
        let personas = builtin_personas();
        for (i, a) in personas.iter().enumerate() {
            for b in personas.iter().skip(i + 1) {
                assert_ne!(a.id, b.id);
                assert_ne!(a.wallet_address, b.wallet_address);
            }
        }
    }
}
