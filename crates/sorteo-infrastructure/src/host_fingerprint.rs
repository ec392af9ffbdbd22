//! Host environment fingerprint source.
//!
//! Derives a device fingerprint from ambient host properties. Screen
//! dimensions have no host equivalent, so they come from the
//! `SORTEO_DISPLAY` variable (`WIDTHxHEIGHT`) when set and default to
//! `0x0` otherwise. The stability requirement is the same as for any
//! fingerprint source: repeated captures on the same host must agree.

use sorteo_core::fingerprint::{FingerprintSnapshot, FingerprintSource};

/// Fingerprint source backed by process environment and platform constants.
pub struct HostFingerprint;

impl HostFingerprint {
    pub fn new() -> Self {
        Self
    }

    fn snapshot_from(
        display: Option<String>,
        timezone: Option<String>,
        language: Option<String>,
    ) -> FingerprintSnapshot {
        let screen = display
            .as_deref()
            .and_then(parse_display)
            .unwrap_or((0, 0));
        let timezone = timezone.unwrap_or_else(|| "UTC".to_string());
        let language = language
            .as_deref()
            .map(normalize_language)
            .unwrap_or_else(|| "en-US".to_string());

        let platform = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
        FingerprintSnapshot::new(screen, timezone, language, platform)
    }
}

impl Default for HostFingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintSource for HostFingerprint {
    fn capture(&self) -> FingerprintSnapshot {
        Self::snapshot_from(
            std::env::var("SORTEO_DISPLAY").ok(),
            std::env::var("TZ").ok(),
            std::env::var("LC_ALL")
                .or_else(|_| std::env::var("LANG"))
                .ok(),
        )
    }
}

/// Parses a `WIDTHxHEIGHT` display spec.
fn parse_display(spec: &str) -> Option<(u32, u32)> {
    let (w, h) = spec.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Converts a POSIX locale string (`en_US.UTF-8`) to a language tag (`en-US`).
fn normalize_language(locale: &str) -> String {
    let without_encoding = locale.split('.').next().unwrap_or(locale);
    without_encoding.replace('_', "-")
}
