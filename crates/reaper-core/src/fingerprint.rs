//! Browser identity presented to target sites.

use rand::seq::IndexedRandom;

use crate::traits::{SessionConfig, Viewport};

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub const VIEWPORT: Viewport = Viewport {
    width: 1920,
    height: 1080,
};

pub const LOCALE: &str = "en-US";
pub const TIMEZONE: &str = "America/New_York";

/// Selectors whose presence means the page is a CAPTCHA challenge.
pub const CAPTCHA_SELECTORS: &[&str] = &[
    "[data-captcha]",
    ".captcha",
    "#captcha",
    ".g-recaptcha",
    ".h-captcha",
    "iframe[src*=\"captcha\"]",
    "iframe[src*=\"recaptcha\"]",
];

/// Session settings for one attempt: a random user agent and the fixed
/// viewport, locale, and timezone.
pub fn session_config(proxy: Option<String>) -> SessionConfig {
    SessionConfig {
        user_agent: random_user_agent().to_string(),
        viewport: VIEWPORT,
        locale: LOCALE.to_string(),
        timezone: TIMEZONE.to_string(),
        proxy,
        stealth: true,
    }
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}
