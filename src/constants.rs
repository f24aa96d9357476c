// Defaults for the broker, transport and generator. Values that are
// environment-specific are read once from the environment (after `.env`
// has been loaded by main) and fall back to sensible defaults.

use std::env;

pub const API_DELAY_MS: u64 = 3000; // Free-tier friendly pause between file generations
pub const MAX_ATTEMPTS: u32 = 5;
pub const DEBOUNCE_MS: u64 = 1000;
pub const BACKOFF_BASE_MS: u64 = 1000;
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Keys shorter than this are almost certainly placeholders.
pub const MIN_API_KEY_LEN: usize = 30;

lazy_static::lazy_static! {
    pub static ref GEMINI_API_KEY: String = env::var("GEMINI_API_KEY").unwrap_or_default();
    pub static ref GEMINI_MODEL: String = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-exp".to_string());
    pub static ref GEMINI_BASE_URL: String = env::var("GEMINI_BASE_URL").unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref PROJECTS_DIR: String = env::var("BLUEPRINT_PROJECTS_DIR").unwrap_or_else(|_| "projectsByBlueprint".to_string());
}

/// Returns true when the key looks like a real Gemini key rather than a
/// missing value or a placeholder such as `YOUR_API_KEY_HERE`.
pub fn api_key_looks_valid(key: &str) -> bool {
    !key.is_empty() && key != "YOUR_API_KEY_HERE" && key.len() >= MIN_API_KEY_LEN
}
