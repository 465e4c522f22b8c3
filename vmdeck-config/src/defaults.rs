//! Default value functions for configuration.
//!
//! Each function is used as a `#[serde(default = "crate::defaults::...")]`
//! attribute on an [`EngineConfig`](crate::EngineConfig) field.

// ── Platform ───────────────────────────────────────────────────────────────

/// Whether the emulator reports paused/waiting edges on this platform.
///
/// Linux builds of the emulator never send the waiting/paused notifications.
pub fn pause_events() -> bool {
    !cfg!(target_os = "linux")
}

// ── Throttling ─────────────────────────────────────────────────────────────

/// Debounce interval when the platform reports pause edges.
pub const DEBOUNCE_WITH_PAUSE_EVENTS_MS: u64 = 250;

/// Debounce interval when it does not.
pub const DEBOUNCE_WITHOUT_PAUSE_EVENTS_MS: u64 = 75;

pub fn running_size_check_ms() -> u64 {
    60_000
}

pub fn clock_tick_secs() -> u64 {
    30
}

// ── Limits ─────────────────────────────────────────────────────────────────

/// Anything larger than this is not an emulator config file.
pub fn max_config_bytes() -> u64 {
    16 * 1024
}

// ── Watcher ────────────────────────────────────────────────────────────────

pub fn poll_fallback_ms() -> u64 {
    500
}
