//! Log setup. The configured level applies to the intermediary's own crates
//! and the HTTP trace spans; every other dependency logs at `warn`.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const OWN_TARGETS: [&str; 5] = [
    "rems_server",
    "rems_core",
    "rems_storage",
    "rems_db_memory",
    "tower_http",
];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Filter directives for `level`, e.g. `warn,rems_server=debug,...`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level == "off" {
        return level;
    }
    OWN_TARGETS
        .iter()
        .fold(String::from("warn"), |mut acc, target| {
            acc.push(',');
            acc.push_str(target);
            acc.push('=');
            acc.push_str(&level);
            acc
        })
}

fn env_override() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Installs the global subscriber at `info` until the config is loaded.
pub fn init_tracing() {
    let filter = env_override().unwrap_or_else(|| EnvFilter::new(filter_directives("info")));
    let (filter, handle) = reload::Layer::new(filter);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switches to the configured level. `RUST_LOG`, when set, keeps priority.
/// Returns whether the filter changed.
pub fn apply_logging_level(level: &str) -> bool {
    if std::env::var_os("RUST_LOG").is_some() {
        return false;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    handle
        .modify(|filter| *filter = EnvFilter::new(filter_directives(level)))
        .is_ok()
}
