//! Default configuration values - single source of truth

/// Name under which a client is registered when none is given
pub const CLIENT_NAME: &str = "default";

/// Hooks per scope before a leak warning is logged
pub const MAX_HOOK_HANDLERS: usize = 10;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TXPROP";

/// Config file looked up when no path is given
pub const CONFIG_FILE: &str = "txprop";

/// Log filter directive when neither `RUST_LOG` nor `log_level` is set
pub const LOG_LEVEL: &str = "warn";
