//! Tuning knobs for the callback engine.

use std::time::Duration;

use serde::Deserialize;

/// Engine configuration, loadable from the server's TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CallbackConfig {
    /// Lease duration granted to clients, in seconds. The backchannel RPC
    /// timeout derives from it.
    pub lease_secs: u32,
    /// Pause before retrying a callback the client answered with
    /// NFS4ERR_DELAY, in seconds.
    pub delay_retry_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { lease_secs: 90, delay_retry_secs: 2 }
    }
}

impl CallbackConfig {
    /// Parses a `[callback]`-style TOML fragment. Missing keys keep their
    /// defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Per-call RPC timeout toward the client: a tenth of the lease, at
    /// least one second. There are no transport-level retries.
    ///
    /// Leases are capped at one hour elsewhere in the server; a larger
    /// value here falls back to a fixed six minutes.
    pub fn rpc_timeout(&self) -> Duration {
        if self.lease_secs > 3600 {
            return Duration::from_secs(360);
        }
        Duration::from_secs(u64::from((self.lease_secs / 10).max(1)))
    }

    /// Pause between DELAY-answered attempts.
    pub fn delay_retry(&self) -> Duration {
        Duration::from_secs(self.delay_retry_secs)
    }
}
