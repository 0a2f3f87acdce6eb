//! Engine connection and tunable-limit configuration.
//!
//! `EngineConfig` is populated from `SG_ENGINE_*` environment variables (spec §6) via
//! clap's `env` attribute so the same struct doubles as CLI flags and env-var defaults.
//! `EngineLimits` resolves the Open Questions in spec §9 (DIFF-chain compaction
//! threshold, network retry policy) as configuration rather than hardcoded constants.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

/// Connection parameters for the live SQL engine holding tracked tables.
#[derive(Args, Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    #[arg(long, env = "SG_ENGINE_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "SG_ENGINE_PORT", default_value_t = 5432)]
    pub port: u16,

    #[arg(long, env = "SG_ENGINE_USER", default_value = "tablegraph")]
    pub user: String,

    #[arg(long, env = "SG_ENGINE_PWD", default_value = "")]
    pub password: String,

    #[arg(long, env = "SG_ENGINE_DB_NAME", default_value = "tablegraph")]
    pub db_name: String,
}

impl PartialEq for EngineConfig {
    fn eq(&self, other: &Self) -> bool {
        self.to_conn_string() == other.to_conn_string()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "tablegraph".to_string(),
            password: String::new(),
            db_name: "tablegraph".to_string(),
        }
    }
}

impl EngineConfig {
    /// `user:pwd@host:port/db`, the wire form used in Splitfile `FROM` connection
    /// strings (spec §4.5 grammar) and CLI `upstream --set` targets.
    pub fn to_conn_string(&self) -> String {
        format!(
            "{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db_name
        )
    }

    pub fn parse_conn_string(s: &str) -> Option<Self> {
        let (userpass, hostportdb) = s.split_once('@')?;
        let (user, password) = userpass.split_once(':')?;
        let (hostport, db_name) = hostportdb.split_once('/')?;
        let (host, port) = hostport.split_once(':')?;
        Some(EngineConfig {
            host: host.to_string(),
            port: port.parse().ok()?,
            user: user.to_string(),
            password: password.to_string(),
            db_name: db_name.to_string(),
        })
    }
}

/// Tunable limits that spec §9 explicitly asks to be configured rather than invented.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineLimits {
    /// Once a table's DIFF chain exceeds this many entries, the next commit writes a
    /// fresh SNAP instead of appending another DIFF (spec §4.3, "optional policy").
    pub diff_chain_limit: usize,

    /// Per-request network timeout for sync operations (spec §5).
    #[serde(with = "duration_secs")]
    pub network_timeout: Duration,

    /// Number of retries for a failed network operation before it surfaces to the
    /// caller (spec §5, default 3).
    pub network_retries: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            diff_chain_limit: 32,
            network_timeout: Duration::from_secs(30),
            network_retries: 3,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_string_roundtrip() {
        let cfg = EngineConfig {
            host: "db.example.com".to_string(),
            port: 5433,
            user: "alice".to_string(),
            password: "s3cret".to_string(),
            db_name: "warehouse".to_string(),
        };
        let s = cfg.to_conn_string();
        assert_eq!(s, "alice:s3cret@db.example.com:5433/warehouse");
        let parsed = EngineConfig::parse_conn_string(&s).unwrap();
        assert_eq!(parsed.host, cfg.host);
        assert_eq!(parsed.port, cfg.port);
        assert_eq!(parsed.user, cfg.user);
        assert_eq!(parsed.db_name, cfg.db_name);
    }

    #[test]
    fn default_limits_are_sane() {
        let limits = EngineLimits::default();
        assert_eq!(limits.network_retries, 3);
        assert!(limits.diff_chain_limit > 0);
    }
}
