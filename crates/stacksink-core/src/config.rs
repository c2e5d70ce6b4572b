//! Ingestion configuration.
//!
//! Parsed once from the environment at startup and passed by value into the
//! server; there is no global state.

use crate::error::IngestError;

/// Operating mode of the API process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiMode {
    /// Read/write: run the event server and serve queries.
    #[default]
    Default,
    /// Queries only; the event server must not run.
    ReadOnly,
    /// Event ingestion only.
    WriteOnly,
    /// No node connection at all.
    Offline,
}

impl ApiMode {
    /// Whether this mode ingests node events.
    pub fn ingests(self) -> bool {
        matches!(self, Self::Default | Self::WriteOnly)
    }
}

impl std::fmt::Display for ApiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::ReadOnly => write!(f, "readonly"),
            Self::WriteOnly => write!(f, "writeonly"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Immutable configuration for the event ingestion core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Interface the event server binds to.
    pub host: String,
    pub port: u16,
    /// Expected network chain id; every decoded transaction is checked
    /// against it.
    pub chain_id: u32,
    pub mode: ApiMode,
    /// Postgres connection string; `None` selects the in-memory store.
    pub db_url: Option<String>,
}

impl IngestConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Read configuration through a lookup function (tests inject maps).
    pub fn from_source<F>(get: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = get("STACKS_CORE_EVENT_HOST")
            .ok_or_else(|| IngestError::Config("STACKS_CORE_EVENT_HOST is required".into()))?;
        let host = host
            .trim()
            .strip_prefix("http://")
            .or_else(|| host.trim().strip_prefix("http:"))
            .unwrap_or(host.trim())
            .trim_matches('/')
            .to_string();
        if host.is_empty() {
            return Err(IngestError::Config(
                "STACKS_CORE_EVENT_HOST must not be empty".into(),
            ));
        }

        let port_raw = get("STACKS_CORE_EVENT_PORT")
            .ok_or_else(|| IngestError::Config("STACKS_CORE_EVENT_PORT is required".into()))?;
        let port: u16 = port_raw.trim().parse().map_err(|e| {
            IngestError::Config(format!("STACKS_CORE_EVENT_PORT {port_raw:?}: {e}"))
        })?;

        let chain_raw = get("STACKS_CHAIN_ID")
            .ok_or_else(|| IngestError::Config("STACKS_CHAIN_ID is required".into()))?;
        let chain_id = parse_chain_id(&chain_raw)?;

        let mode = match get("STACKS_API_MODE").as_deref().map(str::trim) {
            Some("default") | None => {
                // Legacy flags, kept for backwards compatibility.
                if flag_set(get("STACKS_API_OFFLINE_MODE")) {
                    ApiMode::Offline
                } else if flag_set(get("STACKS_READ_ONLY_MODE")) {
                    ApiMode::ReadOnly
                } else {
                    ApiMode::Default
                }
            }
            Some("readonly") => ApiMode::ReadOnly,
            Some("writeonly") => ApiMode::WriteOnly,
            Some("offline") => ApiMode::Offline,
            Some(other) => {
                return Err(IngestError::Config(format!(
                    "STACKS_API_MODE {other:?} is not one of default/readonly/writeonly/offline"
                )))
            }
        };

        Ok(Self {
            host,
            port,
            chain_id,
            mode,
            db_url: get("DATABASE_URL"),
        })
    }
}

fn parse_chain_id(raw: &str) -> Result<u32, IngestError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16)
        .map_err(|e| IngestError::Config(format!("STACKS_CHAIN_ID {raw:?}: {e}")))
}

fn flag_set(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn parses_minimal_config() {
        let cfg = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "0.0.0.0"),
            ("STACKS_CORE_EVENT_PORT", "3700"),
            ("STACKS_CHAIN_ID", "0x00000001"),
        ]))
        .unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3700);
        assert_eq!(cfg.chain_id, 1);
        assert_eq!(cfg.mode, ApiMode::Default);
        assert!(cfg.db_url.is_none());
    }

    #[test]
    fn strips_http_scheme_from_host() {
        let cfg = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "http://127.0.0.1"),
            ("STACKS_CORE_EVENT_PORT", "3700"),
            ("STACKS_CHAIN_ID", "0x80000000"),
        ]))
        .unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.chain_id, 0x8000_0000);
    }

    #[test]
    fn missing_host_is_a_config_error() {
        let err = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_PORT", "3700"),
            ("STACKS_CHAIN_ID", "0x1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn legacy_flags_select_modes() {
        let cfg = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "h"),
            ("STACKS_CORE_EVENT_PORT", "1"),
            ("STACKS_CHAIN_ID", "0x1"),
            ("STACKS_READ_ONLY_MODE", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.mode, ApiMode::ReadOnly);
        assert!(!cfg.mode.ingests());

        let cfg = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "h"),
            ("STACKS_CORE_EVENT_PORT", "1"),
            ("STACKS_CHAIN_ID", "0x1"),
            ("STACKS_API_OFFLINE_MODE", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.mode, ApiMode::Offline);
    }

    #[test]
    fn explicit_mode_wins_over_legacy_flags() {
        let cfg = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "h"),
            ("STACKS_CORE_EVENT_PORT", "1"),
            ("STACKS_CHAIN_ID", "0x1"),
            ("STACKS_API_MODE", "writeonly"),
            ("STACKS_READ_ONLY_MODE", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.mode, ApiMode::WriteOnly);
        assert!(cfg.mode.ingests());
    }

    #[test]
    fn bad_mode_rejected() {
        let err = IngestConfig::from_source(source(&[
            ("STACKS_CORE_EVENT_HOST", "h"),
            ("STACKS_CORE_EVENT_PORT", "1"),
            ("STACKS_CHAIN_ID", "0x1"),
            ("STACKS_API_MODE", "turbo"),
        ]))
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
