use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings read once at startup. Grading policy lives in the workspace
/// `settings` table instead.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub workspace: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let workspace = lookup("CENTRALIZERD_WORKSPACE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let busy_timeout = lookup("CENTRALIZERD_BUSY_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);
        let log_filter = lookup("CENTRALIZERD_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.log_filter);
        let log_json = lookup("CENTRALIZERD_LOG_JSON")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.log_json);
        Self {
            workspace,
            busy_timeout,
            log_filter,
            log_json,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> DaemonConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config_from(&[]), DaemonConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let cfg = config_from(&[
            ("CENTRALIZERD_WORKSPACE", "/tmp/ws"),
            ("CENTRALIZERD_BUSY_TIMEOUT_MS", "250"),
            ("CENTRALIZERD_LOG", "centralizerd=debug"),
            ("CENTRALIZERD_LOG_JSON", "yes"),
        ]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.log_filter, "centralizerd=debug");
        assert!(cfg.log_json);
    }

    #[test]
    fn malformed_values_fall_back() {
        let cfg = config_from(&[
            ("CENTRALIZERD_WORKSPACE", "  "),
            ("CENTRALIZERD_BUSY_TIMEOUT_MS", "soon"),
            ("CENTRALIZERD_LOG_JSON", "maybe"),
        ]);
        assert_eq!(cfg.workspace, None);
        assert_eq!(
            cfg.busy_timeout,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
        assert!(!cfg.log_json);
    }
}
