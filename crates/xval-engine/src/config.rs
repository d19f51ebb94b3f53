//! Pair run configuration and the validator environment protocol.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port the client's RPC endpoint listens on.
pub const CLIENT_RPC_PORT: u16 = 8545;

/// Script a client may ship to announce its node identity.
pub const IDENTITY_SCRIPT_PATH: &str = "/enode.sh";

/// Host alias handed to validators when none is configured.
pub const DEFAULT_HOST_ALIAS: &str = "hive.host";

/// Validator environment: address of the client under test.
pub const ENV_CLIENT_IP: &str = "HIVE_CLIENT_IP";

/// Validator environment: container id of the client under test.
pub const ENV_CLIENT_ID: &str = "HIVE_CLIENT_ID";

/// Validator environment: alias under which the docker host is reachable.
pub const ENV_HOST_ALIAS: &str = "HIVE_DOCKER_HOST_ALIAS";

/// Readiness probing parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Delay between probe ticks (milliseconds).
    pub poll_interval_ms: u64,

    /// Overall deadline for the client to become ready (milliseconds).
    /// `None` waits for as long as the client stays alive.
    pub timeout_ms: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            timeout_ms: None,
        }
    }
}

impl ProbeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration shared by every pair in a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// Port probed on the client.
    pub client_port: u16,

    /// Path copied from client to validator before the validator starts.
    pub identity_script: String,

    /// Value of `HIVE_DOCKER_HOST_ALIAS` in the validator.
    pub host_alias: String,

    /// Extra `KEY=VALUE` environment entries for client containers.
    pub overrides: Vec<String>,

    /// Readiness probing.
    pub probe: ProbeConfig,

    /// Deadline for the validator to finish (milliseconds). `None` waits
    /// indefinitely.
    pub validator_timeout_ms: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            client_port: CLIENT_RPC_PORT,
            identity_script: IDENTITY_SCRIPT_PATH.to_string(),
            host_alias: DEFAULT_HOST_ALIAS.to_string(),
            overrides: Vec::new(),
            probe: ProbeConfig::default(),
            validator_timeout_ms: None,
        }
    }
}

impl RunConfig {
    pub fn with_host_alias(mut self, alias: impl Into<String>) -> Self {
        self.host_alias = alias.into();
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.probe.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.probe.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_validator_timeout(mut self, timeout: Duration) -> Self {
        self.validator_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn validator_timeout(&self) -> Option<Duration> {
        self.validator_timeout_ms.map(Duration::from_millis)
    }
}

/// Check that a client override has the `KEY=VALUE` shape.
///
/// Usable directly as a `clap` value parser.
pub fn parse_override(raw: &str) -> Result<String, String> {
    match raw.split_once('=') {
        Some((key, _)) if !key.is_empty() && !key.contains(char::is_whitespace) => {
            Ok(raw.to_string())
        }
        _ => Err(format!("override must look like KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_default() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.client_port, 8545);
        assert_eq!(cfg.identity_script, "/enode.sh");
        assert_eq!(cfg.host_alias, "hive.host");
        assert!(cfg.overrides.is_empty());
        assert_eq!(cfg.probe.poll_interval(), Duration::from_millis(100));
        assert!(cfg.probe.timeout().is_none());
        assert!(cfg.validator_timeout().is_none());
    }

    #[test]
    fn test_run_config_builders() {
        let cfg = RunConfig::default()
            .with_host_alias("docker.internal")
            .with_client_port(30303)
            .with_poll_interval(Duration::from_millis(25))
            .with_readiness_timeout(Duration::from_secs(30))
            .with_validator_timeout(Duration::from_secs(600));

        assert_eq!(cfg.host_alias, "docker.internal");
        assert_eq!(cfg.client_port, 30303);
        assert_eq!(cfg.probe.poll_interval_ms, 25);
        assert_eq!(cfg.probe.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.validator_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_run_config_serde() {
        let cfg = RunConfig::default().with_overrides(vec!["HIVE_FORK_HOMESTEAD=0".into()]);
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["client_port"], 8545);
        assert_eq!(json["probe"]["poll_interval_ms"], 100);
        assert!(json["validator_timeout_ms"].is_null());

        let back: RunConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("HIVE_NETWORK_ID=1337"),
            Ok("HIVE_NETWORK_ID=1337".to_string())
        );
        assert!(parse_override("HIVE_BOOTNODE=").is_ok());
        assert!(parse_override("=value").is_err());
        assert!(parse_override("no-equals").is_err());
        assert!(parse_override("BAD KEY=1").is_err());
    }
}
