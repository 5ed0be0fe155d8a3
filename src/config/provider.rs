//! # Provider Configuration
//!
//! Runtime configuration for the provider, loaded from environment variables.
//! Every setting has a default from [`crate::constants`].

use crate::constants::{
    DEFAULT_GRAPH_API_VERSION, DEFAULT_GRAPH_ENDPOINT, DEFAULT_HTTP_MAX_RETRIES,
    DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_LOGIN_ENDPOINT, DEFAULT_MAX_CONCURRENCY, DEFAULT_REPLICATION_CONSECUTIVE_SUCCESSES,
    DEFAULT_REPLICATION_MAX_ATTEMPTS, DEFAULT_REPLICATION_MAX_DELAY_MS,
    DEFAULT_REPLICATION_MIN_DELAY_MS,
};
use crate::graph::models::Sensitive;
use crate::replication::ReplicationPolicy;
use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

/// National cloud the tenant lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloudEnvironment {
    #[default]
    Global,
    UsGovernment,
    China,
    Germany,
}

impl CloudEnvironment {
    #[must_use]
    pub fn login_endpoint(self) -> &'static str {
        match self {
            Self::Global => DEFAULT_LOGIN_ENDPOINT,
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::China => "https://login.chinacloudapi.cn",
            Self::Germany => "https://login.microsoftonline.de",
        }
    }

    #[must_use]
    pub fn graph_endpoint(self) -> &'static str {
        match self {
            Self::Global => DEFAULT_GRAPH_ENDPOINT,
            Self::UsGovernment => "https://graph.microsoft.us",
            Self::China => "https://microsoftgraph.chinacloudapi.cn",
            Self::Germany => "https://graph.microsoft.de",
        }
    }
}

impl FromStr for CloudEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "global" | "public" => Ok(Self::Global),
            "usgovernment" | "usgov" => Ok(Self::UsGovernment),
            "china" => Ok(Self::China),
            "germany" => Ok(Self::Germany),
            other => Err(format!(
                "unknown environment '{other}', expected one of: global, usgovernment, china, germany"
            )),
        }
    }
}

/// Provider configuration
#[derive(Clone)]
pub struct ProviderConfig {
    /// Directory (tenant) ID
    pub tenant_id: String,

    /// Application (client) ID used for authentication
    pub client_id: String,

    /// Client secret for the client-credentials flow
    pub client_secret: Option<Sensitive>,

    pub environment: CloudEnvironment,

    /// Overrides the environment's Graph endpoint (e.g. a local mock)
    pub graph_endpoint: Option<String>,

    /// Pre-issued bearer token, skips every credential flow
    pub access_token: Option<Sensitive>,

    /// Use the federated token projected into the pod instead of a secret
    pub use_workload_identity: bool,

    /// Per-request timeout in seconds
    pub http_timeout_secs: u64,

    /// Transport-level retries of throttled requests
    pub http_max_retries: u32,

    pub replication: ReplicationPolicy,

    /// Resources applied concurrently by the CLI
    pub max_concurrency: usize,

    pub log_level: String,

    /// `text` or `json`
    pub log_format: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("environment", &self.environment)
            .field("graph_endpoint", &self.graph_endpoint)
            .field("use_workload_identity", &self.use_workload_identity)
            .field("replication", &self.replication)
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            environment: CloudEnvironment::Global,
            graph_endpoint: None,
            access_token: None,
            use_workload_identity: false,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_max_retries: DEFAULT_HTTP_MAX_RETRIES,
            replication: ReplicationPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Load configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(lookup);

        let environment = env
            .get("ARM_ENVIRONMENT")
            .and_then(|v| match v.parse() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!("Ignoring ARM_ENVIRONMENT: {e}");
                    None
                }
            })
            .unwrap_or_default();

        let min_delay_ms =
            env.or_default("REPLICATION_MIN_DELAY_MS", DEFAULT_REPLICATION_MIN_DELAY_MS);
        let max_delay_ms =
            env.or_default("REPLICATION_MAX_DELAY_MS", DEFAULT_REPLICATION_MAX_DELAY_MS);

        Self {
            tenant_id: env.or_default_str("ARM_TENANT_ID", ""),
            client_id: env.or_default_str("ARM_CLIENT_ID", ""),
            client_secret: env.get("ARM_CLIENT_SECRET").map(Sensitive::from),
            environment,
            graph_endpoint: env.get("AZUREAD_GRAPH_ENDPOINT"),
            access_token: env.get("AZUREAD_ACCESS_TOKEN").map(Sensitive::from),
            use_workload_identity: env.or_default_bool("AZUREAD_USE_WORKLOAD_IDENTITY", false),
            http_timeout_secs: env
                .or_default("AZUREAD_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            http_max_retries: env.or_default("AZUREAD_HTTP_MAX_RETRIES", DEFAULT_HTTP_MAX_RETRIES),
            replication: ReplicationPolicy {
                max_attempts: env
                    .or_default("REPLICATION_MAX_ATTEMPTS", DEFAULT_REPLICATION_MAX_ATTEMPTS),
                min_delay: Duration::from_millis(min_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                consecutive_successes: env.or_default(
                    "REPLICATION_CONSECUTIVE_SUCCESSES",
                    DEFAULT_REPLICATION_CONSECUTIVE_SUCCESSES,
                ),
            },
            max_concurrency: env.or_default("MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY).max(1),
            log_level: env.or_default_str("LOG_LEVEL", "info"),
            log_format: env.or_default_str("LOG_FORMAT", "text"),
        }
    }

    /// Graph base URL including the API version, without a trailing slash
    #[must_use]
    pub fn graph_base_url(&self) -> String {
        let endpoint = self
            .graph_endpoint
            .as_deref()
            .unwrap_or_else(|| self.environment.graph_endpoint())
            .trim_end_matches('/');
        format!("{endpoint}/{DEFAULT_GRAPH_API_VERSION}")
    }

    /// Graph endpoint without the API version, used for the token scope
    #[must_use]
    pub fn graph_resource(&self) -> String {
        self.graph_endpoint
            .as_deref()
            .unwrap_or_else(|| self.environment.graph_endpoint())
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

struct EnvLookup<F>(F);

impl<F> EnvLookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a variable, falling back to `default` when unset or unparsable
    fn or_default<T: FromStr>(&self, key: &str, default: T) -> T
    where
        <T as FromStr>::Err: Debug,
    {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn or_default_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| {
                let v = v.to_lowercase();
                v == "true" || v == "1" || v == "yes" || v == "on"
            })
            .unwrap_or(default)
    }

    fn or_default_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ProviderConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ProviderConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.environment, CloudEnvironment::Global);
        assert_eq!(config.replication, ReplicationPolicy::default());
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.graph_base_url(), "https://graph.microsoft.com/v1.0");
        assert!(config.client_secret.is_none());
        assert!(!config.use_workload_identity);
    }

    #[test]
    fn test_reads_credentials_and_environment() {
        let config = config_from(&[
            ("ARM_TENANT_ID", "tenant"),
            ("ARM_CLIENT_ID", "client"),
            ("ARM_CLIENT_SECRET", "s3cret"),
            ("ARM_ENVIRONMENT", "usgovernment"),
            ("AZUREAD_USE_WORKLOAD_IDENTITY", "yes"),
        ]);
        assert_eq!(config.tenant_id, "tenant");
        assert_eq!(config.client_id, "client");
        assert_eq!(config.client_secret.as_ref().map(Sensitive::expose), Some("s3cret"));
        assert_eq!(config.environment, CloudEnvironment::UsGovernment);
        assert!(config.use_workload_identity);
        assert_eq!(config.graph_base_url(), "https://graph.microsoft.us/v1.0");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_graph_endpoint_override() {
        let config = config_from(&[("AZUREAD_GRAPH_ENDPOINT", "http://127.0.0.1:9000/")]);
        assert_eq!(config.graph_base_url(), "http://127.0.0.1:9000/v1.0");
        assert_eq!(config.graph_resource(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_replication_policy_from_env() {
        let config = config_from(&[
            ("REPLICATION_MAX_ATTEMPTS", "5"),
            ("REPLICATION_MIN_DELAY_MS", "200"),
            ("REPLICATION_MAX_DELAY_MS", "800"),
            ("REPLICATION_CONSECUTIVE_SUCCESSES", "3"),
        ]);
        assert_eq!(config.replication.max_attempts, 5);
        assert_eq!(config.replication.min_delay, Duration::from_millis(200));
        assert_eq!(config.replication.max_delay, Duration::from_millis(800));
        assert_eq!(config.replication.consecutive_successes, 3);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = config_from(&[
            ("REPLICATION_MAX_ATTEMPTS", "many"),
            ("ARM_ENVIRONMENT", "mars"),
            ("MAX_CONCURRENCY", "0"),
        ]);
        assert_eq!(config.replication.max_attempts, DEFAULT_REPLICATION_MAX_ATTEMPTS);
        assert_eq!(config.environment, CloudEnvironment::Global);
        assert_eq!(config.max_concurrency, 1);
    }
}
