//! # Constants
//!
//! Shared constants used throughout the provider.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Microsoft Graph endpoint for the global Azure cloud
pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com";

/// Azure AD login endpoint for the global Azure cloud
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Microsoft Graph API version used for every request
pub const DEFAULT_GRAPH_API_VERSION: &str = "v1.0";

/// Default HTTP request timeout (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Maximum retries for throttled (429) or unavailable (502/503/504) Graph responses
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;

/// Initial delay between transport-level retries (milliseconds)
pub const DEFAULT_HTTP_RETRY_START_MS: u64 = 500;

/// Maximum delay between transport-level retries (milliseconds)
pub const DEFAULT_HTTP_RETRY_MAX_MS: u64 = 8_000;

/// Attempts made by the replication waiter before giving up
pub const DEFAULT_REPLICATION_MAX_ATTEMPTS: u32 = 30;

/// First delay between replication probes (milliseconds)
pub const DEFAULT_REPLICATION_MIN_DELAY_MS: u64 = 1_000;

/// Cap on the delay between replication probes (milliseconds)
pub const DEFAULT_REPLICATION_MAX_DELAY_MS: u64 = 10_000;

/// Consecutive successful probes required before an object counts as replicated
pub const DEFAULT_REPLICATION_CONSECUTIVE_SUCCESSES: u32 = 1;

/// Maximum resources applied concurrently by the CLI
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default state file written by `apply` and read by `refresh`/`destroy`
pub const DEFAULT_STATE_FILE: &str = "azuread.state.json";

/// Grace period before a cached client-secret token is refreshed (seconds)
pub const TOKEN_REFRESH_GRACE_SECS: i64 = 300;

/// Maximum length of an app role or permission scope claim value
pub const MAX_CLAIM_VALUE_LEN: usize = 120;

/// Maximum length of a user password accepted by Azure AD
pub const MAX_USER_PASSWORD_LEN: usize = 256;

/// Maximum length of an application password credential
pub const MAX_APPLICATION_PASSWORD_LEN: usize = 863;
