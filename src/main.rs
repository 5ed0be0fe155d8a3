//! # azuread-provider
//!
//! Applies manifests of Azure AD applications, groups and users against
//! Microsoft Graph. See [`azuread_provider::cli`] for the commands.

use anyhow::Result;
use azuread_provider::cli::{self, Cli};
use azuread_provider::observability::{self, metrics};
use azuread_provider::ProviderConfig;
use clap::Parser;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23 needs a process-wide crypto provider before any TLS use
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("A rustls crypto provider was already installed");
    }

    let cli = Cli::parse();
    let config = ProviderConfig::from_env();
    observability::init_tracing(&config.log_level, &config.log_format);

    info!(
        "azuread-provider {} (build {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME")
    );
    debug!("Provider configuration: {config:?}");

    metrics::register_metrics()?;

    cli::run(cli, &config).await
}
