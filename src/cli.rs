//! # CLI
//!
//! Command-line front end for applying manifests of Azure AD objects.
//!
//! ## Usage
//!
//! ```bash
//! # Create, update and delete objects to match a manifest
//! azuread-provider apply -f directory.yaml --state directory.state.json
//!
//! # Re-read everything tracked in state, dropping objects deleted out of band
//! azuread-provider refresh --state directory.state.json
//!
//! # Delete everything tracked in state
//! azuread-provider destroy --state directory.state.json
//!
//! # Run a data source
//! azuread-provider query azuread_users -f users.yaml
//!
//! # Print the JSON Schema of a resource kind or data source
//! azuread-provider schema azuread_application
//! ```
//!
//! Provider settings come from the environment, see [`ProviderConfig::from_env`].

use crate::config::{Manifest, ProviderConfig};
use crate::data_sources::DataSourceKind;
use crate::graph::auth::{build_token_source, object_id_from_token};
use crate::graph::{Directory, GraphClient, InMemoryDirectory};
use crate::observability::metrics;
use crate::plan::{count_by_kind, Executor, Report, ResourceKind};
use crate::resources::ProviderContext;
use crate::state::StateFile;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_STATE_FILE: &str = "azuread.state.json";

/// Manage Azure AD applications, groups and users from a manifest
#[derive(Debug, Parser)]
#[command(name = "azuread-provider", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long, global = true, env = "AZUREAD_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,

    /// Run against an in-memory directory instead of Microsoft Graph
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, update and delete objects to match a manifest
    Apply {
        /// Manifest listing the desired resources
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Re-read every tracked object and drop the ones that are gone
    Refresh {
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Delete every tracked object, sub-resources first
    Destroy {
        #[arg(long, default_value = DEFAULT_STATE_FILE)]
        state: PathBuf,
    },
    /// Run a data source and print its output as JSON
    Query {
        /// Data source name, e.g. `azuread_domains`
        name: String,

        /// YAML file with the query arguments; none when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the JSON Schema of a resource kind or data source
    Schema {
        /// e.g. `azuread_group` or `azuread_users`
        kind: String,
    },
}

/// Run one CLI invocation
///
/// # Errors
///
/// Fails on configuration, manifest or state file problems, and when any
/// resource in the run failed
pub async fn run(cli: Cli, config: &ProviderConfig) -> Result<()> {
    let result = match &cli.command {
        Command::Schema { kind } => print_schema(kind),
        Command::Query { name, file } => {
            let kind: DataSourceKind = name.parse().map_err(anyhow::Error::msg)?;
            let query = read_query(file.as_deref())?;
            let ctx = context(config, cli.dry_run).await?;
            let output = kind
                .query(&ctx, query)
                .await
                .with_context(|| format!("Data source {name} failed"))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Command::Apply { file, state } => {
            let manifest = Manifest::load(file)?;
            let executor = executor(config, cli.dry_run).await?;
            with_state(state, cli.dry_run, |mut tracked| async move {
                let report = executor.apply(&manifest, &mut tracked).await?;
                Ok::<_, anyhow::Error>((tracked, report))
            })
            .await
        }
        Command::Refresh { state } => {
            let executor = executor(config, cli.dry_run).await?;
            with_state(state, cli.dry_run, |mut tracked| async move {
                let report = executor.refresh(&mut tracked).await;
                Ok::<_, anyhow::Error>((tracked, report))
            })
            .await
        }
        Command::Destroy { state } => {
            let executor = executor(config, cli.dry_run).await?;
            with_state(state, cli.dry_run, |mut tracked| async move {
                let report = executor.destroy(&mut tracked).await;
                Ok::<_, anyhow::Error>((tracked, report))
            })
            .await
        }
    };

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = write_metrics(path) {
            warn!("Failed to write metrics to {}: {e:#}", path.display());
        }
    }
    result
}

/// Load state, run `operation`, save state (unless dry-run) and report
async fn with_state<F, Fut>(path: &Path, dry_run: bool, operation: F) -> Result<()>
where
    F: FnOnce(StateFile) -> Fut,
    Fut: std::future::Future<Output = Result<(StateFile, Report)>>,
{
    let tracked = if dry_run {
        StateFile::default()
    } else {
        StateFile::load(path)?
    };
    let (tracked, report) = operation(tracked).await?;

    if dry_run {
        println!("{}", serde_json::to_string_pretty(&tracked)?);
    } else {
        tracked.save(path)?;
        info!("State written to {}", path.display());
    }

    print_report(&report);
    for (kind, count) in count_by_kind(&tracked) {
        info!("{count} {kind} tracked");
    }
    if !report.is_success() {
        bail!("{} resource(s) failed", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &Report) {
    for change in &report.changes {
        eprintln!("{:<10} {} ({})", change.action, change.address, change.kind);
    }
    for failure in &report.failures {
        eprintln!("{:<10} {}: {:#}", "failed", failure.address, failure.error);
    }
}

fn print_schema(kind: &str) -> Result<()> {
    let schema = match (kind.parse::<ResourceKind>(), kind.parse::<DataSourceKind>()) {
        (Ok(resource), _) => resource.schema(),
        (_, Ok(data_source)) => data_source.schema(),
        (Err(e), Err(_)) => bail!(e),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn read_query(file: Option<&Path>) -> Result<Value> {
    let Some(path) = file else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_yaml::from_str(&content).with_context(|| format!("Invalid query {}", path.display()))
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = metrics::gather_text()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

async fn executor(config: &ProviderConfig, dry_run: bool) -> Result<Executor> {
    Ok(Executor::new(context(config, dry_run).await?, config.max_concurrency))
}

/// Provider context over Graph, or over an empty in-memory directory for dry runs
async fn context(config: &ProviderConfig, dry_run: bool) -> Result<ProviderContext> {
    if dry_run {
        info!("Dry run: using an in-memory directory, state will not be written");
        let directory: Arc<dyn Directory> = Arc::new(InMemoryDirectory::new());
        return Ok(ProviderContext::from_config(directory, config));
    }

    let tokens = build_token_source(config)?;
    let object_id = match tokens.token().await {
        Ok(token) => object_id_from_token(&token),
        Err(e) => {
            warn!("Could not obtain an access token up front: {e}");
            None
        }
    };

    let client = GraphClient::new(config, tokens)?;
    info!("Using Microsoft Graph at {}", client.base_url());
    let directory: Arc<dyn Directory> = Arc::new(client);

    let mut ctx = ProviderContext::from_config(directory, config);
    ctx.object_id = object_id;
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_apply() {
        let cli = Cli::try_parse_from([
            "azuread-provider",
            "apply",
            "-f",
            "directory.yaml",
            "--state",
            "s.json",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Command::Apply { file, state } => {
                assert_eq!(file, PathBuf::from("directory.yaml"));
                assert_eq!(state, PathBuf::from("s.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_state_defaults() {
        let cli = Cli::try_parse_from(["azuread-provider", "destroy"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Destroy { ref state } if state == Path::new(DEFAULT_STATE_FILE)
        ));
    }

    #[test]
    fn test_read_query_defaults_to_empty_mapping() {
        assert_eq!(read_query(None).unwrap(), serde_json::json!({}));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.yaml");
        std::fs::write(&path, "user_principal_names: [alice@example.com]\n").unwrap();
        assert_eq!(
            read_query(Some(&path)).unwrap(),
            serde_json::json!({ "user_principal_names": ["alice@example.com"] })
        );
    }

    #[tokio::test]
    async fn test_dry_run_apply_leaves_state_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("directory.yaml");
        let state = dir.path().join("state.json");
        std::fs::write(
            &manifest,
            "resources:\n  - address: group.ops\n    kind: azuread_group\n    config:\n      display_name: ops\n",
        )
        .unwrap();

        let config = ProviderConfig {
            replication: crate::replication::ReplicationPolicy::immediate(3),
            ..ProviderConfig::default()
        };
        let cli = Cli {
            command: Command::Apply {
                file: manifest,
                state: state.clone(),
            },
            metrics_file: None,
            dry_run: true,
        };
        run(cli, &config).await.unwrap();
        assert!(!state.exists());
    }
}
