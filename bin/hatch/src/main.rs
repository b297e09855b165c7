//! hatch deploys smart contracts and verifies their sources on public networks.

mod cli;

use std::{path::Path, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, OutputFormat};
use hatch_deploy::{
    CancelHandle, DeploymentRecord, HatchConfig, ManifestStore, OrchestratorBuilder, RunReport,
    cancel_pair,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger. Records go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Deploy {
            network,
            tags,
            redeploy,
            output,
            contracts,
        } => {
            let config = HatchConfig::load(cli.config.as_deref())?;
            let planned = config.select_deployments(&tags, &contracts)?;
            if planned.is_empty() {
                anyhow::bail!("Nothing to deploy: no plan entry matches tags {:?}", tags);
            }

            let (handle, signal) = cancel_pair();
            cancel_on_ctrl_c(handle);

            let orchestrator = OrchestratorBuilder::new(config)
                .maybe_network(network)
                .redeploy(redeploy)
                .cancel(signal)
                .build()
                .await?;

            let requests = planned.iter().map(|p| orchestrator.request_for(p)).collect();
            let report = orchestrator.deploy_all(requests).await;

            print_report(&report, output)?;
            Ok(ExitCode::from(report.exit_code()))
        }

        Command::Verify { network, contracts } => {
            let config = HatchConfig::load(cli.config.as_deref())?;

            let (handle, signal) = cancel_pair();
            cancel_on_ctrl_c(handle);

            let orchestrator = OrchestratorBuilder::new(config)
                .maybe_network(network)
                .cancel(signal)
                .build()
                .await?;

            let mut report = RunReport::default();
            for contract in &contracts {
                report.records.push(orchestrator.verify_existing(contract).await);
            }

            print_report(&report, OutputFormat::Table)?;
            Ok(ExitCode::from(report.exit_code()))
        }

        Command::Networks => {
            let config = HatchConfig::load(cli.config.as_deref())?;
            print_networks(&config)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Manifest { network } => {
            let config = HatchConfig::load(cli.config.as_deref())?;
            print_manifest(&config.manifest, network.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Init { path, force } => {
            init_config(&path, force)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Trip the cancel handle on the first Ctrl+C.
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(
                "Interrupted, stopping. Transactions already broadcast may still be mined."
            );
            handle.cancel();
        }
    });
}

fn print_report(report: &RunReport, output: OutputFormat) -> Result<()> {
    for record in &report.records {
        println!(
            "{}",
            serde_json::to_string(record).context("Failed to serialize deployment record")?
        );
    }

    if output == OutputFormat::Table {
        eprintln!("{}", summary_table(&report.records));
    }

    if report.verification_failed() {
        tracing::warn!(
            "Some sources were rejected by the explorer; fix them and run `hatch verify`"
        );
    }
    if report.deployment_failed() {
        tracing::error!("Some deployments failed");
    }
    Ok(())
}

fn summary_table(records: &[DeploymentRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Contract",
        "Network",
        "Status",
        "Address",
        "Confirmations",
        "Verification",
    ]);

    for record in records {
        let status = match (&record.error, record.reused) {
            (Some(error), _) => format!("{} ({})", record.status, error),
            (None, true) => format!("{} (reused)", record.status),
            (None, false) => record.status.to_string(),
        };

        table.add_row(vec![
            record.contract_name.clone(),
            record.network.clone(),
            status,
            record
                .address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record
                .confirmations
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record
                .verification_status
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table
}

fn print_networks(config: &HatchConfig) -> Result<()> {
    let registry = config.network_registry()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network",
        "Chain ID",
        "Trust",
        "Confirmations",
        "RPC",
        "Verification",
    ]);

    for (id, profile) in registry.iter() {
        let verification = match (profile.explorer(), profile.verification_enabled()) {
            (_, true) => "enabled",
            (Some(_), false) => "no api key",
            (None, false) => "-",
        };

        let name = if *id == config.default_network {
            format!("{} (default)", id)
        } else {
            id.clone()
        };

        table.add_row(vec![
            name,
            profile.chain_id.to_string(),
            profile.trust_level.to_string(),
            profile.required_confirmations().to_string(),
            profile.rpc_url.to_string(),
            verification.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn print_manifest(path: &Path, network: Option<&str>) -> Result<()> {
    let manifest = ManifestStore::open(path).load().await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network",
        "Contract",
        "Address",
        "Transaction",
        "Block",
        "Verification",
        "Deployed at",
    ]);

    for (network_id, entries) in &manifest.networks {
        if network.is_some_and(|n| n != network_id.as_str()) {
            continue;
        }

        for (contract, entry) in entries {
            table.add_row(vec![
                network_id.clone(),
                contract.clone(),
                entry.deployment.contract_address.to_string(),
                entry.deployment.transaction_hash.to_string(),
                entry.deployment.included_in_block.to_string(),
                entry
                    .verification
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                entry.deployed_at.to_rfc3339(),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    HatchConfig::default().save_to_file(path)
}
