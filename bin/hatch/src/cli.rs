use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Output format of deployment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    /// One JSON object per deployment on stdout.
    Json,
    /// JSON records followed by a summary table.
    Table,
}

#[derive(Parser)]
#[command(name = "hatch")]
#[command(
    author,
    version,
    about = "Deploy smart contracts and verify their sources on block explorers"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "HATCH_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the Hatch.toml configuration file (or a directory containing one).
    #[arg(long, alias = "conf", global = true, env = "HATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy contracts from the deployment plan.
    Deploy {
        /// Target network. Defaults to the configured default network.
        #[arg(short, long, env = "HATCH_NETWORK")]
        network: Option<String>,

        /// Only deploy plan entries carrying one of these tags.
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Submit fresh deployments even when the manifest already has matching ones.
        #[arg(long, env = "HATCH_REDEPLOY", default_value_t = false)]
        redeploy: bool,

        /// How records are printed.
        #[arg(long, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// Contracts to deploy. Overrides `--tags`.
        contracts: Vec<String>,
    },

    /// Verify contracts already recorded in the manifest.
    Verify {
        #[arg(short, long, env = "HATCH_NETWORK")]
        network: Option<String>,

        /// Contracts to verify.
        #[arg(required = true)]
        contracts: Vec<String>,
    },

    /// List configured networks.
    Networks,

    /// Show the deployments recorded in the manifest.
    Manifest {
        /// Only show this network.
        #[arg(short, long)]
        network: Option<String>,
    },

    /// Write a Hatch.toml with the default configuration.
    Init {
        /// Where to write the file.
        #[arg(default_value = hatch_deploy::HATCH_CONFIG_FILENAME)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_args() {
        let cli = Cli::try_parse_from([
            "hatch",
            "deploy",
            "--network",
            "sepolia",
            "--tags",
            "token,dex",
            "-v",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        match cli.command {
            Command::Deploy {
                network,
                tags,
                redeploy,
                contracts,
                ..
            } => {
                assert_eq!(network.as_deref(), Some("sepolia"));
                assert_eq!(tags, vec!["token", "dex"]);
                assert!(!redeploy);
                assert!(contracts.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verify_requires_contract() {
        assert!(Cli::try_parse_from(["hatch", "verify", "--network", "sepolia"]).is_err());
    }
}
