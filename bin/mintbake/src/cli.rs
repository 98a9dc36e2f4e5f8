use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mintbake_deploy::{ALL_TAG, CONFIG_FILENAME};
use tracing::level_filters::LevelFilter;

/// The network used when none is given.
const DEFAULT_NETWORK: &str = "hardhat";

#[derive(Parser)]
#[command(name = "mintbake")]
#[command(
    author,
    version,
    about = "Deploy, track and verify smart contracts, declaratively"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "MINTBAKE_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    #[arg(long, alias = "conf", env = "MINTBAKE_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every contract whose code or arguments changed since the last run.
    Deploy(TargetArgs),

    /// Show what `deploy` would do, without sending any transaction.
    Plan(TargetArgs),

    /// List the known networks.
    Networks,

    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct TargetArgs {
    /// The network to deploy to, as named in the chain table.
    #[arg(short, long, env = "MINTBAKE_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Only run the tasks carrying this tag, plus their dependencies.
    #[arg(short, long, alias = "tag", env = "MINTBAKE_TAGS", default_value = ALL_TAG)]
    pub tags: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_defaults() {
        let cli = Cli::try_parse_from(["mintbake", "deploy"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILENAME));
        match cli.command {
            Command::Deploy(target) => {
                assert_eq!(target.network, DEFAULT_NETWORK);
                assert_eq!(target.tags, ALL_TAG);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_plan_with_network_and_tag() {
        let cli = Cli::try_parse_from([
            "mintbake", "plan", "--network", "goerli", "--tags", "Greeter",
        ])
        .unwrap();
        match cli.command {
            Command::Plan(target) => {
                assert_eq!(target.network, "goerli");
                assert_eq!(target.tags, "Greeter");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
