//! mintbake is a CLI tool to deploy, track and verify smart contracts declaratively.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::ASCII_MARKDOWN};

use cli::{Cli, Command, TargetArgs};
use mintbake_deploy::{
    ArgValue, DeployError, DeployerBuilder, DeploymentTask, NetworkResolver, ProjectConfig,
    Secrets, render_plan,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let result = match cli.command {
        Command::Deploy(target) => deploy(&cli.config, target).await,
        Command::Plan(target) => plan(&cli.config, target).await,
        Command::Networks => networks(),
        Command::Init { force } => init(&cli.config, force),
    };

    result.map_err(|err| {
        let configuration = err
            .downcast_ref::<DeployError>()
            .is_some_and(DeployError::is_configuration);
        if configuration {
            err.context("Invalid deployment configuration, no transaction was sent")
        } else {
            err
        }
    })
}

fn builder(config_path: &Path, target: &TargetArgs) -> Result<DeployerBuilder> {
    let config = ProjectConfig::load_from_file(config_path)?;
    let secrets = Secrets::from_env()?;

    tracing::info!(
        config_path = %config_path.display(),
        network = %target.network,
        tags = %target.tags,
        "Loading deployment from config file..."
    );

    Ok(DeployerBuilder::new(target.network.clone())
        .config(config)
        .secrets(secrets))
}

async fn deploy(config_path: &Path, target: TargetArgs) -> Result<()> {
    let deployer = builder(config_path, &target)?.build()?;
    let report = deployer.deploy(&target.tags).await?;

    println!("{}", report.render());

    if !report.success() {
        anyhow::bail!("Deployment to `{}` failed", report.network);
    }

    tracing::info!("✓ Deployment complete!");
    Ok(())
}

async fn plan(config_path: &Path, target: TargetArgs) -> Result<()> {
    let deployer = builder(config_path, &target)?.build()?;
    let plan = deployer.plan(&target.tags).await?;

    println!("{}", render_plan(&plan));
    Ok(())
}

fn networks() -> Result<()> {
    let resolver = NetworkResolver::new(Secrets::from_env()?);
    println!("{}", networks_table(&resolver)?);
    Ok(())
}

fn networks_table(resolver: &NetworkResolver) -> Result<Table> {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN);
    table.set_header(["Network", "Chain ID", "RPC", "Live", "Explorer key"]);

    for entry in resolver.networks() {
        let profile = resolver.resolve(entry.name)?;
        let explorer_key = match &profile.explorer {
            Some(explorer) if explorer.api_key.is_some() => {
                format!("{} (set)", explorer.api_key_env)
            }
            Some(explorer) => explorer.api_key_env.to_string(),
            None => String::new(),
        };
        table.add_row([
            profile.name.clone(),
            profile.chain_id.to_string(),
            profile.redacted_rpc_url(),
            profile.is_live.to_string(),
            explorer_key,
        ]);
    }
    Ok(table)
}

/// Write a configuration declaring the sample Greeter and DropAlbum contracts.
fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = ProjectConfig {
        tasks: vec![
            DeploymentTask::new("Greeter").arg("Hello, World!"),
            DeploymentTask::new("DropAlbum").args([
                ArgValue::from("TestDropAlbum"),
                ArgValue::from("TDA"),
                ArgValue::from("@deployer"),
                ArgValue::from(500u64),
            ]),
        ],
        ..Default::default()
    };

    config
        .save_to_file(config_path)
        .context("Failed to write starter configuration")
}
