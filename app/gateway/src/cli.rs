//! Command line for the `tollgate` binary.

use crate::{
    EchoHandler, GatewayConfig, Server,
    config::{CONFIG_FILE, scaffold_config},
};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Authenticated, rate-limited, idempotent HTTP gateway.
#[derive(Parser, Debug)]
#[command(
    name = "tollgate",
    about = "Authenticated, rate-limited, idempotent HTTP gateway"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway until ctrl-c.
    Serve(ConfigArg),
    /// Write a default configuration file.
    Init(ConfigArg),
}

/// Path to the configuration file.
#[derive(Args, Debug)]
pub struct ConfigArg {
    /// Configuration file.
    #[arg(long, default_value = CONFIG_FILE)]
    pub config: PathBuf,
}

impl Cli {
    /// Dispatch the parsed subcommand.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve(args) => serve(args).await,
            Command::Init(args) => {
                scaffold_config(&args.config)?;
                tracing::info!("wrote {}", args.config.display());
                Ok(())
            }
        }
    }
}

async fn serve(args: ConfigArg) -> Result<()> {
    let config = GatewayConfig::load(&args.config)?;
    tracing::info!("loaded configuration from {}", args.config.display());

    let server = Server::new(config, EchoHandler);
    let info = server.start().await?;
    tracing::info!("serving at {}", info.base_url);

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    server.stop().await?;
    tracing::info!("gateway shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_config_path() {
        let cli = Cli::try_parse_from(["tollgate", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn init_takes_config_path() {
        let cli = Cli::try_parse_from(["tollgate", "init", "--config", "/tmp/t.toml"]).unwrap();
        let Command::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.config, PathBuf::from("/tmp/t.toml"));
    }
}
