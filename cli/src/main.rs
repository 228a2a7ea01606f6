use std::path::PathBuf;

use clap::{Parser, Subcommand};
use opsramp_core::config::load_config;
use opsramp_mcp_runtime::{McpCommands, run as run_mcp};

mod commands;
mod util;

use commands::query::{QueryArgs, SmartQueryArgs};
use util::{CliError, init_tracing, print_json};

#[derive(Parser)]
#[command(
    name = "opsramp",
    version,
    about = "OpsRamp CLI: check credentials, run MetricsQL queries, serve MCP"
)]
struct Cli {
    /// Path to the TOML config (default: ./opsramp.toml, ./config.toml, ~/.config/opsramp-mcp/config.toml)
    #[arg(long, global = true, env = "OPSRAMP_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Platform name from the config (default: default_platform)
    #[arg(long, env = "OPSRAMP_PLATFORM")]
    platform: Option<String>,

    /// Emit logs on stderr as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured platforms and tenants
    Platforms,
    /// Force a token exchange and print masked token metadata
    AuthTest,
    /// Run a single MetricsQL query
    Query(QueryArgs),
    /// Run a MetricsQL range query with downsampling and sharding
    QuerySmart(SmartQueryArgs),
    /// MCP server
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => std::process::exit(CliError::from(err).report()),
    };
    let platform = cli.platform.as_deref();

    let result = match cli.command {
        Commands::Platforms => Ok(commands::platforms::run(&config)),
        Commands::AuthTest => commands::auth::test(&config, platform).await,
        Commands::Query(args) => commands::query::plain(&config, platform, args).await,
        Commands::QuerySmart(args) => commands::query::smart(&config, platform, args).await,
        Commands::Mcp { command } => {
            let McpCommands::Serve(mut args) = command;
            if args.platform.is_none() {
                args.platform = cli.platform.clone();
            }
            std::process::exit(run_mcp(config, McpCommands::Serve(args)).await);
        }
    };

    let code = match result {
        Ok(value) => print_json(&value),
        Err(err) => err.report(),
    };
    std::process::exit(code);
}
