use std::path::PathBuf;

use clap::Parser;
use opsramp_core::config::load_config;
use opsramp_mcp_runtime::{McpCommands, McpServeArgs, run as run_mcp, to_pretty_json};
use serde_json::json;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "opsramp-mcp",
    version,
    about = "OpsRamp MCP server over stdio: dashboards, MetricsQL, tracing and v2 metrics"
)]
struct Cli {
    /// Path to the TOML config (default: ./opsramp.toml, ./config.toml, ~/.config/opsramp-mcp/config.toml)
    #[arg(long, env = "OPSRAMP_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs on stderr as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<McpCommands>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "opsramp_mcp=info,opsramp_mcp_runtime=info".into());
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt).init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            let payload = json!({
                "error": "config_error",
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            std::process::exit(1);
        }
    };
    tracing::info!(
        config_path = %config.config_path,
        platforms = config.platforms.len(),
        default_platform = %config.default_platform,
        "loaded config"
    );

    let command = cli
        .command
        .unwrap_or(McpCommands::Serve(McpServeArgs::default()));
    let code = run_mcp(config, command).await;
    std::process::exit(code);
}
