use clap::Args;
use opsramp_core::config::AppConfig;
use opsramp_core::query::{DEFAULT_MAX_POINTS_PER_SLICE, DEFAULT_STEP_SECONDS};
use opsramp_mcp_runtime::client::MetricsQuery;
use opsramp_mcp_runtime::{OpsRampClient, SmartQueryRequest};
use serde_json::Value;

use crate::util::{CliError, client_for, parse_headers, resolve_platform};

#[derive(Args, Debug)]
pub struct TenantArgs {
    /// Tenant alias from the platform config (default: the platform's default_tenant)
    #[arg(long)]
    pub tenant: Option<String>,

    /// Explicit tenant/client id, wins over --tenant
    #[arg(long)]
    pub tenant_id: Option<String>,

    /// Extra headers (repeatable: Key:Value), applied after the tenant's headers
    #[arg(long, short = 'H')]
    pub header: Vec<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// MetricsQL expression
    #[arg(long, short = 'q')]
    pub query: String,

    /// Range start (epoch seconds or an expression the API accepts)
    #[arg(long)]
    pub start: Option<String>,

    /// Range end
    #[arg(long)]
    pub end: Option<String>,

    /// Step in seconds
    #[arg(long)]
    pub step: Option<u64>,

    #[command(flatten)]
    pub target: TenantArgs,
}

#[derive(Args, Debug)]
pub struct SmartQueryArgs {
    /// MetricsQL expression
    #[arg(long, short = 'q')]
    pub query: String,

    /// Range start in epoch seconds (non-numeric values disable sharding)
    #[arg(long)]
    pub start: String,

    /// Range end in epoch seconds
    #[arg(long)]
    pub end: String,

    /// Requested step in seconds
    #[arg(long, default_value_t = DEFAULT_STEP_SECONDS)]
    pub step: u64,

    /// Send the requested step as is, without widening it for long ranges
    #[arg(long)]
    pub no_auto_downsample: bool,

    /// Surface data-limit rejections instead of slicing the range
    #[arg(long)]
    pub no_sharding: bool,

    /// Point budget per slice when sharding
    #[arg(long, default_value_t = DEFAULT_MAX_POINTS_PER_SLICE)]
    pub max_points_per_slice: u64,

    #[command(flatten)]
    pub target: TenantArgs,
}

struct Target {
    client: OpsRampClient,
    tenant_id: String,
    headers: Vec<(String, String)>,
}

fn resolve_target(
    config: &AppConfig,
    platform: Option<&str>,
    args: &TenantArgs,
) -> Result<Target, CliError> {
    let platform = resolve_platform(config, platform)?;
    let extra = parse_headers(&args.header)?;
    let tenant = args.tenant.as_deref();
    Ok(Target {
        tenant_id: platform.resolve_tenant_id(tenant, args.tenant_id.as_deref())?,
        headers: platform.resolve_headers(tenant, &extra)?,
        client: client_for(platform)?,
    })
}

pub async fn plain(
    config: &AppConfig,
    platform: Option<&str>,
    args: QueryArgs,
) -> Result<Value, CliError> {
    let target = resolve_target(config, platform, &args.target)?;
    let request = MetricsQuery {
        query: args.query,
        start: args.start,
        end: args.end,
        step: args.step,
    };
    Ok(target
        .client
        .query_metricsql(&target.tenant_id, &request, &target.headers)
        .await?)
}

pub async fn smart(
    config: &AppConfig,
    platform: Option<&str>,
    args: SmartQueryArgs,
) -> Result<Value, CliError> {
    if args.step == 0 {
        return Err(CliError::usage("--step must be positive"));
    }
    let target = resolve_target(config, platform, &args.target)?;
    let request = SmartQueryRequest {
        step: args.step,
        auto_downsample: !args.no_auto_downsample,
        enable_sharding: !args.no_sharding,
        max_points_per_slice: args.max_points_per_slice,
        ..SmartQueryRequest::new(target.tenant_id, args.query, args.start, args.end)
    };
    Ok(target.client.smart_query(&request, &target.headers).await?)
}
