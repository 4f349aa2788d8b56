//! warren - sandbox provisioner entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use warren::api::{Api, ApiState};
use warren::compute::aws::AwsCompute;
use warren::compute::ComputeProvider;
use warren::config::Config;
use warren::gateway::{GatewayRegistrar, HttpGateway};
use warren::provisioner::Provisioner;

#[derive(Parser, Debug)]
#[command(name = "warren", version)]
#[command(about = "On-demand per-user isolated VM sandboxes behind a gateway")]
struct Args {
    /// Override the listen port from configuration.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warren=info,tower_http=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        region = %config.provider.region,
        subnet = %config.session_vm.subnet_id,
        gateway = %config.gateway.gateway_ip,
        "Loaded configuration"
    );

    let compute: Arc<dyn ComputeProvider> = Arc::new(AwsCompute::new(&config).await);
    let provisioner = Arc::new(Provisioner::new(compute, &config));
    let gateway: Arc<dyn GatewayRegistrar> = Arc::new(HttpGateway::new(&config.gateway));

    let state = ApiState {
        provisioner,
        gateway,
    };

    let port = args.port.unwrap_or(config.api.port);
    let addr: SocketAddr = format!("{}:{}", config.api.bind_addr, port).parse()?;

    Api::start(state, addr).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
