//! PairFS metadata daemon
//!
//! Serves the mirrored metadata namespace: client operations over TCP,
//! heartbeats over UDP, buddy forwarding and resync in the background.

use anyhow::Result;
use clap::Parser;
use pairfs_common::config::MetaConfig;
use pairfs_meta::{App, InternodeSyncer, server};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pairfs-metad")]
#[command(about = "PairFS metadata daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/pairfs/meta.toml")]
    config: String,

    /// TCP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// UDP listen address
    #[arg(long)]
    udp_listen: Option<String>,

    /// Management daemon TCP endpoint
    #[arg(long)]
    mgmtd_endpoint: Option<String>,

    /// Node name (string ID)
    #[arg(long)]
    node_name: Option<String>,

    /// Numeric node ID
    #[arg(long)]
    num_id: Option<u32>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // load config file if it exists, CLI args take precedence
    let mut cfg: MetaConfig = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)?;
        toml::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Warning: failed to parse config file: {e}");
            MetaConfig::default()
        })
    } else {
        MetaConfig::default()
    };

    if let Some(listen) = args.listen {
        cfg.network.listen = listen;
    }
    if let Some(udp_listen) = args.udp_listen {
        cfg.network.udp_listen = udp_listen;
    }
    if let Some(endpoint) = args.mgmtd_endpoint {
        cfg.network.mgmtd_endpoint = endpoint;
    }
    if let Some(name) = args.node_name {
        cfg.node.name = name;
    }
    if let Some(num_id) = args.num_id {
        cfg.node.num_id = num_id;
    }

    let log_level = if args.log_level == "info" {
        cfg.logging.level.clone()
    } else {
        args.log_level
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting PairFS metadata daemon");
    info!("Config file: {}", args.config);

    if cfg.node.num_id == 0 {
        error!("A nonzero numeric node ID is required (--num-id or [node].num_id)");
        std::process::exit(1);
    }

    let tcp_listener = TcpListener::bind(&cfg.network.listen).await?;
    let udp_socket = UdpSocket::bind(&cfg.network.udp_listen).await?;
    info!("Listening on {} (tcp), {} (udp)", cfg.network.listen, cfg.network.udp_listen);

    let app = App::new(cfg)?;

    // registration is allowed to fail; the internode syncer keeps
    // retrying the mgmtd downloads in the background
    if let Err(e) = server::register_with_mgmtd(&app).await {
        warn!(error = %e, "could not register with mgmtd (continuing anyway)");
    }

    tokio::spawn(server::heartbeat_loop(app.clone()));
    tokio::spawn(InternodeSyncer::run(app.clone()));
    tokio::spawn(server::serve_udp(app.clone(), udp_socket));

    let serve = tokio::spawn(server::serve(app.clone(), tcp_listener));

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
    app.shutdown();

    serve.await.ok();
    info!("Metadata daemon shut down gracefully");

    Ok(())
}
