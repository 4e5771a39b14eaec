//! PairFS management daemon
//!
//! Authoritative node/target/buddy-group directory: processes
//! heartbeats, serves list downloads, tracks target states, and
//! persists the mirroring topology across restarts.

mod service;

use anyhow::Result;
use clap::Parser;
use pairfs_common::config::MgmtdConfig;
use pairfs_wire::framing::{self, FrameMeta};
use service::MgmtApp;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pairfs-mgmtd")]
#[command(about = "PairFS management daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/pairfs/mgmtd.toml")]
    config: String,

    /// TCP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// UDP listen address
    #[arg(long)]
    udp_listen: Option<String>,

    /// State file path
    #[arg(long)]
    state_file: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg: MgmtdConfig = if std::path::Path::new(&args.config).exists() {
        let raw = std::fs::read_to_string(&args.config)?;
        toml::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Warning: failed to parse config file: {e}");
            MgmtdConfig::default()
        })
    } else {
        MgmtdConfig::default()
    };

    if let Some(listen) = args.listen {
        cfg.network.listen = listen;
    }
    if let Some(udp_listen) = args.udp_listen {
        cfg.network.udp_listen = udp_listen;
    }
    if let Some(state_file) = args.state_file {
        cfg.persistence.state_file = state_file.into();
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

    info!("Starting PairFS management daemon");
    info!("Config file: {}", args.config);
    info!("State file: {}", cfg.persistence.state_file.display());

    let tcp_listener = TcpListener::bind(&cfg.network.listen).await?;
    let udp_socket = UdpSocket::bind(&cfg.network.udp_listen).await?;
    info!(
        "Listening on {} (tcp), {} (udp)",
        cfg.network.listen, cfg.network.udp_listen
    );

    let app = MgmtApp::new(cfg);

    tokio::spawn(sweep_loop(app.clone()));
    tokio::spawn(persist_loop(app.clone()));
    tokio::spawn(serve_udp(app.clone(), udp_socket));

    let serve = tokio::spawn(serve_tcp(app.clone(), tcp_listener));

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
    app.shutdown();
    app.persist_now();

    serve.await.ok();
    info!("Management daemon shut down gracefully");

    Ok(())
}

async fn serve_tcp(app: Arc<MgmtApp>, listener: TcpListener) {
    let mut shutdown = app.shutdown_rx();
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        tokio::spawn(handle_conn(app.clone(), stream));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
}

async fn handle_conn(app: Arc<MgmtApp>, mut stream: TcpStream) {
    let mut shutdown = app.shutdown_rx();
    loop {
        let incoming = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            incoming = framing::read_msg(&mut stream) => incoming,
        };

        let (hdr, msg) = match incoming {
            Ok(frame) => frame,
            Err(_) => break,
        };

        let Some(response) = service::dispatch(&app, hdr, msg).await else {
            break;
        };

        let meta = FrameMeta {
            flags: 0,
            requestor: hdr.requestor,
            seq: hdr.seq,
            seq_done: 0,
        };
        if framing::write_msg(&mut stream, &response, meta).await.is_err() {
            break;
        }
    }
}

async fn serve_udp(app: Arc<MgmtApp>, socket: UdpSocket) {
    let mut shutdown = app.shutdown_rx();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let received = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (len, peer) = match received {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                continue;
            }
        };

        let (hdr, msg) = match framing::decode_datagram(&buf[..len]) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(%peer, error = %e, "dropping malformed datagram");
                continue;
            }
        };

        if let Some(response) = service::dispatch(&app, hdr, msg).await {
            let datagram = framing::encode_datagram(&response, FrameMeta::default());
            if let Err(e) = socket.send_to(&datagram, peer).await {
                debug!(%peer, error = %e, "udp response send failed");
            }
        }
    }
}

async fn sweep_loop(app: Arc<MgmtApp>) {
    let interval = Duration::from_secs(app.cfg.sweep.interval_secs.max(1));
    let mut shutdown = app.shutdown_rx();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
        app.sweep_reachability();
    }
}

async fn persist_loop(app: Arc<MgmtApp>) {
    let interval = Duration::from_secs(app.cfg.persistence.flush_interval_secs.max(1));
    let mut shutdown = app.shutdown_rx();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }
        app.persist_now();
    }
}
