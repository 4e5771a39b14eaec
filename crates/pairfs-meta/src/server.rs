//! TCP/UDP server loops and management-daemon registration

use crate::app::App;
use crate::handler;
use pairfs_common::OpsErr;
use pairfs_common::types::{NicAddress, NodeType};
use pairfs_wire::framing::{self, FrameMeta};
use pairfs_wire::header::MsgType;
use pairfs_wire::msgs::{
    AnyMsg, Heartbeat, NODE_FEATURE_SELECTIVE_ACK, NODE_FEATURE_SEQ_NUMBERS, RootInfo,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

/// Accept loop; one task per connection, until shutdown.
pub async fn serve(app: Arc<App>, listener: TcpListener) {
    let mut shutdown = app.shutdown_rx();
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let app = app.clone();
                        tokio::spawn(handle_conn(app, stream));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
    info!("metadata server stopped");
}

async fn handle_conn(app: Arc<App>, mut stream: TcpStream) {
    let mut shutdown = app.shutdown_rx();
    loop {
        let incoming = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            incoming = framing::read_msg(&mut stream) => incoming,
        };

        let (hdr, msg) = match incoming {
            Ok(frame) => frame,
            // EOF and malformed frames both end the connection
            Err(_) => break,
        };

        let Some(response) = handler::dispatch(&app, hdr, msg).await else {
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

/// UDP loop: heartbeats and other datagram traffic.
pub async fn serve_udp(app: Arc<App>, socket: UdpSocket) {
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

        if let Some(response) = handler::dispatch(&app, hdr, msg).await {
            // only small control responses (acks) travel back over UDP
            let datagram = framing::encode_datagram(&response, FrameMeta::default());
            if let Err(e) = socket.send_to(&datagram, peer).await {
                debug!(%peer, error = %e, "udp ack send failed");
            }
        }
    }
}

/// The heartbeat this node announces itself with.
#[must_use]
pub fn heartbeat_msg(app: &App, ack_id: String) -> AnyMsg {
    let tcp_port = port_of(&app.cfg.network.listen, 8005);
    let udp_port = port_of(&app.cfg.network.udp_listen, 8006);

    AnyMsg::Heartbeat(Heartbeat {
        node_id: app.cfg.node.name.clone(),
        num_id: app.local_node_id,
        node_type: NodeType::Meta,
        tcp_port,
        udp_port,
        nics: vec![advertised_nic(&app.cfg.network.listen)],
        feature_flags: NODE_FEATURE_SEQ_NUMBERS | NODE_FEATURE_SELECTIVE_ACK,
        root_info: Some(RootInfo {
            owner: app.local_node_id,
            is_buddy_mirrored: app.buddy_mapper.local_group().is_some(),
        }),
        ack_id,
    })
}

/// Register with the management daemon over TCP, with bounded retries.
pub async fn register_with_mgmtd(app: &Arc<App>) -> Result<(), OpsErr> {
    let msg = heartbeat_msg(app, String::new());

    for attempt in 1..=5u32 {
        match app
            .mgmt_pool
            .request_expect(
                &msg,
                FrameMeta::default(),
                Duration::from_secs(2),
                MsgType::Ack,
            )
            .await
        {
            Ok(_) => {
                info!(
                    node = %app.cfg.node.name,
                    num_id = %app.local_node_id,
                    "registered with management daemon"
                );
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "registration with mgmtd failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    Err(OpsErr::Communication)
}

/// Periodic UDP heartbeats to the management daemon.
pub async fn heartbeat_loop(app: Arc<App>) {
    let Ok(mgmt_udp) = app.cfg.network.mgmtd_udp_endpoint.parse::<SocketAddr>() else {
        warn!(
            endpoint = %app.cfg.network.mgmtd_udp_endpoint,
            "invalid mgmtd UDP endpoint, heartbeats disabled"
        );
        return;
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "cannot bind heartbeat socket");
            return;
        }
    };

    let interval = Duration::from_secs(app.cfg.tuning.heartbeat_interval_secs.max(1));
    let mut shutdown = app.shutdown_rx();
    let mut counter = 0u64;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }

        counter += 1;
        let msg = heartbeat_msg(&app, format!("hb-{}-{counter}", app.local_node_id));
        let datagram = framing::encode_datagram(&msg, FrameMeta::default());
        if let Err(e) = socket.send_to(&datagram, mgmt_udp).await {
            debug!(error = %e, "heartbeat send failed");
        }
    }
}

fn port_of(listen: &str, default: u16) -> u16 {
    listen
        .parse::<SocketAddr>()
        .map_or(default, |addr| addr.port())
}

fn advertised_nic(listen: &str) -> NicAddress {
    let addr = listen
        .parse::<SocketAddr>()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    // a wildcard bind is not reachable by peers; fall back to loopback
    let addr = if addr.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        addr
    };
    NicAddress::new(addr, "eth0")
}
