//! One known peer node with its connection pool
//!
//! Nodes are handed out as `Arc<Node>` because a worker may hold one
//! across a blocking network call while the store concurrently updates
//! or even removes it.

use pairfs_common::types::{NicAddress, NodeNumId, NodeType};
use pairfs_wire::NodeConnPool;
use pairfs_wire::msgs::NodeDesc;
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

struct Endpoints {
    tcp_port: u16,
    udp_port: u16,
    nics: Vec<NicAddress>,
    feature_flags: u16,
}

/// A node known to a store: identity, role, reachable addresses and the
/// pooled connections to it.
pub struct Node {
    string_id: String,
    num_id: NodeNumId,
    node_type: NodeType,
    endpoints: RwLock<Endpoints>,
    conn_pool: NodeConnPool,
}

impl Node {
    #[must_use]
    pub fn from_desc(desc: &NodeDesc, conn_pool_size: usize) -> Self {
        let addr = primary_addr(&desc.nics, desc.tcp_port);
        Self {
            string_id: desc.node_id.clone(),
            num_id: desc.num_id,
            node_type: desc.node_type,
            endpoints: RwLock::new(Endpoints {
                tcp_port: desc.tcp_port,
                udp_port: desc.udp_port,
                nics: desc.nics.clone(),
                feature_flags: desc.feature_flags,
            }),
            conn_pool: NodeConnPool::new(addr, conn_pool_size),
        }
    }

    #[must_use]
    pub fn string_id(&self) -> &str {
        &self.string_id
    }

    #[must_use]
    pub fn num_id(&self) -> NodeNumId {
        self.num_id
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    #[must_use]
    pub fn tcp_addr(&self) -> SocketAddr {
        let ep = self.endpoints.read();
        primary_addr(&ep.nics, ep.tcp_port)
    }

    #[must_use]
    pub fn udp_addr(&self) -> SocketAddr {
        let ep = self.endpoints.read();
        primary_addr(&ep.nics, ep.udp_port)
    }

    #[must_use]
    pub fn conn_pool(&self) -> &NodeConnPool {
        &self.conn_pool
    }

    /// Negotiated capability bits of this node.
    #[must_use]
    pub fn feature_flags(&self) -> u16 {
        self.endpoints.read().feature_flags
    }

    #[must_use]
    pub fn supports(&self, feature: u16) -> bool {
        self.feature_flags() & feature != 0
    }

    /// Merge fresh address/capability info (heartbeat or node-list
    /// download) into this node. The connection pool follows the new
    /// primary address.
    pub fn update_endpoints(&self, desc: &NodeDesc) {
        let addr = primary_addr(&desc.nics, desc.tcp_port);
        {
            let mut ep = self.endpoints.write();
            ep.tcp_port = desc.tcp_port;
            ep.udp_port = desc.udp_port;
            ep.nics = desc.nics.clone();
            ep.feature_flags = desc.feature_flags;
        }
        self.conn_pool.set_addr(addr);
    }

    #[must_use]
    pub fn to_desc(&self) -> NodeDesc {
        let ep = self.endpoints.read();
        NodeDesc {
            node_id: self.string_id.clone(),
            num_id: self.num_id,
            node_type: self.node_type,
            tcp_port: ep.tcp_port,
            udp_port: ep.udp_port,
            nics: ep.nics.clone(),
            feature_flags: ep.feature_flags,
        }
    }
}

fn primary_addr(nics: &[NicAddress], port: u16) -> SocketAddr {
    nics.first().map_or_else(
        || SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        |nic| nic.socket_addr(port),
    )
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("string_id", &self.string_id)
            .field("num_id", &self.num_id)
            .field("node_type", &self.node_type)
            .field("tcp_addr", &self.tcp_addr())
            .finish_non_exhaustive()
    }
}
