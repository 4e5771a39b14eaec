//! Per-node TCP connection pool
//!
//! One pool per peer node, holding a small number of idle connections
//! that are reused across requests. Request/response correlation is
//! per-connection: a connection carries one outstanding request at a
//! time, so the next frame read is always the response to the request
//! just written. Failed connections are dropped, never returned.

use crate::error::WireError;
use crate::framing::{FrameMeta, read_msg, write_msg, write_stream_msg};
use crate::header::{MsgHeader, MsgType};
use crate::msgs::AnyMsg;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

struct IdleConn {
    stream: TcpStream,
    since: Instant,
}

/// Pooled connections to one peer node.
pub struct NodeConnPool {
    addr: RwLock<SocketAddr>,
    idle: Mutex<Vec<IdleConn>>,
    max_idle: usize,
}

impl NodeConnPool {
    #[must_use]
    pub fn new(addr: SocketAddr, max_idle: usize) -> Self {
        Self {
            addr: RwLock::new(addr),
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        *self.addr.read()
    }

    /// Point the pool at a new address (e.g. after a node-list sync
    /// reported changed NICs). Existing idle connections to the old
    /// address are dropped.
    pub fn set_addr(&self, addr: SocketAddr) {
        let mut current = self.addr.write();
        if *current != addr {
            *current = addr;
            drop(current);
            if let Ok(mut idle) = self.idle.try_lock() {
                idle.clear();
            }
        }
    }

    async fn acquire(&self, timeout: Duration) -> Result<TcpStream, WireError> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn.stream);
        }

        let addr = self.addr();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::Timeout)?
            .map_err(|e| WireError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn release(&self, stream: TcpStream) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(IdleConn {
                stream,
                since: Instant::now(),
            });
        }
    }

    /// Drop idle connections older than `max_age`. Returns how many
    /// were reaped.
    pub async fn drop_idle_older_than(&self, max_age: Duration) -> usize {
        let mut idle = self.idle.lock().await;
        let before = idle.len();
        idle.retain(|conn| conn.since.elapsed() < max_age);
        let reaped = before - idle.len();
        if reaped > 0 {
            debug!(addr = %self.addr(), reaped, "reaped idle connections");
        }
        reaped
    }

    /// Send `msg` and await the matching response frame. The whole
    /// exchange is bounded by `timeout`; on any failure the connection
    /// is discarded.
    pub async fn request(
        &self,
        msg: &AnyMsg,
        meta: FrameMeta,
        timeout: Duration,
    ) -> Result<(MsgHeader, AnyMsg), WireError> {
        let mut stream = self.acquire(timeout).await?;

        let exchange = async {
            write_msg(&mut stream, msg, meta).await?;
            read_msg(&mut stream).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(resp)) => {
                self.release(stream).await;
                Ok(resp)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WireError::Timeout),
        }
    }

    /// `request` variant for pre-serialized streaming bodies
    /// (session-store resync).
    pub async fn request_stream(
        &self,
        msg_type: MsgType,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(MsgHeader, AnyMsg), WireError> {
        let mut stream = self.acquire(timeout).await?;

        let exchange = async {
            write_stream_msg(&mut stream, msg_type, FrameMeta::default(), body).await?;
            read_msg(&mut stream).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(resp)) => {
                self.release(stream).await;
                Ok(resp)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WireError::Timeout),
        }
    }

    /// `request` plus a response-type check.
    pub async fn request_expect(
        &self,
        msg: &AnyMsg,
        meta: FrameMeta,
        timeout: Duration,
        expected: MsgType,
    ) -> Result<(MsgHeader, AnyMsg), WireError> {
        let (hdr, resp) = self.request(msg, meta, timeout).await?;
        // a GenericResponse is a valid answer to anything
        if hdr.msg_type != expected && hdr.msg_type != MsgType::GenericResponse {
            return Err(WireError::UnexpectedResponse {
                expected,
                got: hdr.msg_type,
            });
        }
        Ok((hdr, resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::{Ack, GetNodes, GetNodesResp};
    use pairfs_common::types::NodeType;
    use tokio::net::TcpListener;

    async fn spawn_responder() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    while let Ok((_hdr, msg)) = read_msg(&mut stream).await {
                        let resp = match msg {
                            AnyMsg::GetNodes(_) => AnyMsg::GetNodesResp(GetNodesResp {
                                nodes: vec![],
                                root_info: None,
                            }),
                            _ => AnyMsg::Ack(Ack {
                                ack_id: String::new(),
                            }),
                        };
                        if write_msg(&mut stream, &resp, FrameMeta::default())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_request_response() {
        let addr = spawn_responder().await;
        let pool = NodeConnPool::new(addr, 4);

        let (hdr, resp) = pool
            .request_expect(
                &AnyMsg::GetNodes(GetNodes {
                    node_type: NodeType::Meta,
                }),
                FrameMeta::default(),
                Duration::from_secs(5),
                MsgType::GetNodesResp,
            )
            .await
            .unwrap();

        assert_eq!(hdr.msg_type, MsgType::GetNodesResp);
        assert!(matches!(resp, AnyMsg::GetNodesResp(_)));
    }

    #[tokio::test]
    async fn test_connection_reuse_and_reaping() {
        let addr = spawn_responder().await;
        let pool = NodeConnPool::new(addr, 4);

        for _ in 0..3 {
            pool.request(
                &AnyMsg::GetNodes(GetNodes {
                    node_type: NodeType::Meta,
                }),
                FrameMeta::default(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        }

        // sequential requests reuse one pooled connection
        assert_eq!(pool.idle.lock().await.len(), 1);

        assert_eq!(pool.drop_idle_older_than(Duration::ZERO).await, 1);
        assert_eq!(pool.idle.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_communication_error() {
        // reserved port nobody listens on
        let pool = NodeConnPool::new("127.0.0.1:1".parse().unwrap(), 4);
        let err = pool
            .request(
                &AnyMsg::GetNodes(GetNodes {
                    node_type: NodeType::Meta,
                }),
                FrameMeta::default(),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert_eq!(err.ops_err(), pairfs_common::OpsErr::Communication);
    }
}
