//! PairFS wire protocol
//!
//! Fixed 32-byte binary header plus typed little-endian payloads,
//! framed over TCP for request/response traffic and packed into single
//! datagrams for UDP heartbeats. Also provides the per-node connection
//! pool used by all daemons.

pub mod conn;
pub mod error;
pub mod framing;
pub mod header;
pub mod msgs;
pub mod serialize;

pub use conn::NodeConnPool;
pub use error::WireError;
pub use framing::{
    FrameMeta, decode_datagram, encode_datagram, read_msg, write_msg, write_stream_msg,
};
pub use header::{
    FLAG_BUDDY_MIRROR_SECOND, FLAG_HAS_SEQUENCE_NUMBER, FLAG_IS_SELECTIVE_ACK, HEADER_LEN,
    MsgHeader, MsgType,
};
pub use msgs::AnyMsg;
