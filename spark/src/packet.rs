//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use spark_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};

// Protocol version advertised by current releases.
pub const VERSION: u32 = 20200825;
// Oldest version we are willing to talk to at all.
pub const MIN_SUPPORTED_VERSION: u32 = 20170000;
// Versions below this one negotiate adjacencies over hellos alone, without
// the handshake and heartbeat exchanges.
pub const SPARK2_VERSION_MIN: u32 = 20190200;
// Version advertised when the handshake/heartbeat machinery is disabled.
pub const LEGACY_VERSION: u32 = 20180000;

//
// All messages share a one-byte type discriminant followed by the version
// and the sender identity. Multi-byte integers are big-endian and strings
// are length-prefixed UTF-8 of at most 255 bytes. Decoders ignore trailing
// bytes so that fields appended by newer releases pass through older nodes
// unharmed.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |                    Version                    :
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// :Ver cont.| Len |            Domain (variable)                  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Len |             Node name (variable)                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Type-specific payload                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//

// Message type discriminant (first byte on the wire).
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MsgType {
    Hello = 1,
    Handshake = 2,
    Heartbeat = 3,
}

// Hello packet flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct HelloFlags: u8 {
        const SOLICIT = 0x01;
        const RESTARTING = 0x02;
    }
}

// Spark message.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize, EnumAsInner)]
pub enum Packet {
    Hello(HelloMsg),
    Handshake(HandshakeMsg),
    Heartbeat(HeartbeatMsg),
}

// Periodic multicast advertisement used for discovery and bidirectional
// reachability confirmation.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HelloMsg {
    pub version: u32,
    pub domain: String,
    pub node_name: String,
    pub seq_num: u64,
    pub flags: HelloFlags,
    pub sent_ts_us: u64,
    pub v4_addr: Option<Ipv4Addr>,
    pub v6_addr: Option<Ipv6Addr>,
    pub neighbors: BTreeMap<String, ReflectedNeighborInfo>,
}

// Per-neighbor echo inside a hello: the last sequence number heard from
// that neighbor, the hold time the sender advertises to it, and the receive
// timestamp of the echoed hello (the sender's clock, used together with
// `sent_ts_us` for round-trip estimation).
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct ReflectedNeighborInfo {
    pub seq_seen: u64,
    pub hold_time_ms: u32,
    pub recv_ts_us: u64,
}

// Unicast negotiation message advancing a neighbor towards an adjacency.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HandshakeMsg {
    pub version: u32,
    pub domain: String,
    pub node_name: String,
    // Name of the node this handshake is addressed to.
    pub neighbor_node_name: String,
    pub area: Option<String>,
    pub transport_v4: Option<Ipv4Addr>,
    pub transport_v6: Option<Ipv6Addr>,
    pub heartbeat_hold_ms: u32,
    pub gr_hold_ms: u32,
    // Sender already considers the adjacency established; the receiver
    // must not answer with a handshake of its own.
    pub adj_established: bool,
}

// Periodic multicast keepalive sent once at least one adjacency on the
// interface is established.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HeartbeatMsg {
    pub version: u32,
    pub domain: String,
    pub node_name: String,
    pub seq_num: u64,
}

// Decode errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    UnknownMsgType(u8),
    InvalidString,
}

// ===== impl Packet =====

impl Packet {
    // Encodes the message into a bytes buffer.
    pub fn encode(&self) -> BytesMut {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            match self {
                Packet::Hello(msg) => {
                    buf.put_u8(MsgType::Hello as u8);
                    buf.put_u32(msg.version);
                    put_string(&mut buf, &msg.domain);
                    put_string(&mut buf, &msg.node_name);
                    buf.put_u64(msg.seq_num);
                    buf.put_u8(msg.flags.bits());
                    buf.put_u64(msg.sent_ts_us);
                    buf.put_opt_ipv4(&msg.v4_addr);
                    buf.put_opt_ipv6(&msg.v6_addr);
                    buf.put_u16(msg.neighbors.len() as u16);
                    for (node_name, info) in &msg.neighbors {
                        put_string(&mut buf, node_name);
                        buf.put_u64(info.seq_seen);
                        buf.put_u32(info.hold_time_ms);
                        buf.put_u64(info.recv_ts_us);
                    }
                }
                Packet::Handshake(msg) => {
                    buf.put_u8(MsgType::Handshake as u8);
                    buf.put_u32(msg.version);
                    put_string(&mut buf, &msg.domain);
                    put_string(&mut buf, &msg.node_name);
                    put_string(&mut buf, &msg.neighbor_node_name);
                    put_string(&mut buf, msg.area.as_deref().unwrap_or(""));
                    buf.put_opt_ipv4(&msg.transport_v4);
                    buf.put_opt_ipv6(&msg.transport_v6);
                    buf.put_u32(msg.heartbeat_hold_ms);
                    buf.put_u32(msg.gr_hold_ms);
                    buf.put_u8(msg.adj_established as u8);
                }
                Packet::Heartbeat(msg) => {
                    buf.put_u8(MsgType::Heartbeat as u8);
                    buf.put_u32(msg.version);
                    put_string(&mut buf, &msg.domain);
                    put_string(&mut buf, &msg.node_name);
                    buf.put_u64(msg.seq_num);
                }
            }

            buf.clone()
        })
    }

    // Decodes a message from a bytes buffer.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(data);

        let msg_type = buf.try_get_u8()?;
        let Some(msg_type) = MsgType::from_u8(msg_type) else {
            return Err(DecodeError::UnknownMsgType(msg_type));
        };
        let version = buf.try_get_u32()?;
        let domain = get_string(&mut buf)?;
        let node_name = get_string(&mut buf)?;

        let packet = match msg_type {
            MsgType::Hello => {
                let seq_num = buf.try_get_u64()?;
                let flags = HelloFlags::from_bits_truncate(buf.try_get_u8()?);
                let sent_ts_us = buf.try_get_u64()?;
                let v4_addr = buf.try_get_opt_ipv4()?;
                let v6_addr = buf.try_get_opt_ipv6()?;
                let count = buf.try_get_u16()?;
                let mut neighbors = BTreeMap::new();
                for _ in 0..count {
                    let neighbor = get_string(&mut buf)?;
                    let seq_seen = buf.try_get_u64()?;
                    let hold_time_ms = buf.try_get_u32()?;
                    let recv_ts_us = buf.try_get_u64()?;
                    neighbors.insert(
                        neighbor,
                        ReflectedNeighborInfo::new(
                            seq_seen,
                            hold_time_ms,
                            recv_ts_us,
                        ),
                    );
                }

                Packet::Hello(HelloMsg {
                    version,
                    domain,
                    node_name,
                    seq_num,
                    flags,
                    sent_ts_us,
                    v4_addr,
                    v6_addr,
                    neighbors,
                })
            }
            MsgType::Handshake => {
                let neighbor_node_name = get_string(&mut buf)?;
                let area = get_string(&mut buf)?;
                let area = (!area.is_empty()).then_some(area);
                let transport_v4 = buf.try_get_opt_ipv4()?;
                let transport_v6 = buf.try_get_opt_ipv6()?;
                let heartbeat_hold_ms = buf.try_get_u32()?;
                let gr_hold_ms = buf.try_get_u32()?;
                let adj_established = buf.try_get_u8()? != 0;

                Packet::Handshake(HandshakeMsg {
                    version,
                    domain,
                    node_name,
                    neighbor_node_name,
                    area,
                    transport_v4,
                    transport_v6,
                    heartbeat_hold_ms,
                    gr_hold_ms,
                    adj_established,
                })
            }
            MsgType::Heartbeat => {
                let seq_num = buf.try_get_u64()?;

                Packet::Heartbeat(HeartbeatMsg {
                    version,
                    domain,
                    node_name,
                    seq_num,
                })
            }
        };

        // Remaining bytes belong to fields this release does not know about.
        Ok(packet)
    }

    // Returns the identity carried in the message header.
    pub fn sender(&self) -> (&str, &str) {
        match self {
            Packet::Hello(msg) => (&msg.domain, &msg.node_name),
            Packet::Handshake(msg) => (&msg.domain, &msg.node_name),
            Packet::Heartbeat(msg) => (&msg.domain, &msg.node_name),
        }
    }

    // Returns the version carried in the message header.
    pub fn version(&self) -> u32 {
        match self {
            Packet::Hello(msg) => msg.version,
            Packet::Handshake(msg) => msg.version,
            Packet::Heartbeat(msg) => msg.version,
        }
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::UnknownMsgType(msg_type) => {
                write!(f, "unknown message type: {msg_type}")
            }
            DecodeError::InvalidString => {
                write!(f, "string field isn't valid UTF-8")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

// ===== helper functions =====

fn put_string(buf: &mut BytesMut, value: &str) {
    debug_assert!(value.len() <= 255);
    buf.put_u8(value.len() as u8);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut Bytes) -> Result<String, DecodeError> {
    let len = buf.try_get_u8()? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::ReadOutOfBounds);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
}
