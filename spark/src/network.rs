//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::future::Future;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use spark_utils::ip::{AddressFamily, IpAddrExt};
use spark_utils::socket::{UdpSocket, UdpSocketExt, wildcard_sockaddr};
use spark_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::error::IoError;

// Well-known link-local multicast group and destination port.
pub const MCAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const UDP_PORT: u16 = 6666;

// Monotonic clock base for packet timestamps.
static CLOCK_BASE: LazyLock<Instant> = LazyLock::new(Instant::now);

// A received datagram together with the interface it arrived on and its
// receive timestamp.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RxPacketMsg {
    pub ifname: String,
    pub src: SocketAddr,
    pub data: Bytes,
    pub recv_ts_us: u64,
}

// Datagram multiplex the protocol instance runs on.
//
// One provider serves all tracked interfaces of a node: interfaces are
// attached and detached as the interface database changes, sends go out of
// a named interface, and received packets come back classified by interface
// and stamped with their receive time.
pub trait IoProvider: Send + Sync + 'static {
    // Starts sending and receiving packets on the given interface.
    fn add_interface(&self, ifname: &str, ifindex: u32)
    -> std::io::Result<()>;

    // Stops all I/O on the given interface.
    fn remove_interface(&self, ifname: &str, ifindex: u32);

    // Sends a datagram out of the given interface.
    fn send_packet(
        &self,
        ifname: &str,
        dst: SocketAddr,
        data: Bytes,
    ) -> impl Future<Output = std::io::Result<()>> + Send;

    // Receives the next datagram.
    fn recv_packet(
        &self,
    ) -> impl Future<Output = std::io::Result<RxPacketMsg>> + Send;
}

// I/O provider backed by a single UDP socket joined to the protocol
// multicast group on every attached interface.
#[derive(Debug)]
pub struct UdpIoProvider {
    socket: Arc<UdpSocket>,
    // Interface name to kernel index, for sends.
    ifindexes: Mutex<HashMap<String, u32>>,
    // Kernel index to interface name, for receive classification.
    ifnames: Arc<Mutex<HashMap<u32, String>>>,
    rx: tokio::sync::Mutex<Receiver<RxPacketMsg>>,
    _rx_task: Task<()>,
}

// ===== impl UdpIoProvider =====

impl UdpIoProvider {
    pub fn new() -> std::io::Result<UdpIoProvider> {
        let socket = UdpSocket::bind_reuseaddr(wildcard_sockaddr(
            AddressFamily::Ipv6,
            UDP_PORT,
        ))?;
        socket.set_multicast_hopcount_v6(1)?;
        socket.set_unicast_hops_v6(1)?;
        socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL)?;
        let socket = Arc::new(socket);

        let ifnames = Arc::new(Mutex::new(HashMap::new()));
        let (rx_tx, rx_rx) = mpsc::channel(64);
        let rx_task = read_loop(socket.clone(), ifnames.clone(), rx_tx);

        Ok(UdpIoProvider {
            socket,
            ifindexes: Mutex::new(HashMap::new()),
            ifnames,
            rx: tokio::sync::Mutex::new(rx_rx),
            _rx_task: rx_task,
        })
    }
}

impl IoProvider for UdpIoProvider {
    fn add_interface(
        &self,
        ifname: &str,
        ifindex: u32,
    ) -> std::io::Result<()> {
        self.socket.join_multicast_ifindex_v6(&MCAST_GROUP, ifindex)?;
        self.ifindexes
            .lock()
            .unwrap()
            .insert(ifname.to_owned(), ifindex);
        self.ifnames
            .lock()
            .unwrap()
            .insert(ifindex, ifname.to_owned());

        Ok(())
    }

    fn remove_interface(&self, ifname: &str, ifindex: u32) {
        if let Err(error) =
            self.socket.leave_multicast_ifindex_v6(&MCAST_GROUP, ifindex)
        {
            IoError::MulticastLeaveError(error).log();
        }
        self.ifindexes.lock().unwrap().remove(ifname);
        self.ifnames.lock().unwrap().remove(&ifindex);
    }

    async fn send_packet(
        &self,
        ifname: &str,
        mut dst: SocketAddr,
        data: Bytes,
    ) -> std::io::Result<()> {
        let ifindex = self
            .ifindexes
            .lock()
            .unwrap()
            .get(ifname)
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "interface not attached",
                )
            })?;

        // Multicast sends pick the egress interface through the socket
        // option; link-local unicast carries it in the scope ID.
        if dst.ip().is_multicast() {
            self.socket.set_multicast_ifindex_v6(ifindex)?;
        } else if let SocketAddr::V6(dst) = &mut dst {
            dst.set_scope_id(ifindex);
        }
        self.socket.send_to(&data, dst).await?;

        Ok(())
    }

    async fn recv_packet(&self) -> std::io::Result<RxPacketMsg> {
        self.rx.lock().await.recv().await.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "receive loop terminated",
            )
        })
    }
}

// ===== global functions =====

// Returns the multicast destination for protocol packets.
pub fn mcast_sockaddr() -> SocketAddr {
    SocketAddr::from((MCAST_GROUP, UDP_PORT))
}

// Returns the current value of the packet timestamp clock.
pub fn now_us() -> u64 {
    CLOCK_BASE.elapsed().as_micros() as u64
}

// ===== helper functions =====

fn read_loop(
    socket: Arc<UdpSocket>,
    ifnames: Arc<Mutex<HashMap<u32, String>>>,
    rx_tx: Sender<RxPacketMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let ifnames = ifnames.clone();
        let rx_tx = rx_tx.clone();
        async move {
            let mut buf = [0; 4096];

            loop {
                let (num_bytes, src) = match socket.recv_from(&mut buf).await {
                    Ok((num_bytes, src)) => (num_bytes, src),
                    Err(error) => {
                        IoError::RecvError(error).log();
                        continue;
                    }
                };
                let recv_ts_us = now_us();

                if !src.ip().is_usable() {
                    continue;
                }

                // Classify the packet by its ingress interface, taken from
                // the link-local source scope.
                let SocketAddr::V6(src_v6) = src else {
                    continue;
                };
                let Some(ifname) = ifnames
                    .lock()
                    .unwrap()
                    .get(&src_v6.scope_id())
                    .cloned()
                else {
                    continue;
                };

                let msg = RxPacketMsg {
                    ifname,
                    src,
                    data: Bytes::copy_from_slice(&buf[..num_bytes]),
                    recv_ts_us,
                };
                if rx_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
    })
}
