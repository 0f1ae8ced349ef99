//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//
//! Simulated datagram network for tests and protocol experiments.
//!
//! A [`MockNetwork`] is a hub that owns the connectivity matrix between
//! named interfaces. Each node gets its own [`MockIoProvider`] handle;
//! packets sent out of an interface are delivered, after the configured
//! one-way delay, to every interface the hub connects it to. Delivery
//! timestamps are taken when the packet arrives, so artificial latency is
//! reflected in round-trip estimates exactly like real network latency.

use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use spark_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time;

use crate::network::{IoProvider, RxPacketMsg, UDP_PORT, now_us};

// Simulated network hub.
#[derive(Clone, Debug, Default)]
pub struct MockNetwork {
    hub: Arc<Mutex<Hub>>,
}

#[derive(Debug, Default)]
struct Hub {
    // Attached interfaces, keyed by name, with the receive queue of the
    // owning node.
    endpoints: HashMap<String, Sender<RxPacketMsg>>,
    // Connectivity matrix: interface to (peer interface, one-way delay).
    links: HashMap<String, Vec<(String, Duration)>>,
}

// Per-node provider handle attached to a [`MockNetwork`].
#[derive(Debug)]
pub struct MockIoProvider {
    hub: Arc<Mutex<Hub>>,
    tx: Sender<RxPacketMsg>,
    rx: tokio::sync::Mutex<Receiver<RxPacketMsg>>,
}

// ===== impl MockNetwork =====

impl MockNetwork {
    pub fn new() -> MockNetwork {
        Default::default()
    }

    // Creates a provider handle for one node.
    pub fn provider(&self) -> MockIoProvider {
        let (tx, rx) = mpsc::channel(1024);
        MockIoProvider {
            hub: self.hub.clone(),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    // Replaces the connectivity matrix.
    //
    // Links are unidirectional: `("iface1", [("iface2", 10ms)])` delivers
    // packets sent out of iface1 to iface2 only. Changing delays takes
    // effect for packets sent after the call; packets already in flight
    // keep their original delay.
    pub fn set_connected_pairs(
        &self,
        pairs: HashMap<String, Vec<(String, Duration)>>,
    ) {
        self.hub.lock().unwrap().links = pairs;
    }
}

// ===== impl MockIoProvider =====

impl IoProvider for MockIoProvider {
    fn add_interface(
        &self,
        ifname: &str,
        _ifindex: u32,
    ) -> std::io::Result<()> {
        self.hub
            .lock()
            .unwrap()
            .endpoints
            .insert(ifname.to_owned(), self.tx.clone());

        Ok(())
    }

    fn remove_interface(&self, ifname: &str, _ifindex: u32) {
        let mut hub = self.hub.lock().unwrap();
        if let Some(tx) = hub.endpoints.get(ifname)
            && tx.same_channel(&self.tx)
        {
            hub.endpoints.remove(ifname);
        }
    }

    async fn send_packet(
        &self,
        ifname: &str,
        _dst: SocketAddr,
        data: Bytes,
    ) -> std::io::Result<()> {
        // Snapshot the delivery targets without holding the hub lock over
        // the delayed sends.
        let targets: Vec<(Sender<RxPacketMsg>, String, Duration)> = {
            let hub = self.hub.lock().unwrap();
            hub.links
                .get(ifname)
                .into_iter()
                .flatten()
                .filter_map(|(peer, delay)| {
                    hub.endpoints
                        .get(peer)
                        .map(|tx| (tx.clone(), peer.clone(), *delay))
                })
                .collect()
        };

        for (tx, peer, delay) in targets {
            let data = data.clone();
            let mut delivery = Task::spawn(async move {
                time::sleep(delay).await;
                let msg = RxPacketMsg {
                    ifname: peer,
                    src: SocketAddr::from((Ipv6Addr::UNSPECIFIED, UDP_PORT)),
                    data,
                    recv_ts_us: now_us(),
                };
                let _ = tx.send(msg).await;
            });
            delivery.detach();
        }

        Ok(())
    }

    async fn recv_packet(&self) -> std::io::Result<RxPacketMsg> {
        self.rx.lock().await.recv().await.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "network hub gone",
            )
        })
    }
}
