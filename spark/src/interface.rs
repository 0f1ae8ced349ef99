//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use derive_new::new;
use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use spark_utils::ip::Ipv6AddrExt;
use spark_utils::task::IntervalTask;

use crate::neighbor::{Neighbor, State};

// Number of accelerated hello rounds after an interface starts tracking.
pub const FAST_INIT_ROUNDS: u8 = 4;

// One entry of the interface database supplied by the link monitor.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub ifindex: u32,
    pub v4_addr: Option<Ipv4Network>,
    pub v6_link_local: Option<Ipv6Network>,
}

// A tracked interface and everything that runs on it.
#[derive(Debug)]
pub struct SparkInterface {
    pub name: String,
    pub ifindex: u32,
    pub v4_addr: Option<Ipv4Network>,
    pub v6_link_local: Option<Ipv6Network>,
    // Accelerated-discovery rounds still to go; while non-zero, hellos are
    // sent at the fast-init cadence with the solicit flag set.
    pub fast_init_rounds: u8,
    // Timestamp of the last hello sent, used to damp solicited replies.
    pub last_hello_tx_us: u64,
    pub neighbors: BTreeMap<String, Neighbor>,
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<IntervalTask>,
    pub heartbeat_interval: Option<IntervalTask>,
}

// ===== impl InterfaceRecord =====

impl InterfaceRecord {
    // A record the kernel could never have produced is rejected wholesale.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && self.ifindex != 0
            && self
                .v6_link_local
                .map(|network| network.ip().is_unicast_link_local_addr())
                .unwrap_or(true)
    }
}

// ===== impl SparkInterface =====

impl SparkInterface {
    pub(crate) fn new(record: &InterfaceRecord) -> SparkInterface {
        SparkInterface {
            name: record.name.clone(),
            ifindex: record.ifindex,
            v4_addr: record.v4_addr,
            v6_link_local: record.v6_link_local,
            fast_init_rounds: FAST_INIT_ROUNDS,
            last_hello_tx_us: 0,
            neighbors: Default::default(),
            tasks: Default::default(),
        }
    }

    // Refreshes addresses in place without disturbing the neighbors.
    pub(crate) fn update_addresses(&mut self, record: &InterfaceRecord) {
        self.v4_addr = record.v4_addr;
        self.v6_link_local = record.v6_link_local;
    }

    // Returns whether any adjacency on this interface needs heartbeats.
    pub(crate) fn has_active_adjacency(&self) -> bool {
        self.neighbors
            .values()
            .any(|nbr| nbr.state == State::Established && nbr.spark2)
    }
}
