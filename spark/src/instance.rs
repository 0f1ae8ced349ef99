//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::area::AreaMatcher;
use crate::config::Config;
use crate::debug::Debug;
use crate::error::Error;
use crate::events;
use crate::interface::{InterfaceRecord, SparkInterface};
use crate::neighbor::State;
use crate::network::{IoProvider, RxPacketMsg};
use crate::tasks;
use crate::tasks::messages::input::{
    HandshakeTimerMsg, HeartbeatTimerMsg, HelloTimerMsg, HoldTimerMsg,
};

// Capacity of each subscriber's view of the event stream. The producer
// never blocks; a subscriber that falls further behind than this loses the
// oldest events and learns how many through the lag error.
const EVENT_CHANNEL_CAPACITY: usize = 512;

// A single long-lived protocol instance.
#[derive(Debug)]
pub struct SparkInstance<I: IoProvider> {
    // Instance configuration.
    pub config: Config,
    // Compiled area rules.
    pub areas: AreaMatcher,
    // Datagram multiplex.
    pub io: Arc<I>,
    // Tracked interfaces.
    pub interfaces: BTreeMap<String, SparkInterface>,
    // Monotonic sequence number shared by all outgoing packets.
    pub seq_num: u64,
    // Send timestamps of recent hellos, for round-trip estimation.
    pub hello_history: BTreeMap<u64, u64>,
    // Protocol counters.
    pub counters: Counters,
    // Neighbor event stream.
    pub event_tx: broadcast::Sender<NeighborEvent>,
    // Instance Tx channels.
    pub proto_tx: ProtocolInputChannelsTx,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Hello cadence ticks.
    pub hello_timer: Sender<HelloTimerMsg>,
    // Handshake retransmission ticks.
    pub handshake_timer: Sender<HandshakeTimerMsg>,
    // Heartbeat cadence ticks.
    pub heartbeat_timer: Sender<HeartbeatTimerMsg>,
    // Neighbor hold timers.
    pub hold_timer: Sender<HoldTimerMsg>,
}

#[derive(Debug)]
struct ProtocolInputChannelsRx {
    hello_timer: Receiver<HelloTimerMsg>,
    handshake_timer: Receiver<HandshakeTimerMsg>,
    heartbeat_timer: Receiver<HeartbeatTimerMsg>,
    hold_timer: Receiver<HoldTimerMsg>,
}

// Protocol counters.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct Counters {
    pub rx_packets: u64,
    pub rx_decode_errors: u64,
    pub rx_dropped_domain: u64,
    pub rx_dropped_self_loop: u64,
    pub rx_dropped_version: u64,
    pub rx_dropped_misaddressed: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

// Neighbor lifecycle event delivered to subscribers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborEvent {
    pub event_type: NeighborEventType,
    pub ifname: String,
    pub node_name: String,
    pub transport_v4: Option<Ipv4Addr>,
    pub transport_v6: Option<Ipv6Addr>,
    pub area: String,
    pub rtt_us: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NeighborEventType {
    Up,
    Down,
    Restarting,
    Restarted,
    RttChange,
}

// Requests serviced by the instance on behalf of its collaborators.
#[derive(Debug)]
enum ApiMsg {
    UpdateInterfaceDb {
        interfaces: Vec<InterfaceRecord>,
        responder: oneshot::Sender<bool>,
    },
    NeighborState {
        ifname: String,
        node_name: String,
        responder: oneshot::Sender<Option<State>>,
    },
    NeighborDown {
        addrs: Vec<IpAddr>,
        responder: oneshot::Sender<()>,
    },
    GetCounters {
        responder: oneshot::Sender<Counters>,
    },
    Stop {
        responder: oneshot::Sender<()>,
    },
}

// Handle to a running protocol instance.
//
// Dropping the last handle shuts the instance down the same way
// [`Spark::stop`] does, including the final restart advertisement.
#[derive(Clone, Debug)]
pub struct Spark {
    api_tx: Sender<ApiMsg>,
    event_tx: broadcast::Sender<NeighborEvent>,
}

// ===== impl Spark =====

impl Spark {
    // Validates the configuration and spawns the protocol instance on the
    // current runtime.
    pub fn spawn<I>(config: Config, io: I) -> Result<Spark, Error>
    where
        I: IoProvider,
    {
        config.validate()?;
        let areas =
            AreaMatcher::new(&config.areas).map_err(Error::InvalidAreaRegex)?;

        let (api_tx, api_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (proto_tx, proto_rx) = protocol_input_channels();

        let instance = SparkInstance {
            config,
            areas,
            io: Arc::new(io),
            interfaces: Default::default(),
            seq_num: 0,
            hello_history: Default::default(),
            counters: Default::default(),
            event_tx: event_tx.clone(),
            proto_tx,
        };

        let mut task =
            spark_utils::task::Task::spawn(run(instance, proto_rx, api_rx));
        task.detach();

        Ok(Spark { api_tx, event_tx })
    }

    // Replaces the set of tracked interfaces.
    //
    // Returns false when a record is malformed, in which case nothing is
    // applied.
    pub async fn update_interface_db(
        &self,
        interfaces: Vec<InterfaceRecord>,
    ) -> bool {
        let (responder, response) = oneshot::channel();
        let msg = ApiMsg::UpdateInterfaceDb {
            interfaces,
            responder,
        };
        if self.api_tx.send(msg).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    // Returns the state of the given neighbor, if tracked.
    pub async fn get_neighbor_state(
        &self,
        ifname: &str,
        node_name: &str,
    ) -> Option<State> {
        let (responder, response) = oneshot::channel();
        let msg = ApiMsg::NeighborState {
            ifname: ifname.to_owned(),
            node_name: node_name.to_owned(),
            responder,
        };
        if self.api_tx.send(msg).await.is_err() {
            return None;
        }
        response.await.ok().flatten()
    }

    // Forces down all neighbors reachable through any of the given
    // transport addresses.
    pub async fn send_neighbor_down_info(&self, addrs: Vec<IpAddr>) {
        let (responder, response) = oneshot::channel();
        let msg = ApiMsg::NeighborDown { addrs, responder };
        if self.api_tx.send(msg).await.is_ok() {
            let _ = response.await;
        }
    }

    // Returns a snapshot of the protocol counters.
    pub async fn counters(&self) -> Counters {
        let (responder, response) = oneshot::channel();
        let msg = ApiMsg::GetCounters { responder };
        if self.api_tx.send(msg).await.is_err() {
            return Default::default();
        }
        response.await.unwrap_or_default()
    }

    // Subscribes to the neighbor event stream.
    //
    // Events for a single neighbor arrive in causal order. A slow
    // subscriber loses the oldest buffered events and observes the count
    // through [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<NeighborEvent> {
        self.event_tx.subscribe()
    }

    // Shuts the instance down, advertising the restart to all neighbors
    // first. Resolves once the final hellos were handed to the provider.
    pub async fn stop(self) {
        let (responder, response) = oneshot::channel();
        let msg = ApiMsg::Stop { responder };
        if self.api_tx.send(msg).await.is_ok() {
            let _ = response.await;
        }
    }
}

// ===== impl SparkInstance =====

impl<I> SparkInstance<I>
where
    I: IoProvider,
{
    // Orderly shutdown: let every neighbor know we intend to come back.
    async fn shutdown(mut self) {
        let ifnames: Vec<_> = self.interfaces.keys().cloned().collect();
        for ifname in ifnames {
            if events::send_restarting_hello(&mut self, &ifname)
                .await
                .is_ok()
            {
                Debug::GracefulRestartAdvertised(&ifname).log();
            }
        }
        Debug::InstanceStop.log();
    }
}

// ===== helper functions =====

fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (hello_timerp, hello_timerc) = mpsc::channel(4);
    let (handshake_timerp, handshake_timerc) = mpsc::channel(4);
    let (heartbeat_timerp, heartbeat_timerc) = mpsc::channel(4);
    let (hold_timerp, hold_timerc) = mpsc::channel(4);

    let tx = ProtocolInputChannelsTx {
        hello_timer: hello_timerp,
        handshake_timer: handshake_timerp,
        heartbeat_timer: heartbeat_timerp,
        hold_timer: hold_timerp,
    };
    let rx = ProtocolInputChannelsRx {
        hello_timer: hello_timerc,
        handshake_timer: handshake_timerc,
        heartbeat_timer: heartbeat_timerc,
        hold_timer: hold_timerc,
    };

    (tx, rx)
}

async fn run<I>(
    mut instance: SparkInstance<I>,
    mut proto_rx: ProtocolInputChannelsRx,
    mut api_rx: Receiver<ApiMsg>,
) where
    I: IoProvider,
{
    Debug::InstanceStart.log();

    // Packet Rx task. The channel sender lives only inside the task, so a
    // dead provider surfaces here as a closed channel.
    let (packet_rxp, mut packet_rxc) = mpsc::channel::<RxPacketMsg>(64);
    let _packet_rx_task = tasks::packet_rx(instance.io.clone(), packet_rxp);

    let mut stop_responder = None;

    // Main event loop.
    loop {
        tokio::select! {
            msg = api_rx.recv() => {
                match msg {
                    Some(ApiMsg::UpdateInterfaceDb { interfaces, responder }) => {
                        let accepted = events::process_interface_update(
                            &mut instance,
                            interfaces,
                        );
                        let _ = responder.send(accepted);
                    }
                    Some(ApiMsg::NeighborState { ifname, node_name, responder }) => {
                        let state = instance
                            .interfaces
                            .get(&ifname)
                            .and_then(|iface| iface.neighbors.get(&node_name))
                            .map(|nbr| nbr.state);
                        let _ = responder.send(state);
                    }
                    Some(ApiMsg::NeighborDown { addrs, responder }) => {
                        events::process_neighbor_down_request(
                            &mut instance,
                            &addrs,
                        );
                        let _ = responder.send(());
                    }
                    Some(ApiMsg::GetCounters { responder }) => {
                        let _ = responder.send(instance.counters.clone());
                    }
                    Some(ApiMsg::Stop { responder }) => {
                        stop_responder = Some(responder);
                        break;
                    }
                    // All handles are gone.
                    None => break,
                }
            }
            msg = packet_rxc.recv() => {
                match msg {
                    Some(msg) => {
                        if let Err(error) =
                            events::process_packet(&mut instance, msg).await
                        {
                            error.log();
                        }
                    }
                    None => {
                        // The provider died; the instance cannot run on.
                        Error::from(crate::error::IoError::ProviderClosed)
                            .log();
                        break;
                    }
                }
            }
            Some(msg) = proto_rx.hello_timer.recv() => {
                if let Err(error) =
                    events::process_hello_timer(&mut instance, msg).await
                {
                    error.log();
                }
            }
            Some(msg) = proto_rx.handshake_timer.recv() => {
                if let Err(error) =
                    events::process_handshake_timer(&mut instance, msg).await
                {
                    error.log();
                }
            }
            Some(msg) = proto_rx.heartbeat_timer.recv() => {
                if let Err(error) =
                    events::process_heartbeat_timer(&mut instance, msg).await
                {
                    error.log();
                }
            }
            Some(msg) = proto_rx.hold_timer.recv() => {
                events::process_hold_timer(&mut instance, msg);
            }
        }
    }

    // Drain the final restart advertisements before going away.
    instance.shutdown().await;

    if let Some(responder) = stop_responder {
        let _ = responder.send(());
    }
}
