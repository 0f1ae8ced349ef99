//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ipnetwork::{Ipv4Network, Ipv6Network};
use tokio::sync::broadcast;

use crate::area::DEFAULT_AREA_ID;
use crate::config::Config;
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::instance::{
    Counters, NeighborEvent, NeighborEventType, ProtocolInputChannelsTx,
    SparkInstance,
};
use crate::interface::{InterfaceRecord, SparkInterface};
use crate::neighbor::{Event, Neighbor, State};
use crate::network::{IoProvider, RxPacketMsg, UDP_PORT, mcast_sockaddr, now_us};
use crate::packet::{
    HandshakeMsg, HeartbeatMsg, HelloFlags, HelloMsg, Packet,
    ReflectedNeighborInfo, SPARK2_VERSION_MIN,
};
use crate::tasks;
use crate::tasks::messages::input::{
    HandshakeTimerMsg, HeartbeatTimerMsg, HelloTimerMsg, HoldTimerKind,
    HoldTimerMsg,
};

// How many recent hello send timestamps are kept for round-trip estimation.
const HELLO_HISTORY_DEPTH: usize = 64;

// ===== Public API events =====

// Replaces the tracked interface set with the given database.
pub(crate) fn process_interface_update<I>(
    instance: &mut SparkInstance<I>,
    records: Vec<InterfaceRecord>,
) -> bool
where
    I: IoProvider,
{
    if records.iter().any(|record| !record.is_valid()) {
        return false;
    }

    let SparkInstance {
        config,
        io,
        interfaces,
        event_tx,
        proto_tx,
        ..
    } = instance;

    let db: BTreeMap<String, InterfaceRecord> = records
        .into_iter()
        .map(|record| (record.name.clone(), record))
        .collect();

    // Removals (and index changes, which count as removal plus addition)
    // tear everything on the interface down synchronously.
    let current: Vec<String> = interfaces.keys().cloned().collect();
    for name in current {
        match db.get(&name) {
            Some(record) if record.ifindex == interfaces[&name].ifindex => {
                interfaces.get_mut(&name).unwrap().update_addresses(record);
            }
            _ => {
                let iface = interfaces.remove(&name).unwrap();
                teardown_interface(io, event_tx, iface);
            }
        }
    }

    // Additions begin the accelerated discovery phase.
    for (name, record) in &db {
        if interfaces.contains_key(name) {
            continue;
        }
        if let Err(error) = io.add_interface(name, record.ifindex) {
            IoError::InterfaceAttachError(name.clone(), error).log();
            continue;
        }
        let mut iface = SparkInterface::new(record);
        iface.tasks.hello_interval = Some(tasks::hello_interval(
            name,
            config.fastinit_hello_interval(),
            true,
            &proto_tx.hello_timer,
        ));
        interfaces.insert(name.clone(), iface);
        Debug::InterfaceStart(name).log();
    }

    true
}

// Forces down all neighbors reachable through any of the given addresses.
pub(crate) fn process_neighbor_down_request<I>(
    instance: &mut SparkInstance<I>,
    addrs: &[IpAddr],
) where
    I: IoProvider,
{
    let SparkInstance {
        config,
        interfaces,
        event_tx,
        proto_tx,
        ..
    } = instance;

    for iface in interfaces.values_mut() {
        let matches: Vec<String> = iface
            .neighbors
            .values()
            .filter(|nbr| {
                nbr.transport_v4
                    .map(IpAddr::V4)
                    .is_some_and(|addr| addrs.contains(&addr))
                    || nbr
                        .transport_v6
                        .map(IpAddr::V6)
                        .is_some_and(|addr| addrs.contains(&addr))
            })
            .map(|nbr| nbr.node_name.clone())
            .collect();

        for node_name in matches {
            let nbr = iface.neighbors.remove(&node_name).unwrap();
            if nbr.state == State::Established {
                publish(
                    event_tx,
                    neighbor_event(NeighborEventType::Down, &iface.name, &nbr),
                );
            }
            Debug::NeighborDelete(&iface.name, &node_name).log();
        }
        sync_heartbeat_interval(config, proto_tx, iface);
    }
}

// ===== Packet receive path =====

pub(crate) async fn process_packet<I>(
    instance: &mut SparkInstance<I>,
    msg: RxPacketMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    instance.counters.rx_packets += 1;

    let packet = match Packet::decode(&msg.data) {
        Ok(packet) => packet,
        Err(error) => {
            instance.counters.rx_decode_errors += 1;
            return Err(Error::PacketDecodeError(error));
        }
    };

    // Domain, self-loop and version guards apply before any processing.
    let (domain, node_name) = packet.sender();
    if domain != instance.config.domain_name {
        instance.counters.rx_dropped_domain += 1;
        return Err(Error::DomainMismatch(domain.to_owned()));
    }
    if node_name == instance.config.node_name {
        instance.counters.rx_dropped_self_loop += 1;
        return Err(Error::SelfLoopedPacket(msg.ifname));
    }
    if packet.version() < instance.config.min_supported_version {
        instance.counters.rx_dropped_version += 1;
        return Err(Error::VersionTooOld(
            node_name.to_owned(),
            packet.version(),
        ));
    }

    match packet {
        Packet::Hello(hello) => {
            process_hello(instance, &msg.ifname, hello, msg.recv_ts_us).await
        }
        Packet::Handshake(handshake) => {
            process_handshake(instance, &msg.ifname, handshake).await
        }
        Packet::Heartbeat(heartbeat) => {
            process_heartbeat(instance, &msg.ifname, heartbeat)
        }
    }
}

async fn process_hello<I>(
    instance: &mut SparkInstance<I>,
    ifname: &str,
    hello: HelloMsg,
    recv_ts_us: u64,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        areas,
        io,
        interfaces,
        seq_num,
        hello_history,
        counters,
        event_tx,
        proto_tx,
    } = instance;

    let Some(iface) = interfaces.get_mut(ifname) else {
        return Err(Error::InterfaceNotFound(ifname.to_owned()));
    };

    let spark2 =
        config.enable_spark2 && hello.version >= SPARK2_VERSION_MIN;
    let reflected = hello.neighbors.get(&config.node_name).copied();
    let solicit = hello.flags.contains(HelloFlags::SOLICIT);

    // Look up or create the neighbor entry.
    let nbr = match iface.neighbors.entry(hello.node_name.clone()) {
        btree_map::Entry::Occupied(entry) => entry.into_mut(),
        btree_map::Entry::Vacant(entry) => {
            let proposed_area = areas
                .match_area(&hello.node_name, ifname)
                .map(str::to_owned);
            entry.insert(Neighbor::new(
                ifname,
                hello.node_name.clone(),
                proposed_area,
                config.heartbeat_hold(),
                config.gr_hold(),
            ))
        }
    };
    nbr.statistics.hello_rx_count += 1;
    nbr.version = hello.version;

    // Addresses learned from the hello.
    if hello.v4_addr.is_some() {
        nbr.transport_v4 = hello.v4_addr;
    }
    if hello.v6_addr.is_some() {
        nbr.transport_v6 = hello.v6_addr;
    }

    // Track what the peer last heard from us, and in the hello-only mode
    // adopt the hold time it advertises alongside.
    if let Some(info) = &reflected {
        nbr.local_seq_reflected = info.seq_seen;
        if !spark2 && info.hold_time_ms != 0 {
            nbr.gr_hold = Duration::from_millis(info.hold_time_ms as u64);
        }
    }

    // Peer advertising an orderly restart.
    if hello.flags.contains(HelloFlags::RESTARTING) {
        if nbr.state == State::Established {
            if !nbr.restarting {
                nbr.restarting = true;
                publish(
                    event_tx,
                    neighbor_event(NeighborEventType::Restarting, ifname, nbr),
                );
            }
            // Liveness is governed by the restart window alone from here.
            nbr.timers.heartbeat_hold = None;
            match &mut nbr.timers.gr_hold {
                Some(timer) => timer.reset(None),
                None => {
                    nbr.timers.gr_hold = Some(tasks::hold_timer(
                        ifname,
                        &nbr.node_name,
                        HoldTimerKind::GracefulRestart,
                        nbr.gr_hold,
                        &proto_tx.hold_timer,
                    ));
                }
            }
            nbr.remote_seq_num = hello.seq_num;
            nbr.remote_seq_rx_us = recv_ts_us;
        }
        return Ok(());
    }

    // Peer returning within the restart window. A sequence number strictly
    // below the last accepted one means a fresh instance; the adjacency
    // survives without a down/up cycle.
    if nbr.restarting {
        if hello.seq_num < nbr.remote_seq_num {
            nbr.restarting = false;
            nbr.spark2 = spark2;
            nbr.timers.gr_hold = None;
            nbr.remote_seq_num = hello.seq_num;
            nbr.remote_seq_rx_us = recv_ts_us;
            // The fresh instance has not relearned us yet; hellos without
            // our identity are expected until it does.
            nbr.local_seq_reflected = 0;
            start_heartbeat_hold(ifname, nbr, proto_tx);
            publish(
                event_tx,
                neighbor_event(NeighborEventType::Restarted, ifname, nbr),
            );
        }
        return Ok(());
    }

    nbr.spark2 = spark2;
    nbr.remote_seq_num = hello.seq_num;
    nbr.remote_seq_rx_us = recv_ts_us;

    // Round-trip sample from the reflected timestamps: total elapsed time
    // for the echoed hello minus the peer's turnaround time.
    if let Some(info) = &reflected
        && let Some(tx_ts) = hello_history.get(&info.seq_seen).copied()
        && let Some(turnaround) = hello.sent_ts_us.checked_sub(info.recv_ts_us)
        && let Some(elapsed) = recv_ts_us.checked_sub(tx_ts)
        && let Some(rtt_us) = elapsed.checked_sub(turnaround)
    {
        nbr.rtt.sample(rtt_us);
        if nbr.state == State::Established
            && let Some(_estimate) = nbr.rtt.report_due()
        {
            publish(
                event_tx,
                neighbor_event(NeighborEventType::RttChange, ifname, nbr),
            );
        }
    }

    // Drive the state machine.
    let mut went_up = false;
    match (nbr.state, reflected.is_some()) {
        (State::Idle, has_info) => {
            nbr.fsm(
                ifname,
                if has_info {
                    Event::HelloRcvdInfo
                } else {
                    Event::HelloRcvdNoInfo
                },
            );
            if has_info {
                went_up =
                    bidirectional_detected(config, ifname, nbr, event_tx, proto_tx);
            }
        }
        (State::Warm, true) => {
            went_up =
                bidirectional_detected(config, ifname, nbr, event_tx, proto_tx);
        }
        (State::Warm, false) | (State::Negotiate, _) => {}
        (State::Established, true) => {
            start_heartbeat_hold(ifname, nbr, proto_tx);
        }
        (State::Established, false) => {
            if nbr.local_seq_reflected == 0 {
                // Restarted peer still resynchronizing; it is alive, so
                // keep the hold from expiring underneath it.
                start_heartbeat_hold(ifname, nbr, proto_tx);
            } else {
                // The peer no longer hears us; the adjacency is gone but
                // the neighbor is still talking, so it stays in the table.
                nbr.statistics.last_down_time = Some(Utc::now());
                publish(
                    event_tx,
                    neighbor_event(NeighborEventType::Down, ifname, nbr),
                );
                nbr.fsm(ifname, Event::HelloRcvdNoInfo);
                nbr.reset_adjacency();
            }
        }
    }

    // Follow-up transmissions, after the neighbor borrow ends.
    let iface = interfaces.get_mut(ifname).unwrap();
    sync_heartbeat_interval(config, proto_tx, iface);
    if went_up {
        finish_fast_init(config, iface);
        send_hello(
            io,
            config,
            counters,
            seq_num,
            hello_history,
            iface,
            HelloFlags::SOLICIT,
        )
        .await?;
    } else if solicit
        && now_us().saturating_sub(iface.last_hello_tx_us)
            >= config.keepalive_interval_ms * 1000
    {
        send_hello(
            io,
            config,
            counters,
            seq_num,
            hello_history,
            iface,
            HelloFlags::empty(),
        )
        .await?;
    }

    Ok(())
}

async fn process_handshake<I>(
    instance: &mut SparkInstance<I>,
    ifname: &str,
    handshake: HandshakeMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        io,
        interfaces,
        seq_num,
        hello_history,
        counters,
        event_tx,
        proto_tx,
        ..
    } = instance;

    // Handshakes are unicast; over multicast-capable providers everyone on
    // the segment may still see them.
    if handshake.neighbor_node_name != config.node_name {
        counters.rx_dropped_misaddressed += 1;
        return Err(Error::MisaddressedHandshake(
            handshake.node_name,
            handshake.neighbor_node_name,
        ));
    }
    if !config.enable_spark2 {
        return Ok(());
    }

    let Some(iface) = interfaces.get_mut(ifname) else {
        return Err(Error::InterfaceNotFound(ifname.to_owned()));
    };
    let iface_v4 = iface.v4_addr;
    let iface_v6 = iface.v6_link_local;

    // A handshake from a node we never heard a hello from carries too
    // little trust to act on.
    let Some(nbr) = iface.neighbors.get_mut(&handshake.node_name) else {
        return Err(Error::NeighborNotFound(
            ifname.to_owned(),
            handshake.node_name,
        ));
    };

    nbr.statistics.handshake_rx_count += 1;

    // Peer-advertised parameters.
    nbr.heartbeat_hold =
        Duration::from_millis(handshake.heartbeat_hold_ms as u64);
    nbr.gr_hold = Duration::from_millis(handshake.gr_hold_ms as u64);
    if handshake.transport_v4.is_some() {
        nbr.transport_v4 = handshake.transport_v4;
    }
    if handshake.transport_v6.is_some() {
        nbr.transport_v6 = handshake.transport_v6;
    }

    let mut reply = false;
    let mut went_up = false;
    match nbr.state {
        State::Established => {
            // Duplicate handshakes refresh the adjacency but never
            // re-raise it. The reply lets a peer that is still
            // negotiating complete its side.
            start_heartbeat_hold(ifname, nbr, proto_tx);
            reply = !handshake.adj_established;
        }
        State::Negotiate => {
            // Both sides must have computed the same area, and the peer's
            // transport address must sit on our subnet. A node without
            // area configuration proposes the default area, which the
            // other side accepts whatever it computed itself.
            let area = match (&nbr.proposed_area, &handshake.area) {
                (Some(local), Some(remote)) if local == remote => {
                    Some(local.clone())
                }
                (Some(local), Some(remote))
                    if local == DEFAULT_AREA_ID
                        || remote == DEFAULT_AREA_ID =>
                {
                    Some(DEFAULT_AREA_ID.to_owned())
                }
                _ => None,
            };
            if area.is_none() {
                Debug::NegotiationFailure(
                    ifname,
                    &nbr.node_name,
                    "area mismatch",
                )
                .log();
                nbr.fsm(ifname, Event::NegotiationFailure);
                nbr.timers.negotiate_hold = None;
                nbr.timers.handshake_interval = None;
            } else if !v4_subnet_valid(config, iface_v4, nbr.transport_v4) {
                Debug::NegotiationFailure(
                    ifname,
                    &nbr.node_name,
                    "v4 subnet mismatch",
                )
                .log();
                nbr.fsm(ifname, Event::NegotiationFailure);
                nbr.timers.negotiate_hold = None;
                nbr.timers.handshake_interval = None;
            } else {
                nbr.fsm(ifname, Event::HandshakeRcvd);
                nbr.area = area;
                nbr.spark2 = true;
                nbr.timers.negotiate_hold = None;
                nbr.timers.handshake_interval = None;
                start_heartbeat_hold(ifname, nbr, proto_tx);
                nbr.statistics.last_up_time = Some(Utc::now());
                nbr.rtt.mark_reported();
                publish(
                    event_tx,
                    neighbor_event(NeighborEventType::Up, ifname, nbr),
                );
                reply = !handshake.adj_established;
                went_up = true;
            }
        }
        // Too early: the hello exchange will bring us to the negotiation
        // stage and the peer keeps retransmitting until then.
        State::Idle | State::Warm => {}
    }

    let node_name = nbr.node_name.clone();
    let reply_to_v6 = nbr.transport_v6;
    let proposed_area = nbr.proposed_area.clone();

    let iface = interfaces.get_mut(ifname).unwrap();
    sync_heartbeat_interval(config, proto_tx, iface);

    if reply {
        send_handshake(
            io,
            config,
            counters,
            ifname,
            iface_v4,
            iface_v6,
            &node_name,
            reply_to_v6,
            proposed_area,
            true,
        )
        .await?;
    }
    if went_up {
        let iface = interfaces.get_mut(ifname).unwrap();
        finish_fast_init(config, iface);
        send_hello(
            io,
            config,
            counters,
            seq_num,
            hello_history,
            iface,
            HelloFlags::SOLICIT,
        )
        .await?;
    }

    Ok(())
}

fn process_heartbeat<I>(
    instance: &mut SparkInstance<I>,
    ifname: &str,
    heartbeat: HeartbeatMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        interfaces,
        proto_tx,
        ..
    } = instance;

    if !config.enable_spark2 {
        return Ok(());
    }

    let Some(iface) = interfaces.get_mut(ifname) else {
        return Err(Error::InterfaceNotFound(ifname.to_owned()));
    };
    let Some(nbr) = iface.neighbors.get_mut(&heartbeat.node_name) else {
        return Err(Error::NeighborNotFound(
            ifname.to_owned(),
            heartbeat.node_name,
        ));
    };

    nbr.statistics.heartbeat_rx_count += 1;
    if nbr.state == State::Established && !nbr.restarting {
        start_heartbeat_hold(ifname, nbr, proto_tx);
    }

    Ok(())
}

// ===== Timer events =====

pub(crate) async fn process_hello_timer<I>(
    instance: &mut SparkInstance<I>,
    msg: HelloTimerMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        io,
        interfaces,
        seq_num,
        hello_history,
        counters,
        ..
    } = instance;

    let Some(iface) = interfaces.get_mut(&msg.ifname) else {
        return Ok(());
    };

    let mut flags = HelloFlags::empty();
    if iface.fast_init_rounds > 0 {
        flags.insert(HelloFlags::SOLICIT);
        iface.fast_init_rounds -= 1;
        if iface.fast_init_rounds == 0
            && let Some(task) = &mut iface.tasks.hello_interval
        {
            task.reset(Some(config.hello_interval()));
        }
    }

    send_hello(io, config, counters, seq_num, hello_history, iface, flags)
        .await
}

pub(crate) async fn process_handshake_timer<I>(
    instance: &mut SparkInstance<I>,
    msg: HandshakeTimerMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        io,
        interfaces,
        counters,
        ..
    } = instance;

    let Some(iface) = interfaces.get(&msg.ifname) else {
        return Ok(());
    };
    let Some(nbr) = iface.neighbors.get(&msg.node_name) else {
        return Ok(());
    };
    if nbr.state != State::Negotiate {
        return Ok(());
    }

    send_handshake(
        io,
        config,
        counters,
        &msg.ifname,
        iface.v4_addr,
        iface.v6_link_local,
        &msg.node_name,
        nbr.transport_v6,
        nbr.proposed_area.clone(),
        false,
    )
    .await
}

pub(crate) async fn process_heartbeat_timer<I>(
    instance: &mut SparkInstance<I>,
    msg: HeartbeatTimerMsg,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        io,
        interfaces,
        seq_num,
        counters,
        ..
    } = instance;

    let Some(iface) = interfaces.get(&msg.ifname) else {
        return Ok(());
    };
    if !iface.has_active_adjacency() {
        return Ok(());
    }

    *seq_num += 1;
    let heartbeat = HeartbeatMsg {
        version: config.advertised_version(),
        domain: config.domain_name.clone(),
        node_name: config.node_name.clone(),
        seq_num: *seq_num,
    };
    let data = Packet::Heartbeat(heartbeat).encode().freeze();
    transmit(io, counters, &msg.ifname, mcast_sockaddr(), data).await
}

pub(crate) fn process_hold_timer<I>(
    instance: &mut SparkInstance<I>,
    msg: HoldTimerMsg,
) where
    I: IoProvider,
{
    let SparkInstance {
        config,
        interfaces,
        event_tx,
        proto_tx,
        ..
    } = instance;

    let Some(iface) = interfaces.get_mut(&msg.ifname) else {
        return;
    };
    let Some(nbr) = iface.neighbors.get_mut(&msg.node_name) else {
        return;
    };

    match msg.timer {
        HoldTimerKind::Negotiate => {
            if nbr.state != State::Negotiate {
                return;
            }
            Debug::HoldTimerExpiry(&msg.ifname, &msg.node_name, msg.timer)
                .log();
            nbr.fsm(&msg.ifname, Event::NegotiateTimerExpire);
            nbr.timers.negotiate_hold = None;
            nbr.timers.handshake_interval = None;
        }
        HoldTimerKind::Heartbeat => {
            if nbr.state != State::Established || nbr.restarting {
                return;
            }
            // An expiry that raced with a refresh on the event queue is
            // void.
            let holdtime = if nbr.spark2 {
                nbr.heartbeat_hold
            } else {
                nbr.gr_hold
            };
            if now_us().saturating_sub(nbr.hold_refreshed_us)
                < holdtime.as_micros() as u64
            {
                return;
            }
            Debug::HoldTimerExpiry(&msg.ifname, &msg.node_name, msg.timer)
                .log();
            publish(
                event_tx,
                neighbor_event(NeighborEventType::Down, &msg.ifname, nbr),
            );
            iface.neighbors.remove(&msg.node_name);
            Debug::NeighborDelete(&msg.ifname, &msg.node_name).log();
            sync_heartbeat_interval(config, proto_tx, iface);
        }
        HoldTimerKind::GracefulRestart => {
            if !nbr.restarting {
                return;
            }
            Debug::HoldTimerExpiry(&msg.ifname, &msg.node_name, msg.timer)
                .log();
            publish(
                event_tx,
                neighbor_event(NeighborEventType::Down, &msg.ifname, nbr),
            );
            iface.neighbors.remove(&msg.node_name);
            Debug::NeighborDelete(&msg.ifname, &msg.node_name).log();
            sync_heartbeat_interval(config, proto_tx, iface);
        }
    }
}

// ===== Outbound path =====

// Sends the final hello advertising an orderly restart.
pub(crate) async fn send_restarting_hello<I>(
    instance: &mut SparkInstance<I>,
    ifname: &str,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let SparkInstance {
        config,
        io,
        interfaces,
        seq_num,
        hello_history,
        counters,
        ..
    } = instance;

    let Some(iface) = interfaces.get_mut(ifname) else {
        return Ok(());
    };
    send_hello(
        io,
        config,
        counters,
        seq_num,
        hello_history,
        iface,
        HelloFlags::RESTARTING,
    )
    .await
}

async fn send_hello<I>(
    io: &Arc<I>,
    config: &Config,
    counters: &mut Counters,
    seq_num: &mut u64,
    hello_history: &mut BTreeMap<u64, u64>,
    iface: &mut SparkInterface,
    flags: HelloFlags,
) -> Result<(), Error>
where
    I: IoProvider,
{
    *seq_num += 1;
    let sent_ts_us = now_us();

    // Reflect every neighbor currently heard on the interface so that the
    // recipients can confirm bidirectional reachability.
    let mut neighbors = BTreeMap::new();
    for nbr in iface.neighbors.values() {
        neighbors.insert(
            nbr.node_name.clone(),
            ReflectedNeighborInfo::new(
                nbr.remote_seq_num,
                config.gr_hold_ms as u32,
                nbr.remote_seq_rx_us,
            ),
        );
    }

    let hello = HelloMsg {
        version: config.advertised_version(),
        domain: config.domain_name.clone(),
        node_name: config.node_name.clone(),
        seq_num: *seq_num,
        flags,
        sent_ts_us,
        v4_addr: iface.v4_addr.map(|network| network.ip()),
        v6_addr: iface.v6_link_local.map(|network| network.ip()),
        neighbors,
    };

    hello_history.insert(*seq_num, sent_ts_us);
    while hello_history.len() > HELLO_HISTORY_DEPTH {
        hello_history.pop_first();
    }
    iface.last_hello_tx_us = sent_ts_us;

    let data = Packet::Hello(hello).encode().freeze();
    transmit(io, counters, &iface.name, mcast_sockaddr(), data).await
}

#[allow(clippy::too_many_arguments)]
async fn send_handshake<I>(
    io: &Arc<I>,
    config: &Config,
    counters: &mut Counters,
    ifname: &str,
    local_v4: Option<Ipv4Network>,
    local_v6: Option<Ipv6Network>,
    neighbor_node_name: &str,
    neighbor_v6: Option<Ipv6Addr>,
    proposed_area: Option<String>,
    adj_established: bool,
) -> Result<(), Error>
where
    I: IoProvider,
{
    let handshake = HandshakeMsg {
        version: config.advertised_version(),
        domain: config.domain_name.clone(),
        node_name: config.node_name.clone(),
        neighbor_node_name: neighbor_node_name.to_owned(),
        area: proposed_area,
        transport_v4: local_v4.map(|network| network.ip()),
        transport_v6: local_v6.map(|network| network.ip()),
        heartbeat_hold_ms: config.heartbeat_hold_ms as u32,
        gr_hold_ms: config.gr_hold_ms as u32,
        adj_established,
    };

    let dst = match neighbor_v6 {
        Some(addr) => SocketAddr::from((addr, UDP_PORT)),
        None => mcast_sockaddr(),
    };
    let data = Packet::Handshake(handshake).encode().freeze();
    transmit(io, counters, ifname, dst, data).await
}

async fn transmit<I>(
    io: &Arc<I>,
    counters: &mut Counters,
    ifname: &str,
    dst: SocketAddr,
    data: bytes::Bytes,
) -> Result<(), Error>
where
    I: IoProvider,
{
    match io.send_packet(ifname, dst, data).await {
        Ok(()) => {
            counters.tx_packets += 1;
            Ok(())
        }
        Err(error) => {
            counters.tx_errors += 1;
            Err(IoError::SendError(error).into())
        }
    }
}

// ===== helper functions =====

// Handles the moment bidirectional visibility is confirmed: negotiation
// starts, or in the hello-only mode the adjacency is raised directly.
// Returns whether an adjacency came up.
fn bidirectional_detected(
    config: &Config,
    ifname: &str,
    nbr: &mut Neighbor,
    event_tx: &broadcast::Sender<NeighborEvent>,
    proto_tx: &ProtocolInputChannelsTx,
) -> bool {
    if nbr.spark2 {
        nbr.fsm(ifname, Event::HelloRcvdInfo);
        nbr.timers.negotiate_hold = Some(tasks::hold_timer(
            ifname,
            &nbr.node_name,
            HoldTimerKind::Negotiate,
            config.negotiate_hold(),
            &proto_tx.hold_timer,
        ));
        nbr.timers.handshake_interval = Some(tasks::handshake_interval(
            ifname,
            &nbr.node_name,
            config.handshake_interval(),
            &proto_tx.handshake_timer,
        ));
        false
    } else {
        // Hello-only peers form the adjacency on reflection alone.
        let Some(area) = nbr.proposed_area.clone() else {
            return false;
        };
        nbr.fsm(ifname, Event::HelloRcvdInfo);
        nbr.fsm(ifname, Event::HandshakeRcvd);
        nbr.area = Some(area);
        start_heartbeat_hold(ifname, nbr, proto_tx);
        nbr.statistics.last_up_time = Some(Utc::now());
        nbr.rtt.mark_reported();
        publish(
            event_tx,
            neighbor_event(NeighborEventType::Up, ifname, nbr),
        );
        true
    }
}

// (Re)arms the liveness hold timer of an adjacency. A fresh task is
// created every time so that a timer that already fired cannot linger.
fn start_heartbeat_hold(
    ifname: &str,
    nbr: &mut Neighbor,
    proto_tx: &ProtocolInputChannelsTx,
) {
    let holdtime = if nbr.spark2 {
        nbr.heartbeat_hold
    } else {
        nbr.gr_hold
    };
    nbr.hold_refreshed_us = now_us();
    nbr.timers.heartbeat_hold = Some(tasks::hold_timer(
        ifname,
        &nbr.node_name,
        HoldTimerKind::Heartbeat,
        holdtime,
        &proto_tx.hold_timer,
    ));
}

// Keeps the per-interface heartbeat emission in lockstep with the set of
// established adjacencies.
fn sync_heartbeat_interval(
    config: &Config,
    proto_tx: &ProtocolInputChannelsTx,
    iface: &mut SparkInterface,
) {
    let active = iface.has_active_adjacency();
    if active && iface.tasks.heartbeat_interval.is_none() {
        iface.tasks.heartbeat_interval = Some(tasks::heartbeat_interval(
            &iface.name,
            config.heartbeat_interval(),
            &proto_tx.heartbeat_timer,
        ));
    } else if !active && iface.tasks.heartbeat_interval.is_some() {
        iface.tasks.heartbeat_interval = None;
    }
}

// Ends the accelerated discovery phase early.
fn finish_fast_init(config: &Config, iface: &mut SparkInterface) {
    if iface.fast_init_rounds > 0 {
        iface.fast_init_rounds = 0;
        if let Some(task) = &mut iface.tasks.hello_interval {
            task.reset(Some(config.hello_interval()));
        }
    }
}

fn teardown_interface<I>(
    io: &Arc<I>,
    event_tx: &broadcast::Sender<NeighborEvent>,
    iface: SparkInterface,
) where
    I: IoProvider,
{
    for nbr in iface.neighbors.values() {
        if nbr.state == State::Established {
            publish(
                event_tx,
                neighbor_event(NeighborEventType::Down, &iface.name, nbr),
            );
        }
    }
    io.remove_interface(&iface.name, iface.ifindex);
    Debug::InterfaceStop(&iface.name).log();
}

fn v4_subnet_valid(
    config: &Config,
    local: Option<Ipv4Network>,
    peer: Option<Ipv4Addr>,
) -> bool {
    if !config.enable_v4 {
        return true;
    }
    match (local, peer) {
        (Some(network), Some(addr)) => network.contains(addr),
        (None, None) => true,
        _ => false,
    }
}

fn neighbor_event(
    event_type: NeighborEventType,
    ifname: &str,
    nbr: &Neighbor,
) -> NeighborEvent {
    NeighborEvent {
        event_type,
        ifname: ifname.to_owned(),
        node_name: nbr.node_name.clone(),
        transport_v4: nbr.transport_v4,
        transport_v6: nbr.transport_v6,
        area: nbr
            .area
            .clone()
            .unwrap_or_else(|| DEFAULT_AREA_ID.to_owned()),
        rtt_us: nbr.rtt.estimate_us(),
    }
}

fn publish(
    event_tx: &broadcast::Sender<NeighborEvent>,
    event: NeighborEvent,
) {
    Debug::EventPublish(&event).log();
    let _ = event_tx.send(event);
}
