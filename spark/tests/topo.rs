//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//
// End-to-end protocol scenarios over the simulated network: nodes discover
// each other, negotiate adjacencies, survive restarts and report failures
// within their hold times.
//

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use spark::neighbor::State;
use spark::testing::MockNetwork;
use spark::{
    AreaConfig, Config, InterfaceRecord, NeighborEvent, NeighborEventType,
    Spark,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

const DOMAIN: &str = "Fire_and_Blood";

const HELLO_TIME: Duration = Duration::from_millis(200);
const HEARTBEAT_HOLD_TIME: Duration = Duration::from_millis(200);
const NEGOTIATE_HOLD_TIME: Duration = Duration::from_millis(500);
const GR_HOLD_TIME: Duration = Duration::from_millis(500);

// Generous bound for an adjacency to come up from scratch.
const UP_DEADLINE: Duration = Duration::from_millis(1400);

//
// Helper functions.
//

fn test_config(node_name: &str) -> Config {
    Config {
        domain_name: DOMAIN.to_owned(),
        node_name: node_name.to_owned(),
        ..Default::default()
    }
}

fn record(name: &str, ifindex: u32, v4: &str, v6: &str) -> InterfaceRecord {
    InterfaceRecord::new(
        name.to_owned(),
        ifindex,
        Some(v4.parse().unwrap()),
        Some(v6.parse().unwrap()),
    )
}

fn links(
    pairs: &[(&str, &str, u64)],
) -> HashMap<String, Vec<(String, Duration)>> {
    let mut map: HashMap<String, Vec<(String, Duration)>> = HashMap::new();
    for (from, to, delay_ms) in pairs {
        map.entry((*from).to_owned())
            .or_default()
            .push(((*to).to_owned(), Duration::from_millis(*delay_ms)));
    }
    map
}

struct TestNode {
    spark: Spark,
    events: broadcast::Receiver<NeighborEvent>,
}

impl TestNode {
    fn start(net: &MockNetwork, config: Config) -> TestNode {
        let spark = Spark::spawn(config, net.provider()).unwrap();
        let events = spark.subscribe();
        TestNode { spark, events }
    }

    // Waits for the next event of the given type, discarding others.
    async fn wait_for_event(
        &mut self,
        event_type: NeighborEventType,
        deadline: Duration,
    ) -> Option<NeighborEvent> {
        let end = Instant::now() + deadline;
        loop {
            let remaining = end.checked_duration_since(Instant::now())?;
            match timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) if event.event_type == event_type => {
                    return Some(event);
                }
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => return None,
            }
        }
    }

    // Asserts that no event whatsoever arrives within the given window.
    async fn expect_silence(&mut self, deadline: Duration) {
        let end = Instant::now() + deadline;
        while let Some(remaining) = end.checked_duration_since(Instant::now())
        {
            match timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) => {
                    panic!("unexpected neighbor event: {event:?}");
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => return,
            }
        }
    }
}

// Brings up two nodes on a symmetric 10 ms link and waits for both
// adjacencies, verifying the learned transport addresses.
async fn connect_two_nodes(net: &MockNetwork) -> (TestNode, TestNode) {
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut node1 = TestNode::start(net, test_config("node-1"));
    let mut node2 = TestNode::start(net, test_config("node-2"));

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    let event = node1
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-1 saw no adjacency");
    assert_eq!(event.ifname, "iface1");
    assert_eq!(event.node_name, "node-2");
    assert_eq!(event.transport_v4, Some("192.168.0.2".parse().unwrap()));
    assert_eq!(event.transport_v6, Some("fe80::2".parse().unwrap()));

    let event = node2
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-2 saw no adjacency");
    assert_eq!(event.ifname, "iface2");
    assert_eq!(event.node_name, "node-1");
    assert_eq!(event.transport_v4, Some("192.168.0.1".parse().unwrap()));
    assert_eq!(event.transport_v6, Some("fe80::1".parse().unwrap()));

    (node1, node2)
}

//
// Tests.
//

// Two nodes on a healthy link discover each other and raise the adjacency
// with the peer's transport addresses.
#[tokio::test]
async fn basic_adjacency_up() {
    let net = MockNetwork::new();
    let (node1, node2) = connect_two_nodes(&net).await;

    assert_eq!(
        node1.spark.get_neighbor_state("iface1", "node-2").await,
        Some(State::Established)
    );
    assert_eq!(
        node2.spark.get_neighbor_state("iface2", "node-1").await,
        Some(State::Established)
    );
}

// Link delay grows from 10 ms each way to 15/25 ms; both sides report the
// new round-trip time within tolerance.
#[tokio::test]
async fn rtt_change() {
    let net = MockNetwork::new();
    let (mut node1, mut node2) = connect_two_nodes(&net).await;

    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 15),
        ("iface2", "iface1", 25),
    ]));

    for node in [&mut node1, &mut node2] {
        let event = node
            .wait_for_event(NeighborEventType::RttChange, Duration::from_secs(5))
            .await
            .expect("no round-trip change reported");
        assert!(
            (30_000..=50_000).contains(&event.rtt_us),
            "rtt out of range: {}",
            event.rtt_us
        );
    }
}

// One direction of the link dies. The silent side loses the adjacency on
// its liveness hold; the other side loses it once its identity vanishes
// from the peer's hellos. Neither takes longer than the restart window.
#[tokio::test]
async fn unidirectional_link_down() {
    let net = MockNetwork::new();
    let (mut node1, mut node2) = connect_two_nodes(&net).await;

    let start = Instant::now();
    net.set_connected_pairs(links(&[("iface1", "iface2", 10)]));

    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(2))
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(2))
            .await
            .is_some()
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= HEARTBEAT_HOLD_TIME);
    assert!(elapsed <= GR_HOLD_TIME + HELLO_TIME);
}

// The link dies in both directions; each side times out on its own hold.
#[tokio::test]
async fn bidirectional_link_down() {
    let net = MockNetwork::new();
    let (mut node1, mut node2) = connect_two_nodes(&net).await;

    let start = Instant::now();
    net.set_connected_pairs(HashMap::new());

    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(2))
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(2))
            .await
            .is_some()
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= HEARTBEAT_HOLD_TIME);
    assert!(elapsed <= GR_HOLD_TIME);
}

// A node shuts down cleanly and comes back within the restart window: the
// survivor reports RESTARTING then RESTARTED, never DOWN, while the
// restarted node raises a fresh adjacency.
#[tokio::test]
async fn graceful_restart() {
    let net = MockNetwork::new();
    let (mut node1, node2) = connect_two_nodes(&net).await;

    node2.spark.stop().await;

    assert!(
        node1
            .wait_for_event(
                NeighborEventType::Restarting,
                Duration::from_secs(2)
            )
            .await
            .is_some()
    );

    let mut node2 = TestNode::start(&net, test_config("node-2"));
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    assert!(
        node1
            .wait_for_event(
                NeighborEventType::Restarted,
                Duration::from_secs(2)
            )
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
            .await
            .is_some()
    );

    // The surviving adjacency never cycled.
    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Down, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
}

// A node shuts down cleanly but never returns; the survivor holds the
// adjacency for the restart window, then declares it down.
#[tokio::test]
async fn graceful_restart_timeout() {
    let net = MockNetwork::new();
    let (mut node1, node2) = connect_two_nodes(&net).await;

    let start = Instant::now();
    node2.spark.stop().await;

    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(2))
            .await
            .is_some()
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= GR_HOLD_TIME);
    assert!(elapsed <= GR_HOLD_TIME + HEARTBEAT_HOLD_TIME);
}

// Removing the interface tears its adjacencies down synchronously, stays
// silent afterwards, and tracking the interface again re-forms them.
#[tokio::test]
async fn interface_removal() {
    let net = MockNetwork::new();
    let (mut node1, mut node2) = connect_two_nodes(&net).await;

    let start = Instant::now();
    assert!(node1.spark.update_interface_db(vec![]).await);

    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(1))
            .await
            .is_some()
    );
    assert!(start.elapsed() <= HEARTBEAT_HOLD_TIME.min(GR_HOLD_TIME));

    assert!(
        node2
            .wait_for_event(NeighborEventType::Down, Duration::from_secs(1))
            .await
            .is_some()
    );
    assert!(start.elapsed() <= GR_HOLD_TIME);

    // No stragglers after the downs.
    node1.expect_silence(GR_HOLD_TIME).await;
    node2.expect_silence(GR_HOLD_TIME).await;

    // Resume tracking and watch the adjacency re-form.
    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node1
            .wait_for_event(
                NeighborEventType::Up,
                NEGOTIATE_HOLD_TIME + HEARTBEAT_HOLD_TIME
            )
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(
                NeighborEventType::Up,
                NEGOTIATE_HOLD_TIME + HEARTBEAT_HOLD_TIME
            )
            .await
            .is_some()
    );
}

// Nodes in different domains never get past the packet filter.
#[tokio::test]
async fn domain_mismatch() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut config1 = test_config("Lannister");
    config1.domain_name = "A_Lannister_Always_Pays_His_Debts".to_owned();
    let mut config2 = test_config("Stark");
    config2.domain_name = "Winter_Is_Coming".to_owned();

    let mut node1 = TestNode::start(&net, config1);
    let mut node2 = TestNode::start(&net, config2);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    node1.expect_silence(GR_HOLD_TIME * 2).await;
    node2.expect_silence(GR_HOLD_TIME * 2).await;

    assert_eq!(
        node1.spark.get_neighbor_state("iface1", "Stark").await,
        None
    );
    assert_eq!(
        node2.spark.get_neighbor_state("iface2", "Lannister").await,
        None
    );
}

// Only one direction of the link works. The hearing side parks the peer in
// WARM forever; the deaf side never even creates the entry. No events on
// either side.
#[tokio::test]
async fn ignore_unidirectional_peer() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[("iface2", "iface1", 10)]));

    let mut node1 = TestNode::start(&net, test_config("node-1"));
    let mut node2 = TestNode::start(&net, test_config("node-2"));

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    node1.expect_silence(GR_HOLD_TIME * 2).await;
    node2.expect_silence(GR_HOLD_TIME * 2).await;

    assert_eq!(
        node1.spark.get_neighbor_state("iface1", "node-2").await,
        Some(State::Warm)
    );
    assert_eq!(
        node2.spark.get_neighbor_state("iface2", "node-1").await,
        None
    );
}

// A current node and a hello-only node form the adjacency over hello
// reflection; when the old node restarts with the full protocol, the
// survivor sees RESTARTING then RESTARTED and the adjacency upgrades
// without a down/up cycle.
#[tokio::test]
async fn backward_compatibility() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut legacy_config = test_config("node-2");
    legacy_config.enable_spark2 = false;

    let mut node1 = TestNode::start(&net, test_config("node-1"));
    let mut node2 = TestNode::start(&net, legacy_config);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    let event = node1
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-1 saw no adjacency");
    assert_eq!(event.node_name, "node-2");
    assert_eq!(event.transport_v4, Some("192.168.0.2".parse().unwrap()));
    let event = node2
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-2 saw no adjacency");
    assert_eq!(event.node_name, "node-1");
    assert_eq!(event.transport_v4, Some("192.168.0.1".parse().unwrap()));

    // The legacy node upgrades across a restart.
    node2.spark.stop().await;
    assert!(
        node1
            .wait_for_event(
                NeighborEventType::Restarting,
                Duration::from_secs(2)
            )
            .await
            .is_some()
    );

    let mut node2 = TestNode::start(&net, test_config("node-2"));
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    assert!(
        node1
            .wait_for_event(
                NeighborEventType::Restarted,
                Duration::from_secs(2)
            )
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
            .await
            .is_some()
    );
    assert!(
        node1
            .wait_for_event(NeighborEventType::Down, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Down, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
}

// An interface wired to itself must not fabricate a neighbor.
#[tokio::test]
async fn looped_hello() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[("iface1", "iface1", 10)]));

    let mut node1 = TestNode::start(&net, test_config("node-1"));
    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );

    node1.expect_silence(GR_HOLD_TIME * 2).await;
    assert_eq!(
        node1.spark.get_neighbor_state("iface1", "node-1").await,
        None
    );
}

// Addresses in different /31 subnets block negotiation; diagnostics show
// the neighbor caught between WARM and NEGOTIATE. Fixing the address
// yields the adjacency promptly, and an interface flap with the mismatch
// still in place must be harmless.
#[tokio::test]
async fn v4_subnet_mismatch() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut node1 = TestNode::start(&net, test_config("node-1"));
    let mut node2 = TestNode::start(&net, test_config("node-2"));

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.2/31",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.4/31",
                "fe80::2/64"
            )])
            .await
    );

    assert!(
        node1
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );

    let state = node1.spark.get_neighbor_state("iface1", "node-2").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));
    let state = node2.spark.get_neighbor_state("iface2", "node-1").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));

    // Flap the interface with the mismatch still in place.
    assert!(node1.spark.update_interface_db(vec![]).await);
    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.2/31",
                "fe80::1/64"
            )])
            .await
    );

    // Same /31 now; both sides converge.
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.3/31",
                "fe80::2/64"
            )])
            .await
    );
    assert!(
        node1
            .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
            .await
            .is_some()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
            .await
            .is_some()
    );
}

// Area rules on both sides agree on area "2" through case-insensitive
// matching of the peer names.
#[tokio::test]
async fn area_match() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut config1 = test_config("rsw001");
    config1.areas = vec![
        AreaConfig {
            area_id: "1".to_owned(),
            neighbor_regexes: vec!["RSW.*".to_owned()],
            interface_regexes: vec![".*".to_owned()],
        },
        AreaConfig {
            area_id: "2".to_owned(),
            neighbor_regexes: vec!["FSW.*".to_owned()],
            interface_regexes: vec![".*".to_owned()],
        },
    ];
    let mut config2 = test_config("fsw002");
    config2.areas = vec![
        AreaConfig {
            area_id: "1".to_owned(),
            neighbor_regexes: vec!["FSW.*".to_owned()],
            interface_regexes: vec![".*".to_owned()],
        },
        AreaConfig {
            area_id: "2".to_owned(),
            neighbor_regexes: vec!["RSW.*".to_owned()],
            interface_regexes: vec![".*".to_owned()],
        },
    ];

    let mut node1 = TestNode::start(&net, config1);
    let mut node2 = TestNode::start(&net, config2);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    let event = node1
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-1 saw no adjacency");
    assert_eq!(event.node_name, "fsw002");
    assert_eq!(event.area, "2");
    let event = node2
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-2 saw no adjacency");
    assert_eq!(event.node_name, "rsw001");
    assert_eq!(event.area, "2");
}

// Neither side's rules match the peer at all: no proposals, no adjacency,
// diagnostics oscillate between WARM and NEGOTIATE.
#[tokio::test]
async fn area_no_match() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut config1 = test_config("rsw001");
    config1.areas = vec![AreaConfig {
        area_id: "1".to_owned(),
        neighbor_regexes: vec!["RSW.*".to_owned()],
        interface_regexes: vec![".*".to_owned()],
    }];
    let mut config2 = test_config("fsw002");
    config2.areas = vec![AreaConfig {
        area_id: "1".to_owned(),
        neighbor_regexes: vec!["FSW.*".to_owned()],
        interface_regexes: vec![".*".to_owned()],
    }];

    let mut node1 = TestNode::start(&net, config1);
    let mut node2 = TestNode::start(&net, config2);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    assert!(
        node1
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );

    let state = node1.spark.get_neighbor_state("iface1", "fsw002").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));
    let state = node2.spark.get_neighbor_state("iface2", "rsw001").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));
}

// Both sides compute an area for the peer but the results disagree; the
// negotiation never completes.
#[tokio::test]
async fn area_inconsistent() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let mut config1 = test_config("rsw001");
    config1.areas = vec![AreaConfig {
        area_id: "1".to_owned(),
        neighbor_regexes: vec!["FSW.*".to_owned()],
        interface_regexes: vec![".*".to_owned()],
    }];
    let mut config2 = test_config("fsw002");
    config2.areas = vec![AreaConfig {
        area_id: "2".to_owned(),
        neighbor_regexes: vec!["RSW.*".to_owned()],
        interface_regexes: vec![".*".to_owned()],
    }];

    let mut node1 = TestNode::start(&net, config1);
    let mut node2 = TestNode::start(&net, config2);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    assert!(
        node1
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );
    assert!(
        node2
            .wait_for_event(NeighborEventType::Up, GR_HOLD_TIME * 2)
            .await
            .is_none()
    );

    let state = node1.spark.get_neighbor_state("iface1", "fsw002").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));
    let state = node2.spark.get_neighbor_state("iface2", "rsw001").await;
    assert!(matches!(state, Some(State::Warm) | Some(State::Negotiate)));
}

// A node without any area rules pairs with an area-aware peer in the
// default area.
#[tokio::test]
async fn area_default_compatibility() {
    let net = MockNetwork::new();
    net.set_connected_pairs(links(&[
        ("iface1", "iface2", 10),
        ("iface2", "iface1", 10),
    ]));

    let config1 = test_config("rsw001");
    let mut config2 = test_config("fsw002");
    config2.areas = vec![AreaConfig {
        area_id: "2".to_owned(),
        neighbor_regexes: vec!["RSW.*".to_owned()],
        interface_regexes: vec![".*".to_owned()],
    }];

    let mut node1 = TestNode::start(&net, config1);
    let mut node2 = TestNode::start(&net, config2);

    assert!(
        node1
            .spark
            .update_interface_db(vec![record(
                "iface1",
                1,
                "192.168.0.1/24",
                "fe80::1/64"
            )])
            .await
    );
    assert!(
        node2
            .spark
            .update_interface_db(vec![record(
                "iface2",
                2,
                "192.168.0.2/24",
                "fe80::2/64"
            )])
            .await
    );

    let event = node1
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-1 saw no adjacency");
    assert_eq!(event.area, "0");
    let event = node2
        .wait_for_event(NeighborEventType::Up, UP_DEADLINE)
        .await
        .expect("node-2 saw no adjacency");
    assert_eq!(event.area, "0");
}

// The link monitor can force a neighbor down by transport address.
#[tokio::test]
async fn forced_neighbor_down() {
    let net = MockNetwork::new();
    let (mut node1, _node2) = connect_two_nodes(&net).await;

    node1
        .spark
        .send_neighbor_down_info(vec![
            "192.168.0.2".parse::<IpAddr>().unwrap(),
        ])
        .await;

    let event = node1
        .wait_for_event(NeighborEventType::Down, Duration::from_secs(1))
        .await
        .expect("forced down was not reported");
    assert_eq!(event.node_name, "node-2");
    assert_eq!(
        node1.spark.get_neighbor_state("iface1", "node-2").await,
        None
    );
}

// The counter snapshot reflects a healthy exchange.
#[tokio::test]
async fn counters_snapshot() {
    let net = MockNetwork::new();
    let (node1, node2) = connect_two_nodes(&net).await;

    let counters = node1.spark.counters().await;
    assert!(counters.rx_packets > 0);
    assert!(counters.tx_packets > 0);
    assert_eq!(counters.rx_decode_errors, 0);

    let counters = node2.spark.counters().await;
    assert!(counters.rx_packets > 0);
    assert!(counters.tx_packets > 0);
}
