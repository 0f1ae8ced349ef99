//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use spark_utils::task::{IntervalTask, Task, TimeoutTask};
use tokio::sync::mpsc::Sender;

use crate::error::IoError;
use crate::network::{IoProvider, RxPacketMsg};

//
// Spark tasks diagram:
//
//                                +--------------+
//                                |  public API  |
//                                +--------------+
//                                       |
//                                       V
//                                +--------------+
//              packet_rx (1x) -> |              | -> (Nx per iface)
//     hello_interval (Nx)     -> |   instance   |    hello/handshake/
//     handshake_interval (Nx) -> |  event loop  |    heartbeat sends
//     heartbeat_interval (Nx) -> |              |
//     hold_timer (Nx)         -> |              | -> neighbor events
//                                +--------------+
//

// Spark inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ProtocolMsg {
            HelloTimer(HelloTimerMsg),
            HandshakeTimer(HandshakeTimerMsg),
            HeartbeatTimer(HeartbeatTimerMsg),
            HoldTimer(HoldTimerMsg),
        }

        // Hello cadence tick for one interface.
        #[derive(Debug, Deserialize, Serialize)]
        pub struct HelloTimerMsg {
            pub ifname: String,
        }

        // Handshake retransmission tick for one negotiating neighbor.
        #[derive(Debug, Deserialize, Serialize)]
        pub struct HandshakeTimerMsg {
            pub ifname: String,
            pub node_name: String,
        }

        // Heartbeat cadence tick for one interface.
        #[derive(Debug, Deserialize, Serialize)]
        pub struct HeartbeatTimerMsg {
            pub ifname: String,
        }

        // Hold-timer expiration for one neighbor.
        #[derive(Debug, Deserialize, Serialize)]
        pub struct HoldTimerMsg {
            pub ifname: String,
            pub node_name: String,
            pub timer: HoldTimerKind,
        }

        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        #[derive(Deserialize, Serialize)]
        pub enum HoldTimerKind {
            Negotiate,
            Heartbeat,
            GracefulRestart,
        }
    }
}

// ===== Spark tasks =====

// Packet Rx task: forwards datagrams from the I/O provider to the event
// loop. The channel closing signals a dead provider.
pub(crate) fn packet_rx<I: IoProvider>(
    io: Arc<I>,
    packet_rxp: Sender<RxPacketMsg>,
) -> Task<()> {
    Task::spawn(async move {
        loop {
            match io.recv_packet().await {
                Ok(msg) => {
                    if packet_rxp.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(error) => {
                    IoError::RecvError(error).log();
                    break;
                }
            }
        }
    })
}

// Periodic hello emission for one interface.
pub(crate) fn hello_interval(
    ifname: &str,
    interval: Duration,
    tick_on_start: bool,
    hello_timerp: &Sender<messages::input::HelloTimerMsg>,
) -> IntervalTask {
    let ifname = ifname.to_owned();
    let hello_timerp = hello_timerp.clone();
    IntervalTask::new(interval, tick_on_start, move || {
        let ifname = ifname.clone();
        let hello_timerp = hello_timerp.clone();
        async move {
            let msg = messages::input::HelloTimerMsg { ifname };
            let _ = hello_timerp.send(msg).await;
        }
    })
}

// Handshake retransmission for one negotiating neighbor.
pub(crate) fn handshake_interval(
    ifname: &str,
    node_name: &str,
    interval: Duration,
    handshake_timerp: &Sender<messages::input::HandshakeTimerMsg>,
) -> IntervalTask {
    let ifname = ifname.to_owned();
    let node_name = node_name.to_owned();
    let handshake_timerp = handshake_timerp.clone();
    IntervalTask::new(interval, true, move || {
        let ifname = ifname.clone();
        let node_name = node_name.clone();
        let handshake_timerp = handshake_timerp.clone();
        async move {
            let msg =
                messages::input::HandshakeTimerMsg { ifname, node_name };
            let _ = handshake_timerp.send(msg).await;
        }
    })
}

// Periodic heartbeat emission for one interface.
pub(crate) fn heartbeat_interval(
    ifname: &str,
    interval: Duration,
    heartbeat_timerp: &Sender<messages::input::HeartbeatTimerMsg>,
) -> IntervalTask {
    let ifname = ifname.to_owned();
    let heartbeat_timerp = heartbeat_timerp.clone();
    IntervalTask::new(interval, false, move || {
        let ifname = ifname.clone();
        let heartbeat_timerp = heartbeat_timerp.clone();
        async move {
            let msg = messages::input::HeartbeatTimerMsg { ifname };
            let _ = heartbeat_timerp.send(msg).await;
        }
    })
}

// Neighbor hold timer of the given kind.
pub(crate) fn hold_timer(
    ifname: &str,
    node_name: &str,
    timer: messages::input::HoldTimerKind,
    holdtime: Duration,
    hold_timerp: &Sender<messages::input::HoldTimerMsg>,
) -> TimeoutTask {
    let ifname = ifname.to_owned();
    let node_name = node_name.to_owned();
    let hold_timerp = hold_timerp.clone();
    TimeoutTask::new(holdtime, move || async move {
        let msg = messages::input::HoldTimerMsg {
            ifname,
            node_name,
            timer,
        };
        let _ = hold_timerp.send(msg).await;
    })
}
