//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spark_utils::task::{IntervalTask, TimeoutTask};

use crate::debug::Debug;

// Per-neighbor state machine states.
//
// A neighbor that goes away is removed from the table rather than parked in
// a dedicated down state; re-discovery starts a new logical instance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum State {
    Idle,
    Warm,
    Negotiate,
    Established,
}

// Neighbor state machine events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    HelloRcvdInfo,
    HelloRcvdNoInfo,
    HelloRcvdRestart,
    HeartbeatRcvd,
    HandshakeRcvd,
    NegotiationFailure,
    NegotiateTimerExpire,
    HeartbeatTimerExpire,
    GrTimerExpire,
}

// A directly-attached peer heard on one interface.
#[derive(Debug)]
pub struct Neighbor {
    pub node_name: String,
    pub state: State,
    // Version the peer advertised last.
    pub version: u32,
    // Whether the adjacency runs the handshake/heartbeat machinery or the
    // legacy hello-only path.
    pub spark2: bool,
    // Last accepted hello sequence number and its receive timestamp.
    pub remote_seq_num: u64,
    pub remote_seq_rx_us: u64,
    // Most recent of our own sequence numbers the peer reflected back.
    pub local_seq_reflected: u64,
    pub transport_v4: Option<Ipv4Addr>,
    pub transport_v6: Option<Ipv6Addr>,
    // Candidate area computed from the local rules for this peer.
    pub proposed_area: Option<String>,
    // Area committed by a successful negotiation.
    pub area: Option<String>,
    // Hold times advertised by the peer.
    pub heartbeat_hold: Duration,
    pub gr_hold: Duration,
    // When the liveness hold was last armed, to void expirations that
    // raced with a refresh on the event queue.
    pub hold_refreshed_us: u64,
    // Peer advertised an orderly restart and is expected back.
    pub restarting: bool,
    pub rtt: RttEstimator,
    pub statistics: NeighborStatistics,
    pub timers: NeighborTimers,
}

#[derive(Debug, Default)]
pub struct NeighborTimers {
    pub negotiate_hold: Option<TimeoutTask>,
    pub heartbeat_hold: Option<TimeoutTask>,
    pub gr_hold: Option<TimeoutTask>,
    pub handshake_interval: Option<IntervalTask>,
}

#[derive(Debug)]
pub struct NeighborStatistics {
    pub create_time: DateTime<Utc>,
    pub last_up_time: Option<DateTime<Utc>>,
    pub last_down_time: Option<DateTime<Utc>>,
    pub hello_rx_count: u64,
    pub handshake_rx_count: u64,
    pub heartbeat_rx_count: u64,
}

// Smoothed round-trip estimator.
//
// Samples are folded into an exponentially weighted moving average; a new
// value is worth reporting only once it moved far enough from the last
// reported one.
#[derive(Debug, Default)]
pub struct RttEstimator {
    estimate_us: Option<u64>,
    reported_us: Option<u64>,
}

// ===== impl State =====

impl State {
    // Computes the successor state for an event, or `None` when the event
    // does not change the state. Transitions that end the neighbor's life
    // (hold-time expirations) are handled by removal instead.
    pub(crate) fn next(self, event: Event) -> Option<State> {
        match (self, event) {
            (State::Idle, Event::HelloRcvdInfo | Event::HelloRcvdNoInfo) => {
                Some(State::Warm)
            }
            (State::Warm, Event::HelloRcvdInfo) => Some(State::Negotiate),
            (State::Negotiate, Event::HandshakeRcvd) => {
                Some(State::Established)
            }
            (
                State::Negotiate,
                Event::NegotiationFailure | Event::NegotiateTimerExpire,
            ) => Some(State::Warm),
            (State::Established, Event::HelloRcvdNoInfo) => Some(State::Warm),
            _ => None,
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        ifname: &str,
        node_name: String,
        proposed_area: Option<String>,
        heartbeat_hold: Duration,
        gr_hold: Duration,
    ) -> Neighbor {
        Debug::NeighborCreate(ifname, &node_name).log();

        Neighbor {
            node_name,
            state: State::Idle,
            version: 0,
            spark2: false,
            remote_seq_num: 0,
            remote_seq_rx_us: 0,
            local_seq_reflected: 0,
            transport_v4: None,
            transport_v6: None,
            proposed_area,
            area: None,
            heartbeat_hold,
            gr_hold,
            hold_refreshed_us: 0,
            restarting: false,
            rtt: Default::default(),
            statistics: Default::default(),
            timers: Default::default(),
        }
    }

    // Runs the state machine for one event, logging the transition.
    pub(crate) fn fsm(&mut self, ifname: &str, event: Event) {
        if let Some(new_state) = self.state.next(event) {
            Debug::FsmTransition(
                ifname,
                &self.node_name,
                self.state,
                new_state,
                event,
            )
            .log();
            self.state = new_state;
        }
    }

    // Tears down everything a committed adjacency carries, returning the
    // neighbor to the pre-negotiation shape.
    pub(crate) fn reset_adjacency(&mut self) {
        self.area = None;
        self.restarting = false;
        self.timers.negotiate_hold = None;
        self.timers.heartbeat_hold = None;
        self.timers.gr_hold = None;
        self.timers.handshake_interval = None;
    }
}

// ===== impl NeighborStatistics =====

impl Default for NeighborStatistics {
    fn default() -> NeighborStatistics {
        NeighborStatistics {
            create_time: Utc::now(),
            last_up_time: None,
            last_down_time: None,
            hello_rx_count: 0,
            handshake_rx_count: 0,
            heartbeat_rx_count: 0,
        }
    }
}

// ===== impl RttEstimator =====

impl RttEstimator {
    // Reports are suppressed below this absolute delta.
    const REPORT_MIN_DELTA_US: u64 = 10_000;

    // Folds one round-trip sample into the estimate.
    pub(crate) fn sample(&mut self, rtt_us: u64) {
        self.estimate_us = Some(match self.estimate_us {
            Some(estimate) => (estimate + rtt_us) / 2,
            None => rtt_us,
        });
    }

    // Current smoothed estimate, zero when no sample was taken yet.
    pub(crate) fn estimate_us(&self) -> u64 {
        self.estimate_us.unwrap_or(0)
    }

    // Marks the current estimate as already conveyed to subscribers.
    pub(crate) fn mark_reported(&mut self) {
        self.reported_us = self.estimate_us;
    }

    // Returns the estimate if it deviates from the last reported value by
    // at least 25% or 10 ms, whichever is larger, committing it as
    // reported.
    pub(crate) fn report_due(&mut self) -> Option<u64> {
        let estimate = self.estimate_us?;
        match self.reported_us {
            Some(reported) => {
                let threshold = std::cmp::max(
                    reported / 4,
                    Self::REPORT_MIN_DELTA_US,
                );
                if estimate.abs_diff(reported) >= threshold {
                    self.reported_us = Some(estimate);
                    Some(estimate)
                } else {
                    None
                }
            }
            None => {
                // First estimate becomes the silent baseline.
                self.reported_us = Some(estimate);
                None
            }
        }
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        assert_eq!(
            State::Idle.next(Event::HelloRcvdInfo),
            Some(State::Warm)
        );
        assert_eq!(
            State::Idle.next(Event::HelloRcvdNoInfo),
            Some(State::Warm)
        );
        assert_eq!(
            State::Warm.next(Event::HelloRcvdInfo),
            Some(State::Negotiate)
        );
        assert_eq!(State::Warm.next(Event::HelloRcvdNoInfo), None);
        assert_eq!(
            State::Negotiate.next(Event::HandshakeRcvd),
            Some(State::Established)
        );
        assert_eq!(
            State::Negotiate.next(Event::NegotiationFailure),
            Some(State::Warm)
        );
        assert_eq!(
            State::Negotiate.next(Event::NegotiateTimerExpire),
            Some(State::Warm)
        );
        assert_eq!(
            State::Established.next(Event::HelloRcvdNoInfo),
            Some(State::Warm)
        );
        // Liveness refreshes do not move the state.
        assert_eq!(State::Established.next(Event::HeartbeatRcvd), None);
        assert_eq!(State::Established.next(Event::HelloRcvdInfo), None);
        // Out-of-state handshakes are ignored.
        assert_eq!(State::Warm.next(Event::HandshakeRcvd), None);
    }

    #[test]
    fn rtt_reports_are_damped() {
        let mut rtt = RttEstimator::default();

        // The first estimate is a silent baseline.
        rtt.sample(20_000);
        assert_eq!(rtt.report_due(), None);

        // Halfway between 20 ms and 40 ms crosses the 10 ms floor.
        rtt.sample(40_000);
        assert_eq!(rtt.report_due(), Some(30_000));

        // Small wobble stays quiet.
        rtt.sample(32_000);
        assert_eq!(rtt.report_due(), None);
    }

    #[test]
    fn rtt_small_values_use_absolute_floor() {
        let mut rtt = RttEstimator::default();

        rtt.sample(4_000);
        assert_eq!(rtt.report_due(), None);

        // 8 ms of movement is below the 10 ms floor even though it is far
        // beyond 25%.
        rtt.sample(20_000);
        assert_eq!(rtt.report_due(), None);

        rtt.sample(20_000);
        assert_eq!(rtt.report_due(), Some(16_000));
    }
}
