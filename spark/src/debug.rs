//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::instance::NeighborEvent;
use crate::neighbor::{Event, State};
use crate::tasks::messages::input::HoldTimerKind;

// Spark debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceStop,
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    NeighborCreate(&'a str, &'a str),
    NeighborDelete(&'a str, &'a str),
    FsmTransition(&'a str, &'a str, State, State, Event),
    NegotiationFailure(&'a str, &'a str, &'a str),
    HoldTimerExpiry(&'a str, &'a str, HoldTimerKind),
    GracefulRestartAdvertised(&'a str),
    EventPublish(&'a NeighborEvent),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::InterfaceStart(ifname) | Debug::InterfaceStop(ifname) => {
                debug_span!("interface", name = %ifname).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::NeighborCreate(ifname, node_name)
            | Debug::NeighborDelete(ifname, node_name) => {
                debug_span!("neighbor", interface = %ifname, name = %node_name)
                    .in_scope(|| {
                        debug!("{}", self);
                    });
            }
            Debug::FsmTransition(ifname, node_name, old_state, new_state, event) => {
                debug_span!("neighbor", interface = %ifname, name = %node_name)
                    .in_scope(|| {
                        debug!(?old_state, ?new_state, ?event, "{}", self);
                    });
            }
            Debug::NegotiationFailure(ifname, node_name, reason) => {
                debug_span!("neighbor", interface = %ifname, name = %node_name)
                    .in_scope(|| {
                        debug!(%reason, "{}", self);
                    });
            }
            Debug::HoldTimerExpiry(ifname, node_name, timer) => {
                debug_span!("neighbor", interface = %ifname, name = %node_name)
                    .in_scope(|| {
                        debug!(?timer, "{}", self);
                    });
            }
            Debug::GracefulRestartAdvertised(ifname) => {
                debug_span!("interface", name = %ifname).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::EventPublish(event) => {
                debug!(?event, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "instance started")
            }
            Debug::InstanceStop => {
                write!(f, "instance stopped")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "interface tracking started")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "interface tracking stopped")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::FsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NegotiationFailure(..) => {
                write!(f, "negotiation failed")
            }
            Debug::HoldTimerExpiry(..) => {
                write!(f, "hold timer expired")
            }
            Debug::GracefulRestartAdvertised(..) => {
                write!(f, "advertised graceful restart")
            }
            Debug::EventPublish(..) => {
                write!(f, "event published")
            }
        }
    }
}
