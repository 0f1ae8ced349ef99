//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::packet;

// Instance configuration.
//
// All intervals and hold times are in milliseconds. The advertised hold
// times (`heartbeat_hold_ms` and `gr_hold_ms`) are sent to peers, which use
// them to time us out; the other knobs are purely local.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub domain_name: String,
    pub node_name: String,
    pub hello_interval_ms: u64,
    pub fastinit_hello_interval_ms: u64,
    pub keepalive_interval_ms: u64,
    pub handshake_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub negotiate_hold_ms: u64,
    pub heartbeat_hold_ms: u64,
    pub gr_hold_ms: u64,
    pub enable_v4: bool,
    pub enable_spark2: bool,
    pub version: u32,
    pub min_supported_version: u32,
    pub areas: Vec<AreaConfig>,
}

// A single area rule.
//
// Rules are evaluated in configuration order and the first rule whose
// neighbor and interface expressions both match fixes the candidate area.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AreaConfig {
    pub area_id: String,
    pub neighbor_regexes: Vec<String>,
    #[serde(default = "default_interface_regexes")]
    pub interface_regexes: Vec<String>,
}

// ===== impl Config =====

impl Config {
    // Checks the configuration for values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.domain_name.is_empty() || self.domain_name.len() > 255 {
            return Err(Error::InvalidConfig("domain name".to_owned()));
        }
        if self.node_name.is_empty() || self.node_name.len() > 255 {
            return Err(Error::InvalidConfig("node name".to_owned()));
        }
        for value in [
            self.hello_interval_ms,
            self.fastinit_hello_interval_ms,
            self.keepalive_interval_ms,
            self.handshake_interval_ms,
            self.heartbeat_interval_ms,
            self.negotiate_hold_ms,
            self.heartbeat_hold_ms,
            self.gr_hold_ms,
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(
                    "timer interval".to_owned(),
                ));
            }
        }
        if self.min_supported_version > self.version {
            return Err(Error::InvalidConfig("version pair".to_owned()));
        }

        Ok(())
    }

    // The protocol version advertised on the wire.
    pub(crate) fn advertised_version(&self) -> u32 {
        if self.enable_spark2 {
            self.version
        } else {
            packet::LEGACY_VERSION
        }
    }

    pub(crate) fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub(crate) fn fastinit_hello_interval(&self) -> Duration {
        Duration::from_millis(self.fastinit_hello_interval_ms)
    }

    pub(crate) fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub(crate) fn negotiate_hold(&self) -> Duration {
        Duration::from_millis(self.negotiate_hold_ms)
    }

    pub(crate) fn heartbeat_hold(&self) -> Duration {
        Duration::from_millis(self.heartbeat_hold_ms)
    }

    pub(crate) fn gr_hold(&self) -> Duration {
        Duration::from_millis(self.gr_hold_ms)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            domain_name: String::new(),
            node_name: String::new(),
            hello_interval_ms: 200,
            fastinit_hello_interval_ms: 50,
            keepalive_interval_ms: 50,
            handshake_interval_ms: 50,
            heartbeat_interval_ms: 50,
            negotiate_hold_ms: 500,
            heartbeat_hold_ms: 200,
            gr_hold_ms: 500,
            enable_v4: true,
            enable_spark2: true,
            version: packet::VERSION,
            min_supported_version: packet::MIN_SUPPORTED_VERSION,
            areas: Vec::new(),
        }
    }
}

// ===== helper functions =====

fn default_interface_regexes() -> Vec<String> {
    vec![".*".to_owned()]
}
