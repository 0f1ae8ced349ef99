//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: Logging,
    pub node: spark::Config,
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    #[default]
    Full,
    Json,
    Pretty,
}

// An interface the daemon should run the protocol on. The link monitor of
// the full routing stack is out of the picture here; addresses come from
// the configuration file and the kernel supplies only the index.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub v4_addr: Option<Ipv4Network>,
    pub v6_link_local: Option<Ipv6Network>,
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: Default::default(),
            colors: true,
            show_source: false,
        }
    }
}
