//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod area;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod interface;
pub mod neighbor;
pub mod network;
pub mod packet;
pub mod tasks;
pub mod testing;

pub use crate::config::{AreaConfig, Config};
pub use crate::error::Error;
pub use crate::instance::{NeighborEvent, NeighborEventType, Spark};
pub use crate::interface::InterfaceRecord;
pub use crate::network::IoProvider;
