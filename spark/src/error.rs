//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, warn};

use crate::packet::DecodeError;

// Spark errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    InterfaceNotFound(String),
    NeighborNotFound(String, String),
    // Packet input
    PacketDecodeError(DecodeError),
    DomainMismatch(String),
    SelfLoopedPacket(String),
    VersionTooOld(String, u32),
    MisaddressedHandshake(String, String),
    // Configuration
    InvalidConfig(String),
    InvalidAreaRegex(regex::Error),
}

// Spark I/O errors.
#[derive(Debug)]
pub enum IoError {
    InterfaceAttachError(String, std::io::Error),
    MulticastLeaveError(std::io::Error),
    RecvError(std::io::Error),
    SendError(std::io::Error),
    ProviderClosed,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::InterfaceNotFound(ifname) => {
                debug!(%ifname, "{}", self);
            }
            Error::NeighborNotFound(ifname, node_name) => {
                debug!(%ifname, %node_name, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(error = %error, "{}", self);
            }
            Error::DomainMismatch(domain) => {
                debug!(%domain, "{}", self);
            }
            Error::SelfLoopedPacket(ifname) => {
                debug!(%ifname, "{}", self);
            }
            Error::VersionTooOld(node_name, version) => {
                warn!(%node_name, %version, "{}", self);
            }
            Error::MisaddressedHandshake(node_name, neighbor_node_name) => {
                debug!(%node_name, %neighbor_node_name, "{}", self);
            }
            Error::InvalidConfig(what) => {
                warn!(%what, "{}", self);
            }
            Error::InvalidAreaRegex(error) => {
                warn!(error = %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not tracked")
            }
            Error::NeighborNotFound(..) => {
                write!(f, "failed to find neighbor")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::DomainMismatch(..) => {
                write!(f, "packet from foreign domain")
            }
            Error::SelfLoopedPacket(..) => {
                write!(f, "looped packet carrying our own identity")
            }
            Error::VersionTooOld(..) => {
                write!(f, "peer version below supported minimum")
            }
            Error::MisaddressedHandshake(..) => {
                write!(f, "handshake addressed to another node")
            }
            Error::InvalidConfig(..) => {
                write!(f, "invalid configuration value")
            }
            Error::InvalidAreaRegex(..) => {
                write!(f, "failed to compile area expression")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(error) => Some(error),
            Error::InvalidAreaRegex(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::InterfaceAttachError(ifname, error) => {
                warn!(%ifname, error = %error, "{}", self);
            }
            IoError::MulticastLeaveError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => {
                warn!(error = %error, "{}", self);
            }
            IoError::ProviderClosed => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::InterfaceAttachError(..) => {
                write!(f, "failed to attach interface to the I/O provider")
            }
            IoError::MulticastLeaveError(..) => {
                write!(f, "failed to leave multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive packet")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send packet")
            }
            IoError::ProviderClosed => {
                write!(f, "I/O provider terminated")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::InterfaceAttachError(_, error)
            | IoError::MulticastLeaveError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            IoError::ProviderClosed => None,
        }
    }
}
