// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::{board::MuxState, vdo::Command, Port};
use std::{io, path::PathBuf};

/// Reasons a port refuses a request from its partner.
///
/// The dispatcher turns every one of these into a NAK on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Nak {
    #[error("HPD IRQ requested without a high level")]
    IrqWithoutLevel,
    #[error("aux path is owned by port {}", _0)]
    AuxPathBusy(Port),
    #[error("SVID {:04x} is not supported", _0)]
    UnsupportedSvid(u16),
    #[error("object position {} is not supported", _0)]
    InvalidObjectPosition(u8),
    #[error("{:?} carried {} objects", command, count)]
    Malformed { command: Command, count: usize },
    #[error("alternate mode has not been entered")]
    NotEntered,
    #[error("chipset is off")]
    ChipsetOff,
    #[error("partner mode is not DisplayPort sink capable")]
    IncompatibleMode,
    #[error("no common pin assignment")]
    NoPinAssignment,
    #[error("port {} does not exist", _0)]
    InvalidPort(Port),
    #[error("unexpected {:?}", _0)]
    Unexpected(Command),
}

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("mux on port {} rejected {:?}", _0, _1)]
    Mux(Port, MuxState),
    #[error("failed to {} VBUS source on port {}", if *_1 { "enable" } else { "disable" }, _0)]
    VbusSource(Port, bool),
    #[error("failed to {} VBUS sink on port {}", if *_1 { "enable" } else { "disable" }, _0)]
    VbusSink(Port, bool),
    #[error("port {} does not exist", _0)]
    InvalidPort(Port),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {:?}: {}", _0, _1)]
    Read(PathBuf, io::Error),
    #[error("failed to parse config: {}", _0)]
    Parse(serde_json::Error),
    #[error("invalid config: {}", _0)]
    Invalid(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(why: serde_json::Error) -> ConfigError { ConfigError::Parse(why) }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("must be run as root")]
    NotRoot,
    #[error("configuration error: {}", _0)]
    Config(ConfigError),
    #[error("D-Bus error: {}", _0)]
    Dbus(zbus::Error),
}

impl From<ConfigError> for DaemonError {
    fn from(why: ConfigError) -> DaemonError { DaemonError::Config(why) }
}

impl From<zbus::Error> for DaemonError {
    fn from(why: zbus::Error) -> DaemonError { DaemonError::Dbus(why) }
}
