// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Hardware the policy drives: HPD lines, the USB/DP muxes, the aux path and
//! the VBUS power path.

mod sim;

pub use self::sim::{BoardEvent, SimulatedBoard};

use crate::{errors::HardwareError, host::HostEvents, time::Clock, Port};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Lanes routed by a port's mux.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MuxState: u8 {
        const USB_ENABLED = 1 << 0;
        const DP_ENABLED = 1 << 1;
        /// High speed lanes parked while a mode is being negotiated.
        const SAFE_MODE = 1 << 5;

        /// Two lanes of USB alongside two lanes of DisplayPort.
        const DOCK = Self::USB_ENABLED.bits() | Self::DP_ENABLED.bits();
    }
}

bitflags! {
    /// Power states of the host SoC.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ChipsetState: u8 {
        const HARD_OFF = 1 << 0;
        const SOFT_OFF = 1 << 1;
        const SUSPEND = 1 << 2;
        const ON = 1 << 3;
        const STANDBY = 1 << 4;

        const ANY_OFF = Self::HARD_OFF.bits() | Self::SOFT_OFF.bits();
        const ANY_SUSPEND = Self::SUSPEND.bits() | Self::STANDBY.bits();
    }
}

impl ChipsetState {
    /// Parses the names used in config files and scripts.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "hard-off" => Self::HARD_OFF,
            "soft-off" => Self::SOFT_OFF,
            "suspend" => Self::SUSPEND,
            "standby" => Self::STANDBY,
            "on" => Self::ON,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchMode {
    Connect,
    Disconnect,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Polarity {
    #[default]
    Normal,
    Flipped,
}

pub trait Board: Send + Sync {
    fn port_count(&self) -> usize;

    /// Drives the HPD line feeding the display controller for this port.
    fn set_hpd_level(&self, port: Port, level: bool);

    /// Current physical level of the HPD line.
    fn hpd_level(&self, port: Port) -> bool;

    fn mux_set(&self, port: Port, state: MuxState, mode: SwitchMode, polarity: Polarity) -> Result<(), HardwareError>;

    /// Tells the mux, and any retimer behind it, what was just put on the HPD line.
    fn mux_hpd_update(&self, port: Port, level: bool, irq: bool);

    fn set_sbu(&self, port: Port, enabled: bool);

    /// Selects which port the shared aux channel is wired to.
    fn set_aux_path(&self, port: Option<Port>);

    fn polarity(&self, port: Port) -> Polarity;

    fn chipset_in_state(&self, mask: ChipsetState) -> bool;

    fn is_sourcing_vbus(&self, port: Port) -> bool;

    fn vbus_source_enable(&self, port: Port, enable: bool) -> Result<(), HardwareError>;

    fn vbus_sink_enable(&self, port: Port, enable: bool) -> Result<(), HardwareError>;

    fn set_vbus_discharge(&self, port: Port, enable: bool);
}

/// Everything outside the policy that the policy talks to.
#[derive(Clone)]
pub struct Platform {
    pub board: Arc<dyn Board>,
    pub clock: Arc<dyn Clock>,
    pub host:  Arc<dyn HostEvents>,
}
