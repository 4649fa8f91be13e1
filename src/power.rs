// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    board::{ChipsetState, Platform},
    errors::HardwareError,
    host::HostEvent,
    Port,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataRole {
    Ufp,
    Dfp,
}

/// Stops sourcing VBUS, discharging it if we were the source.
pub fn power_supply_reset(plat: &Platform, port: Port) {
    let was_sourcing = plat.board.is_sourcing_vbus(port);
    if let Err(why) = plat.board.vbus_source_enable(port, false) {
        log::error!("C{}: {}", port, why);
    }

    if was_sourcing {
        plat.board.set_vbus_discharge(port, true);
    }

    plat.host.send(HostEvent::PowerChange(port));
}

/// Starts sourcing VBUS. The sink path is closed first.
pub fn set_power_supply_ready(plat: &Platform, port: Port) -> Result<(), HardwareError> {
    plat.board.vbus_sink_enable(port, false)?;
    plat.board.set_vbus_discharge(port, false);
    plat.board.vbus_source_enable(port, true)?;
    plat.host.send(HostEvent::PowerChange(port));
    Ok(())
}

/// VCONN comes from the always-on 5V rail, which is only up while the SoC is.
pub fn check_vconn_swap(plat: &Platform) -> bool {
    plat.board.chipset_in_state(ChipsetState::ON | ChipsetState::ANY_SUSPEND)
}

pub fn check_power_swap(plat: &Platform) -> bool { !plat.board.chipset_in_state(ChipsetState::ANY_OFF) }

/// Only a swap towards becoming the DFP is accepted.
pub fn check_data_swap(current: DataRole) -> bool { current == DataRole::Ufp }
