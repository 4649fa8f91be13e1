// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use super::{Board, ChipsetState, MuxState, Polarity, SwitchMode};
use crate::{
    errors::HardwareError,
    time::{Clock, Timestamp},
    util::lock,
    Port,
};
use std::sync::{Arc, Mutex};

/// A physical transition made on the simulated board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardEvent {
    Hpd { port: Port, level: bool },
    Mux { port: Port, state: MuxState },
    MuxHpd { port: Port, level: bool, irq: bool },
    Sbu { port: Port, enabled: bool },
    AuxPath(Option<Port>),
    VbusSource { port: Port, enabled: bool },
    VbusSink { port: Port, enabled: bool },
    Discharge { port: Port, enabled: bool },
}

#[derive(Default)]
struct PortHw {
    hpd:       bool,
    mux:       MuxState,
    sbu:       bool,
    sourcing:  bool,
    sinking:   bool,
    discharge: bool,
    polarity:  Polarity,
    fail_mux:  bool,
}

struct SimState {
    ports:      Vec<PortHw>,
    shared_hpd: bool,
    aux_path:   Option<Port>,
    chipset:    ChipsetState,
    trace:      Vec<(Timestamp, BoardEvent)>,
}

/// In-memory board that records a timestamped trace of everything it is told to do.
///
/// Ports listed as sharing a DisplayPort output also share one HPD line.
pub struct SimulatedBoard {
    clock:   Arc<dyn Clock>,
    shared:  Vec<Port>,
    tracing: bool,
    state:   Mutex<SimState>,
}

impl SimulatedBoard {
    pub fn new(ports: usize, shared: &[Port], clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            shared: shared.to_vec(),
            tracing: true,
            state: Mutex::new(SimState {
                ports:      (0..ports).map(|_| PortHw::default()).collect(),
                shared_hpd: false,
                aux_path:   None,
                chipset:    ChipsetState::ON,
                trace:      Vec::new(),
            }),
        }
    }

    /// Stops keeping the trace, for boards that run for the life of the daemon.
    pub fn without_trace(mut self) -> Self {
        self.tracing = false;
        self
    }

    fn record(&self, state: &mut SimState, event: BoardEvent) {
        log::debug!("board: {:?}", event);
        if self.tracing {
            state.trace.push((self.clock.now(), event));
        }
    }

    pub fn set_chipset(&self, chipset: ChipsetState) { lock(&self.state).chipset = chipset; }

    pub fn set_polarity(&self, port: Port, polarity: Polarity) {
        if let Some(hw) = lock(&self.state).ports.get_mut(port) {
            hw.polarity = polarity;
        }
    }

    /// Makes every following `mux_set` on the port fail.
    pub fn fail_mux(&self, port: Port, fail: bool) {
        if let Some(hw) = lock(&self.state).ports.get_mut(port) {
            hw.fail_mux = fail;
        }
    }

    pub fn mux(&self, port: Port) -> MuxState { lock(&self.state).ports.get(port).map_or(MuxState::empty(), |hw| hw.mux) }

    pub fn sbu(&self, port: Port) -> bool { lock(&self.state).ports.get(port).map_or(false, |hw| hw.sbu) }

    pub fn is_sinking_vbus(&self, port: Port) -> bool { lock(&self.state).ports.get(port).map_or(false, |hw| hw.sinking) }

    pub fn is_discharging(&self, port: Port) -> bool { lock(&self.state).ports.get(port).map_or(false, |hw| hw.discharge) }

    pub fn aux_path(&self) -> Option<Port> { lock(&self.state).aux_path }

    pub fn trace(&self) -> Vec<(Timestamp, BoardEvent)> { lock(&self.state).trace.clone() }

    pub fn take_trace(&self) -> Vec<(Timestamp, BoardEvent)> { std::mem::take(&mut lock(&self.state).trace) }
}

impl Board for SimulatedBoard {
    fn port_count(&self) -> usize { lock(&self.state).ports.len() }

    fn set_hpd_level(&self, port: Port, level: bool) {
        let mut state = lock(&self.state);
        if self.shared.contains(&port) {
            state.shared_hpd = level;
        } else if let Some(hw) = state.ports.get_mut(port) {
            hw.hpd = level;
        } else {
            return;
        }

        self.record(&mut state, BoardEvent::Hpd { port, level });
    }

    fn hpd_level(&self, port: Port) -> bool {
        let state = lock(&self.state);
        if self.shared.contains(&port) {
            state.shared_hpd
        } else {
            state.ports.get(port).map_or(false, |hw| hw.hpd)
        }
    }

    fn mux_set(&self, port: Port, mux: MuxState, mode: SwitchMode, polarity: Polarity) -> Result<(), HardwareError> {
        let mut state = lock(&self.state);
        let hw = state.ports.get_mut(port).ok_or(HardwareError::InvalidPort(port))?;
        if hw.fail_mux {
            return Err(HardwareError::Mux(port, mux));
        }

        hw.mux = if mode == SwitchMode::Connect { mux } else { MuxState::empty() };
        hw.polarity = polarity;
        let mux = hw.mux;
        self.record(&mut state, BoardEvent::Mux { port, state: mux });
        Ok(())
    }

    fn mux_hpd_update(&self, port: Port, level: bool, irq: bool) {
        let mut state = lock(&self.state);
        self.record(&mut state, BoardEvent::MuxHpd { port, level, irq });
    }

    fn set_sbu(&self, port: Port, enabled: bool) {
        let mut state = lock(&self.state);
        if let Some(hw) = state.ports.get_mut(port) {
            hw.sbu = enabled;
            self.record(&mut state, BoardEvent::Sbu { port, enabled });
        }
    }

    fn set_aux_path(&self, port: Option<Port>) {
        let mut state = lock(&self.state);
        state.aux_path = port;
        self.record(&mut state, BoardEvent::AuxPath(port));
    }

    fn polarity(&self, port: Port) -> Polarity { lock(&self.state).ports.get(port).map_or(Polarity::Normal, |hw| hw.polarity) }

    fn chipset_in_state(&self, mask: ChipsetState) -> bool { lock(&self.state).chipset.intersects(mask) }

    fn is_sourcing_vbus(&self, port: Port) -> bool { lock(&self.state).ports.get(port).map_or(false, |hw| hw.sourcing) }

    fn vbus_source_enable(&self, port: Port, enable: bool) -> Result<(), HardwareError> {
        let mut state = lock(&self.state);
        let hw = state.ports.get_mut(port).ok_or(HardwareError::InvalidPort(port))?;
        hw.sourcing = enable;
        self.record(&mut state, BoardEvent::VbusSource { port, enabled: enable });
        Ok(())
    }

    fn vbus_sink_enable(&self, port: Port, enable: bool) -> Result<(), HardwareError> {
        let mut state = lock(&self.state);
        let hw = state.ports.get_mut(port).ok_or(HardwareError::InvalidPort(port))?;
        hw.sinking = enable;
        self.record(&mut state, BoardEvent::VbusSink { port, enabled: enable });
        Ok(())
    }

    fn set_vbus_discharge(&self, port: Port, enable: bool) {
        let mut state = lock(&self.state);
        if let Some(hw) = state.ports.get_mut(port) {
            hw.discharge = enable;
            self.record(&mut state, BoardEvent::Discharge { port, enabled: enable });
        }
    }
}
