// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! DisplayPort alternate mode state for every port.

use crate::{
    arbiter::AuxArbiter,
    board::{ChipsetState, MuxState, Platform, SwitchMode},
    errors::Nak,
    host::HostEvent,
    hpd::{HpdGenerator, HpdTiming},
    time::Timestamp,
    vdo::{Command, ConfigSelect, DpConfig, DpModeCaps, DpStatus, PinAssignments},
    Port,
};
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DpFlags: u8 {
        /// The mux routes DisplayPort to the connector.
        const DP_ON = 1 << 0;
        /// The sink reported HPD high before the mux was configured.
        const HPD_HI_PENDING = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DpState {
    #[default]
    Idle,
    ModeEntered,
    Configuring,
    Configured,
}

impl DpState {
    pub fn as_str(self) -> &'static str {
        match self {
            DpState::Idle => "idle",
            DpState::ModeEntered => "mode-entered",
            DpState::Configuring => "configuring",
            DpState::Configured => "configured",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DpPort {
    pub state:    DpState,
    pub flags:    DpFlags,
    /// Last status reported by the partner.
    pub status:   DpStatus,
    /// Mode the port entered with.
    pub caps:     DpModeCaps,
    /// Pin assignment chosen by the last configuration.
    pub pin:      PinAssignments,
    /// Whether multi-function operation may be used on this port.
    pub mf_allow: bool,
}

impl DpPort {
    fn new(mf_allow: bool) -> Self {
        Self {
            state: DpState::Idle,
            flags: DpFlags::empty(),
            status: DpStatus::default(),
            caps: DpModeCaps::default(),
            pin: PinAssignments::empty(),
            mf_allow,
        }
    }
}

/// Mux routing for a pin assignment.
pub fn mux_mode(pin: PinAssignments) -> MuxState {
    if pin.is_multifunction() {
        MuxState::DOCK
    } else {
        MuxState::DP_ENABLED
    }
}

pub struct DisplayPort {
    ports:      Vec<DpPort>,
    hpd:        HpdGenerator,
    arbiter:    AuxArbiter,
    local_pins: PinAssignments,
}

impl DisplayPort {
    pub fn new(ports: usize, arbiter: AuxArbiter, timing: HpdTiming, local_pins: PinAssignments, mf_allow: bool) -> Self {
        Self {
            ports: (0..ports).map(|_| DpPort::new(mf_allow)).collect(),
            // Ports in the shared group drive one line, kept after the dedicated ones.
            hpd: HpdGenerator::new(ports + 1, timing),
            arbiter,
            local_pins,
        }
    }

    fn line(&self, port: Port) -> usize {
        if self.arbiter.is_shared(port) {
            self.ports.len()
        } else {
            port
        }
    }

    fn get_mut(&mut self, port: Port) -> Result<&mut DpPort, Nak> { self.ports.get_mut(port).ok_or(Nak::InvalidPort(port)) }

    pub fn port(&self, port: Port) -> Option<&DpPort> { self.ports.get(port) }

    pub fn arbiter(&self) -> &AuxArbiter { &self.arbiter }

    pub fn hpd_deadline(&self, port: Port) -> Timestamp { self.hpd.deadline(self.line(port)) }

    pub fn set_mf_allow(&mut self, port: Port, allow: bool) -> Result<(), Nak> {
        self.get_mut(port)?.mf_allow = allow;
        log::info!("C{}: multi-function {}", port, if allow { "allowed" } else { "disallowed" });
        Ok(())
    }

    /// A new partner starts with no HPD spacing requirement.
    pub fn reset_hpd(&mut self, port: Port) {
        let line = self.line(port);
        self.hpd.reset(line);
    }

    fn safe_mode(plat: &Platform, port: Port) {
        let polarity = plat.board.polarity(port);
        if let Err(why) = plat.board.mux_set(port, MuxState::SAFE_MODE, SwitchMode::Connect, polarity) {
            log::error!("C{}: failed to enter safe mode: {}", port, why);
        }
    }

    /// Enters DisplayPort mode with a sink-capable device described by `caps`.
    ///
    /// Refused while the SoC is off. The mux is parked in safe state until configured.
    pub fn enter(&mut self, plat: &Platform, port: Port, caps: DpModeCaps) -> Result<(), Nak> {
        let dp = self.get_mut(port)?;
        if !plat.board.chipset_in_state(ChipsetState::ANY_SUSPEND | ChipsetState::ON) {
            log::info!("C{}: not entering DisplayPort mode while the chipset is off", port);
            return Err(Nak::ChipsetOff);
        }

        if !caps.is_ufp_d() {
            return Err(Nak::IncompatibleMode);
        }

        // Entering again is only allowed before DisplayPort is routed.
        if dp.flags.contains(DpFlags::DP_ON) {
            log::warn!("C{}: Enter Mode while DisplayPort is configured", port);
            return Err(Nak::Unexpected(Command::EnterMode));
        }

        dp.state = DpState::ModeEntered;
        dp.flags = DpFlags::empty();
        dp.status = DpStatus::default();
        dp.caps = caps;
        dp.pin = PinAssignments::empty();
        Self::safe_mode(plat, port);

        if plat.board.chipset_in_state(ChipsetState::ANY_SUSPEND) {
            plat.host.send(HostEvent::DpAltModeEntry(port));
        }

        log::info!("C{}: entered DisplayPort mode", port);
        Ok(())
    }

    /// Multi-function preference of the partner, gated by the local allowance.
    pub fn mf_pref(&self, port: Port) -> bool {
        self.ports.get(port).map_or(false, |dp| dp.status.mf_pref() && dp.mf_allow)
    }

    /// Picks the pin assignment to request, or an empty set when there is none.
    ///
    /// Multi-function assignments are only offered when preferred, BR2
    /// assignments never, and C or D win over E or F. Of what remains the
    /// highest assignment is taken.
    pub fn pin_mode(&self, port: Port) -> PinAssignments {
        let Some(dp) = self.ports.get(port) else {
            return PinAssignments::empty();
        };

        let mut pins = dp.caps.pin_caps() & self.local_pins;
        if !self.mf_pref(port) {
            pins.remove(PinAssignments::MULTIFUNCTION);
        }
        pins.remove(PinAssignments::BR2);
        if pins.intersects(PinAssignments::C | PinAssignments::D) {
            pins.remove(PinAssignments::E | PinAssignments::F);
        }

        pins.highest().unwrap_or_default()
    }

    /// Our own status, as sent in DP Status requests and responses.
    pub fn status_vdo(&self, port: Port) -> DpStatus {
        let dp_on = self.ports.get(port).map_or(false, |dp| dp.flags.contains(DpFlags::DP_ON));
        DpStatus::default().with_enabled(dp_on).with_connected(DpStatus::DFP_D_CONNECTED)
    }

    /// Parks the mux before a configuration that drops USB 3 lanes.
    ///
    /// Returns true when the mux was touched.
    pub fn prepare_config(&self, plat: &Platform, port: Port) -> bool {
        let pin = self.pin_mode(port);
        if pin.is_empty() || mux_mode(pin) == MuxState::DOCK {
            return false;
        }

        Self::safe_mode(plat, port);
        true
    }

    /// Builds the configuration to request of the partner.
    pub fn config(&mut self, port: Port) -> Result<DpConfig, Nak> {
        let pin = self.pin_mode(port);
        let mf_pref = self.mf_pref(port);
        let dp = self.get_mut(port)?;
        if dp.state == DpState::Idle {
            return Err(Nak::NotEntered);
        }

        if pin.is_empty() {
            log::warn!("C{}: no usable pin assignment in {:?}", port, dp.caps.pin_caps());
            return Err(Nak::NoPinAssignment);
        }

        log::info!("C{}: pin mode {}, mf {}, mux {:?}", port, pin.letters(), mf_pref, mux_mode(pin));
        dp.pin = pin;
        dp.state = DpState::Configuring;
        Ok(DpConfig::ufp_d(pin))
    }

    /// Validates a configuration requested by the partner.
    ///
    /// Returns false when the partner asked to go back to USB, in which case
    /// DisplayPort has already been taken off the mux.
    pub async fn accept_config(&mut self, plat: &Platform, port: Port, config: DpConfig) -> Result<bool, Nak> {
        let dp = self.get_mut(port)?;
        if dp.state == DpState::Idle {
            return Err(Nak::NotEntered);
        }

        match config.select {
            ConfigSelect::Usb => {
                let was_on = dp.flags.contains(DpFlags::DP_ON);
                dp.flags = DpFlags::empty();
                dp.pin = PinAssignments::empty();
                dp.state = DpState::ModeEntered;
                let polarity = plat.board.polarity(port);
                if let Err(why) = plat.board.mux_set(port, MuxState::USB_ENABLED, SwitchMode::Connect, polarity) {
                    log::error!("C{}: failed to restore USB: {}", port, why);
                }

                self.release_output(plat, port).await;
                if was_on {
                    plat.host.send(HostEvent::HotPlugDetect { port, level: false });
                }
                log::info!("C{}: partner switched back to USB", port);
                Ok(false)
            }
            ConfigSelect::Reserved => Err(Nak::Unexpected(Command::DpConfig)),
            ConfigSelect::DfpD | ConfigSelect::UfpD => {
                if config.pin.bits().count_ones() != 1 || !dp.caps.pin_caps().contains(config.pin) {
                    return Err(Nak::NoPinAssignment);
                }

                dp.pin = config.pin;
                dp.state = DpState::Configuring;
                Ok(true)
            }
        }
    }

    /// Routes DisplayPort once the partner accepted the configuration, and
    /// delivers an HPD high that arrived before it.
    pub async fn post_config(&mut self, plat: &Platform, port: Port) {
        let Some(dp) = self.ports.get_mut(port) else {
            return;
        };

        if dp.state == DpState::Idle {
            log::warn!("C{}: configuration completed after exit", port);
            return;
        }

        let mux = mux_mode(dp.pin);
        let polarity = plat.board.polarity(port);
        plat.board.set_sbu(port, true);
        if let Err(why) = plat.board.mux_set(port, mux, SwitchMode::Connect, polarity) {
            log::error!("C{}: failed to route DisplayPort, staying on USB: {}", port, why);
            plat.board.set_sbu(port, false);
            if let Err(why) = plat.board.mux_set(port, MuxState::USB_ENABLED, SwitchMode::Connect, polarity) {
                log::error!("C{}: failed to restore USB: {}", port, why);
            }
            dp.state = DpState::ModeEntered;
            return;
        }

        dp.flags.insert(DpFlags::DP_ON);
        dp.state = DpState::Configured;
        let pending = dp.flags.contains(DpFlags::HPD_HI_PENDING);
        dp.flags.remove(DpFlags::HPD_HI_PENDING);
        log::info!("C{}: DisplayPort configured with pin {}", port, dp.pin.letters());

        if !pending {
            return;
        }

        if !self.arbiter.try_claim(port, &*plat.board) {
            log::info!("C{}: shared DisplayPort output busy, holding HPD", port);
            return;
        }

        if let Err(why) = self.drive_hpd(plat, port, true, false).await {
            log::warn!("C{}: pending HPD not delivered: {}", port, why);
        }
    }

    /// Applies a status reported by the partner through Attention or a DP Status response.
    pub async fn attention(&mut self, plat: &Platform, port: Port, status: DpStatus) -> Result<(), Nak> {
        let dp = self.get_mut(port)?;
        if dp.state == DpState::Idle {
            return Err(Nak::NotEntered);
        }

        let (level, irq) = (status.hpd_level(), status.hpd_irq());
        dp.status = status;

        if plat.board.chipset_in_state(ChipsetState::ANY_SUSPEND) && (irq || level) {
            plat.host.send(HostEvent::DpAltModeEntry(port));
        }

        if !dp.flags.contains(DpFlags::DP_ON) {
            if level {
                dp.flags.insert(DpFlags::HPD_HI_PENDING);
            }
            return Ok(());
        }

        if irq && !level {
            log::warn!("C{}: HPD IRQ reported with level low", port);
            return Err(Nak::IrqWithoutLevel);
        }

        if let Some(owner) = self.arbiter.owner().filter(|&owner| owner != port && self.arbiter.is_shared(port)) {
            log::warn!("C{}: HPD ignored, shared DisplayPort output owned by C{}", port, owner);
            return Err(Nak::AuxPathBusy(owner));
        }

        if level && !self.arbiter.try_claim(port, &*plat.board) {
            return Err(Nak::AuxPathBusy(self.arbiter.owner().unwrap_or(port)));
        }

        self.drive_hpd(plat, port, level, irq).await
    }

    async fn drive_hpd(&mut self, plat: &Platform, port: Port, level: bool, irq: bool) -> Result<(), Nak> {
        let line = self.line(port);
        self.hpd.apply(&*plat.board, &*plat.clock, port, line, level, irq).await?;
        if !irq {
            plat.host.send(HostEvent::HotPlugDetect { port, level });
        }
        Ok(())
    }

    /// Leaves DisplayPort mode. Calling it again leaves everything as it is.
    pub async fn exit(&mut self, plat: &Platform, port: Port) {
        let Some(dp) = self.ports.get_mut(port) else {
            return;
        };

        let was_active = dp.state != DpState::Idle;
        *dp = DpPort::new(dp.mf_allow);

        let next = self.drop_hpd(plat, port).await;
        if was_active {
            plat.host.send(HostEvent::HotPlugDetect { port, level: false });
            log::info!("C{}: exited DisplayPort mode", port);
        }
        self.hand_over(plat, next).await;
    }

    /// Drops HPD for a port whose DisplayPort routing was torn down and gives
    /// the shared output to the next port that has it routed.
    async fn release_output(&mut self, plat: &Platform, port: Port) {
        let next = self.drop_hpd(plat, port).await;
        self.hand_over(plat, next).await;
    }

    async fn drop_hpd(&mut self, plat: &Platform, port: Port) -> Option<Port> {
        let line = self.line(port);

        // A shared line is left to whoever owns it.
        if self.arbiter.is_muxable(port) {
            if let Err(why) = self.hpd.apply(&*plat.board, &*plat.clock, port, line, false, false).await {
                log::warn!("C{}: failed to drop HPD: {}", port, why);
            }
        } else {
            plat.board.mux_hpd_update(port, false, false);
        }

        let ports = &self.ports;
        self.arbiter.release(port, &*plat.board, |other| {
            ports.get(other).map_or(false, |dp| dp.flags.contains(DpFlags::DP_ON))
        })
    }

    async fn hand_over(&mut self, plat: &Platform, next: Option<Port>) {
        if let Some(next) = next {
            let level = self.ports.get(next).map_or(false, |dp| dp.status.hpd_level());
            if level {
                if let Err(why) = self.drive_hpd(plat, next, true, false).await {
                    log::warn!("C{}: failed to raise HPD after handover: {}", next, why);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::{Board, BoardEvent, SimulatedBoard},
        host::RecordingHost,
        time::{Clock, ManualClock},
        vdo::PortCapability,
    };
    use std::{sync::Arc, time::Duration};

    struct Rig {
        clock: Arc<ManualClock>,
        board: Arc<SimulatedBoard>,
        host:  Arc<RecordingHost>,
        plat:  Platform,
    }

    fn rig(shared: &[Port]) -> Rig {
        let clock = Arc::new(ManualClock::starting_at(Timestamp::from_micros(1_000)));
        let board = Arc::new(SimulatedBoard::new(2, shared, clock.clone()));
        let host = Arc::new(RecordingHost::default());
        let plat = Platform { board: board.clone(), clock: clock.clone(), host: host.clone() };
        Rig { clock, board, host, plat }
    }

    fn display_port(shared: &[Port]) -> DisplayPort {
        let pins = PinAssignments::C | PinAssignments::D | PinAssignments::E;
        DisplayPort::new(2, AuxArbiter::new(shared.to_vec(), true), HpdTiming::default(), pins, true)
    }

    fn sink_caps() -> DpModeCaps {
        DpModeCaps::new(PinAssignments::C | PinAssignments::D | PinAssignments::E, PinAssignments::empty(), true, PortCapability::UfpD)
    }

    fn hpd_high() -> DpStatus { DpStatus::default().with_hpd_level(true) }

    async fn configure(dp: &mut DisplayPort, plat: &Platform, port: Port) {
        dp.config(port).unwrap();
        dp.post_config(plat, port).await;
    }

    #[test]
    fn enter_parks_mux_in_safe_mode() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();

        let port = dp.port(0).unwrap();
        assert_eq!(port.state, DpState::ModeEntered);
        assert!(port.flags.is_empty());
        assert_eq!(rig.board.mux(0), MuxState::SAFE_MODE);
        assert!(rig.host.take().is_empty());
    }

    #[test]
    fn enter_refused_with_chipset_off_or_source_only_partner() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        let source = DpModeCaps::new(PinAssignments::empty(), PinAssignments::C, false, PortCapability::DfpD);
        assert_eq!(dp.enter(&rig.plat, 0, source), Err(Nak::IncompatibleMode));

        rig.board.set_chipset(ChipsetState::SOFT_OFF);
        assert_eq!(dp.enter(&rig.plat, 0, sink_caps()), Err(Nak::ChipsetOff));
        assert_eq!(dp.port(0).unwrap().state, DpState::Idle);
    }

    #[test]
    fn enter_while_suspended_wakes_host() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        rig.board.set_chipset(ChipsetState::SUSPEND);
        dp.enter(&rig.plat, 1, sink_caps()).unwrap();
        assert_eq!(rig.host.take(), vec![HostEvent::DpAltModeEntry(1)]);
    }

    #[tokio::test]
    async fn hpd_before_config_is_delivered_after() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        rig.board.take_trace();

        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        assert!(dp.port(0).unwrap().flags.contains(DpFlags::HPD_HI_PENDING));
        assert!(!rig.board.hpd_level(0));
        assert!(rig.board.trace().is_empty());

        configure(&mut dp, &rig.plat, 0).await;
        let port = dp.port(0).unwrap();
        assert_eq!(port.flags, DpFlags::DP_ON);
        assert_eq!(port.state, DpState::Configured);
        assert!(rig.board.hpd_level(0));
        assert!(rig.board.sbu(0));
        assert_eq!(dp.hpd_deadline(0), rig.clock.now() + Duration::from_millis(2));
        assert!(rig.board.trace().iter().any(|(_, e)| *e == BoardEvent::MuxHpd { port: 0, level: true, irq: false }));
    }

    #[test]
    fn pin_selection() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        assert_eq!(dp.pin_mode(0), PinAssignments::C);

        dp.ports[0].status = DpStatus::default().with_mf_pref(true);
        assert_eq!(dp.pin_mode(0), PinAssignments::D);

        dp.set_mf_allow(0, false).unwrap();
        assert_eq!(dp.pin_mode(0), PinAssignments::C);

        let e_only = DpModeCaps::new(PinAssignments::E, PinAssignments::empty(), true, PortCapability::UfpD);
        dp.enter(&rig.plat, 1, e_only).unwrap();
        assert_eq!(dp.pin_mode(1), PinAssignments::E);

        let br2_only = DpModeCaps::new(PinAssignments::A | PinAssignments::B, PinAssignments::empty(), true, PortCapability::UfpD);
        dp.enter(&rig.plat, 1, br2_only).unwrap();
        assert_eq!(dp.pin_mode(1), PinAssignments::empty());
        assert_eq!(dp.config(1), Err(Nak::NoPinAssignment));
    }

    #[tokio::test]
    async fn dock_config_keeps_usb_lanes() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.attention(&rig.plat, 0, hpd_high().with_mf_pref(true)).await.unwrap();

        rig.board.take_trace();
        assert!(!dp.prepare_config(&rig.plat, 0));
        let config = dp.config(0).unwrap();
        assert_eq!(config.pin, PinAssignments::D);
        dp.post_config(&rig.plat, 0).await;

        let trace = rig.board.take_trace();
        assert!(!trace.iter().any(|(_, e)| *e == BoardEvent::Mux { port: 0, state: MuxState::SAFE_MODE }));
        assert_eq!(rig.board.mux(0), MuxState::DOCK);
        assert!(rig.board.hpd_level(0));
    }

    #[tokio::test]
    async fn irq_with_low_level_is_refused() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        configure(&mut dp, &rig.plat, 0).await;

        let status = DpStatus::default().with_hpd_irq(true);
        assert_eq!(dp.attention(&rig.plat, 0, status).await, Err(Nak::IrqWithoutLevel));
        assert!(rig.board.hpd_level(0));
    }

    #[tokio::test]
    async fn irq_waits_for_spacing() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        configure(&mut dp, &rig.plat, 0).await;

        let deadline = dp.hpd_deadline(0);
        rig.clock.advance(Duration::from_micros(1_500));
        rig.board.take_trace();
        dp.attention(&rig.plat, 0, hpd_high().with_hpd_irq(true)).await.unwrap();

        let trace = rig.board.take_trace();
        assert_eq!(trace[0], (deadline, BoardEvent::Hpd { port: 0, level: false }));
        assert_eq!(trace[1], (deadline + Duration::from_micros(500), BoardEvent::Hpd { port: 0, level: true }));
        assert_eq!(dp.hpd_deadline(0), deadline + Duration::from_micros(2_500));
    }

    #[tokio::test]
    async fn exit_is_idempotent() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        configure(&mut dp, &rig.plat, 0).await;

        dp.exit(&rig.plat, 0).await;
        let port = dp.port(0).unwrap();
        assert_eq!(port.state, DpState::Idle);
        assert!(port.flags.is_empty());
        assert_eq!(port.status, DpStatus::default());
        assert!(!rig.board.hpd_level(0));

        rig.host.take();
        dp.exit(&rig.plat, 0).await;
        assert_eq!(dp.port(0).unwrap().state, DpState::Idle);
        assert!(!rig.board.hpd_level(0));
        assert!(rig.host.take().is_empty());
    }

    #[tokio::test]
    async fn enter_refused_once_configured() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        configure(&mut dp, &rig.plat, 0).await;

        assert_eq!(dp.enter(&rig.plat, 0, sink_caps()), Err(Nak::Unexpected(Command::EnterMode)));
        assert_eq!(dp.port(0).unwrap().flags, DpFlags::DP_ON);

        dp.exit(&rig.plat, 0).await;
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
    }

    #[tokio::test]
    async fn shared_output_goes_to_first_hpd_and_moves_on_exit() {
        let rig = rig(&[0, 1]);
        let mut dp = display_port(&[0, 1]);
        for port in 0..2 {
            dp.enter(&rig.plat, port, sink_caps()).unwrap();
        }

        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        configure(&mut dp, &rig.plat, 0).await;
        assert_eq!(dp.arbiter().owner(), Some(0));
        assert_eq!(rig.board.aux_path(), Some(0));

        dp.attention(&rig.plat, 1, hpd_high()).await.unwrap();
        configure(&mut dp, &rig.plat, 1).await;
        assert_eq!(dp.arbiter().owner(), Some(0));
        assert_eq!(dp.attention(&rig.plat, 1, hpd_high()).await, Err(Nak::AuxPathBusy(0)));

        dp.exit(&rig.plat, 0).await;
        assert_eq!(dp.arbiter().owner(), Some(1));
        assert_eq!(rig.board.aux_path(), Some(1));
        assert!(rig.board.hpd_level(1));

        rig.clock.advance(Duration::from_millis(3));
        dp.attention(&rig.plat, 1, hpd_high().with_hpd_irq(true)).await.unwrap();
    }

    #[tokio::test]
    async fn failed_mux_leaves_port_on_usb() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        dp.attention(&rig.plat, 0, hpd_high()).await.unwrap();
        dp.config(0).unwrap();

        rig.board.fail_mux(0, true);
        dp.post_config(&rig.plat, 0).await;
        let port = dp.port(0).unwrap();
        assert_eq!(port.state, DpState::ModeEntered);
        assert!(!port.flags.contains(DpFlags::DP_ON));
        assert!(!rig.board.hpd_level(0));
    }

    #[tokio::test]
    async fn partner_config_must_match_caps() {
        let rig = rig(&[]);
        let mut dp = display_port(&[]);
        assert_eq!(dp.accept_config(&rig.plat, 0, DpConfig::ufp_d(PinAssignments::C)).await, Err(Nak::NotEntered));

        dp.enter(&rig.plat, 0, sink_caps()).unwrap();
        assert_eq!(dp.accept_config(&rig.plat, 0, DpConfig::ufp_d(PinAssignments::F)).await, Err(Nak::NoPinAssignment));
        let two = DpConfig::ufp_d(PinAssignments::C | PinAssignments::D);
        assert_eq!(dp.accept_config(&rig.plat, 0, two).await, Err(Nak::NoPinAssignment));
        assert_eq!(dp.accept_config(&rig.plat, 0, DpConfig::ufp_d(PinAssignments::D)).await, Ok(true));
        assert_eq!(dp.port(0).unwrap().state, DpState::Configuring);

        let usb = DpConfig { pin: PinAssignments::empty(), signaling: 0, select: ConfigSelect::Usb };
        assert_eq!(dp.accept_config(&rig.plat, 0, usb).await, Ok(false));
        assert_eq!(rig.board.mux(0), MuxState::USB_ENABLED);
    }

    #[tokio::test]
    async fn switching_back_to_usb_releases_shared_output() {
        let rig = rig(&[0, 1]);
        let mut dp = display_port(&[0, 1]);
        for port in 0..2 {
            dp.enter(&rig.plat, port, sink_caps()).unwrap();
            dp.attention(&rig.plat, port, hpd_high()).await.unwrap();
        }
        configure(&mut dp, &rig.plat, 0).await;
        configure(&mut dp, &rig.plat, 1).await;
        assert_eq!(dp.arbiter().owner(), Some(0));
        rig.host.take();

        let usb = DpConfig { pin: PinAssignments::empty(), signaling: 0, select: ConfigSelect::Usb };
        assert_eq!(dp.accept_config(&rig.plat, 0, usb).await, Ok(false));

        let port = dp.port(0).unwrap();
        assert_eq!(port.state, DpState::ModeEntered);
        assert!(port.flags.is_empty());
        assert_eq!(dp.arbiter().owner(), Some(1));
        assert_eq!(rig.board.aux_path(), Some(1));
        assert!(rig.board.hpd_level(1));
        let events = rig.host.take();
        assert!(events.contains(&HostEvent::HotPlugDetect { port: 0, level: false }));
        assert!(events.contains(&HostEvent::HotPlugDetect { port: 1, level: true }));
    }

    #[test]
    fn outbound_status_reports_dp_on() {
        let mut dp = display_port(&[]);
        assert_eq!(dp.status_vdo(0).0, 0x1);
        dp.ports[0].flags.insert(DpFlags::DP_ON);
        assert_eq!(dp.status_vdo(0).0, 0x9);
    }
}
