// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Every port's policy state, owned in one place and indexed by port number.

use crate::{
    arbiter::AuxArbiter,
    board::{ChipsetState, MuxState, Platform, SwitchMode},
    config::{Config, ResponderConfig},
    dfp::{DpEntry, EntryState, Setup},
    discovery::Discovery,
    dp::{DisplayPort, DpFlags},
    errors::{HardwareError, Nak},
    power,
    vdo::{DeviceInfo, USB_SID_DISPLAYPORT},
    Port,
};
use typec_altmode_zbus::PortStatus;

/// Firmware image a partner reported through the info commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartnerImage {
    pub hash: [u32; 5],
    pub info: Option<DeviceInfo>,
}

#[derive(Debug, Default)]
pub(crate) struct PortContext {
    pub(crate) connected: bool,
    pub(crate) entry:     DpEntry,
    pub(crate) discovery: Discovery,
    /// The partner entered the firmware update mode.
    pub(crate) gfu:       bool,
    pub(crate) image:     Option<PartnerImage>,
}

pub struct PortManager {
    pub(crate) plat:      Platform,
    pub(crate) dp:        DisplayPort,
    pub(crate) ports:     Vec<PortContext>,
    pub(crate) responder: Option<ResponderConfig>,
}

impl PortManager {
    pub fn new(config: &Config, plat: Platform) -> Self {
        let arbiter = match &config.shared_dp {
            Some(shared) => AuxArbiter::new(shared.ports.clone(), shared.aux_switch),
            None => AuxArbiter::new(Vec::new(), false),
        };

        let dp = DisplayPort::new(
            config.ports,
            arbiter,
            config.hpd.timing(),
            config.pins().unwrap_or_default(),
            config.mf_allow,
        );

        Self {
            plat,
            dp,
            ports: (0..config.ports).map(|_| PortContext::default()).collect(),
            responder: config.responder.clone(),
        }
    }

    pub fn platform(&self) -> &Platform { &self.plat }

    pub fn port_count(&self) -> usize { self.ports.len() }

    pub fn display_port(&self) -> &DisplayPort { &self.dp }

    pub fn entry(&self, port: Port) -> Option<&DpEntry> { self.ports.get(port).map(|ctx| &ctx.entry) }

    pub fn discovery(&self, port: Port) -> Option<&Discovery> { self.ports.get(port).map(|ctx| &ctx.discovery) }

    pub fn partner_image(&self, port: Port) -> Option<&PartnerImage> {
        self.ports.get(port).and_then(|ctx| ctx.image.as_ref())
    }

    pub fn is_connected(&self, port: Port) -> bool { self.ports.get(port).map_or(false, |ctx| ctx.connected) }

    pub(crate) fn context_mut(&mut self, port: Port) -> Result<&mut PortContext, Nak> {
        self.ports.get_mut(port).ok_or(Nak::InvalidPort(port))
    }

    pub fn status(&self, port: Port) -> Option<PortStatus> {
        let ctx = self.ports.get(port)?;
        let dp = self.dp.port(port)?;

        Some(PortStatus {
            port:        port as u32,
            connected:   ctx.connected,
            dp_state:    dp.state.as_str().into(),
            dp_on:       dp.flags.contains(DpFlags::DP_ON),
            hpd_pending: dp.flags.contains(DpFlags::HPD_HI_PENDING),
            hpd_level:   self.plat.board.hpd_level(port),
            pin:         dp.pin.letters(),
            mf_allow:    dp.mf_allow,
            aux_owner:   self.dp.arbiter().owner() == Some(port),
            gfu_active:  ctx.gfu,
            sourcing:    self.plat.board.is_sourcing_vbus(port),
        })
    }

    pub fn set_mf_allow(&mut self, port: Port, allow: bool) -> Result<(), Nak> { self.dp.set_mf_allow(port, allow) }

    /// A partner attached: start over with discovery and let the first HPD
    /// change through immediately.
    pub fn connect(&mut self, port: Port) -> Result<(), Nak> {
        let ctx = self.context_mut(port)?;
        *ctx = PortContext { connected: true, ..PortContext::default() };
        self.dp.reset_hpd(port);

        let polarity = self.plat.board.polarity(port);
        if let Err(why) = self.plat.board.mux_set(port, MuxState::USB_ENABLED, SwitchMode::Connect, polarity) {
            log::error!("C{}: failed to connect USB: {}", port, why);
        }

        log::info!("C{}: partner connected", port);
        Ok(())
    }

    pub async fn disconnect(&mut self, port: Port) {
        let Ok(ctx) = self.context_mut(port) else {
            return;
        };

        *ctx = PortContext::default();
        self.dp.exit(&self.plat, port).await;
        self.plat.board.set_sbu(port, false);

        let polarity = self.plat.board.polarity(port);
        if let Err(why) = self.plat.board.mux_set(port, MuxState::empty(), SwitchMode::Disconnect, polarity) {
            log::error!("C{}: failed to disconnect mux: {}", port, why);
        }

        if self.plat.board.is_sourcing_vbus(port) {
            power::power_supply_reset(&self.plat, port);
        }

        log::info!("C{}: partner disconnected", port);
    }

    /// The next request to send as the DFP: discovery first, then DisplayPort entry.
    pub fn poll(&mut self, port: Port) -> Setup {
        let Some(ctx) = self.ports.get_mut(port) else {
            return Setup::Error(Nak::InvalidPort(port));
        };

        if !ctx.connected {
            return Setup::Unsupported;
        }

        if let Some(request) = ctx.discovery.next_request(&[USB_SID_DISPLAYPORT]) {
            return Setup::Send(vec![request.to_raw()]);
        }

        if ctx.discovery.modes(USB_SID_DISPLAYPORT).map_or(true, <[u32]>::is_empty) || ctx.entry.is_done() {
            return Setup::Unsupported;
        }

        let setup = ctx.entry.setup_next_vdm(&mut self.dp, &self.plat, &ctx.discovery, port);
        if let Setup::Error(why) = setup {
            log::warn!("C{}: not entering DisplayPort mode: {}", port, why);
            ctx.entry.fail(port);
        }

        setup
    }

    /// Reacts to a host power transition. Active ports leave DisplayPort mode
    /// when the chipset turns off; the returned messages must be sent.
    pub fn chipset_changed(&mut self, state: ChipsetState) -> Vec<(Port, Setup)> {
        if !state.intersects(ChipsetState::ANY_OFF) {
            return Vec::new();
        }

        let plat = &self.plat;
        self.ports
            .iter_mut()
            .enumerate()
            .filter(|(_, ctx)| ctx.entry.state() == EntryState::Active)
            .map(|(port, ctx)| (port, ctx.entry.request_exit(plat, port)))
            .collect()
    }

    pub fn power_supply_reset(&self, port: Port) { power::power_supply_reset(&self.plat, port); }

    pub fn set_power_supply_ready(&self, port: Port) -> Result<(), HardwareError> {
        power::set_power_supply_ready(&self.plat, port)
    }

    pub fn check_vconn_swap(&self) -> bool { power::check_vconn_swap(&self.plat) }

    pub fn check_power_swap(&self) -> bool { power::check_power_swap(&self.plat) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::{Board, SimulatedBoard},
        host::{HostEvent, RecordingHost},
        time::ManualClock,
        vdo::{
            pack_svids, Command, CommandType, DpConfig, DpModeCaps, DpStatus, IdHeader, PinAssignments, PortCapability,
            ProductType, VdmHeader, USB_SID_PD,
        },
        vdm::Reply,
    };
    use std::sync::Arc;

    fn rig() -> (Arc<SimulatedBoard>, Arc<RecordingHost>, PortManager) {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new());
        let board = Arc::new(SimulatedBoard::new(config.ports, &[], clock.clone()));
        let host = Arc::new(RecordingHost::default());
        let plat = Platform { board: board.clone(), clock, host: host.clone() };
        (board, host, PortManager::new(&config, plat))
    }

    fn sent(setup: Setup) -> VdmHeader {
        match setup {
            Setup::Send(vdos) => VdmHeader::from_raw(vdos[0]),
            other => panic!("expected a message, got {:?}", other),
        }
    }

    fn ack(header: VdmHeader, payload: &[u32]) -> Vec<u32> {
        let mut vdos = vec![header.reply(CommandType::Ack).to_raw()];
        vdos.extend_from_slice(payload);
        vdos
    }

    /// Drives discovery and entry as the DFP against a dock offering pins C and D.
    async fn enter_as_dfp(manager: &mut PortManager, port: Port) {
        let identity = sent(manager.poll(port));
        assert_eq!(identity.command, Command::DiscoverIdentity);
        let id = IdHeader { usb_host: false, usb_device: true, product_type: ProductType::Hub, modal: true, vid: 0x1234 };
        manager.handle_vdm(port, &ack(identity, &[id.to_raw(), 0, 0])).await;

        let svids = sent(manager.poll(port));
        assert_eq!(svids.command, Command::DiscoverSvids);
        manager.handle_vdm(port, &ack(svids, &pack_svids(&[USB_SID_DISPLAYPORT]))).await;

        let modes = sent(manager.poll(port));
        assert_eq!((modes.command, modes.svid), (Command::DiscoverModes, USB_SID_DISPLAYPORT));
        let caps = DpModeCaps::new(PinAssignments::C | PinAssignments::D, PinAssignments::empty(), true, PortCapability::UfpD);
        manager.handle_vdm(port, &ack(modes, &[caps.0])).await;

        let enter = sent(manager.poll(port));
        assert_eq!(enter.command, Command::EnterMode);
        manager.handle_vdm(port, &ack(enter, &[])).await;

        let status = sent(manager.poll(port));
        assert_eq!(status.command, Command::DpStatus);
        let theirs = DpStatus::default().with_connected(DpStatus::UFP_D_CONNECTED).with_hpd_level(true);
        manager.handle_vdm(port, &ack(status, &[theirs.0])).await;

        // Pin C leaves no room for USB, so the mux is parked before configuring.
        assert_eq!(manager.poll(port), Setup::MuxWait);
        let config = sent(manager.poll(port));
        assert_eq!(config.command, Command::DpConfig);
        manager.handle_vdm(port, &ack(config, &[])).await;
    }

    #[tokio::test]
    async fn dfp_discovers_then_enters() {
        let (board, host, mut manager) = rig();
        assert_eq!(manager.poll(0), Setup::Unsupported);
        manager.connect(0).unwrap();

        enter_as_dfp(&mut manager, 0).await;
        assert_eq!(manager.entry(0).unwrap().state(), EntryState::Active);
        assert_eq!(manager.discovery(0).unwrap().svids(), &[USB_SID_DISPLAYPORT]);
        assert_eq!(board.mux(0), MuxState::DP_ENABLED);
        assert!(board.hpd_level(0));
        assert_eq!(manager.poll(0), Setup::Unsupported);

        let status = manager.status(0).unwrap();
        assert!(status.connected && status.dp_on);
        assert_eq!((status.dp_state.as_str(), status.pin.as_str()), ("configured", "C"));
        assert_eq!(host.take(), vec![HostEvent::HotPlugDetect { port: 0, level: true }]);
    }

    #[tokio::test]
    async fn partner_without_displayport_is_left_alone() {
        let (_, _, mut manager) = rig();
        manager.connect(1).unwrap();

        let identity = sent(manager.poll(1));
        manager.handle_vdm(1, &[identity.reply(CommandType::Nak).to_raw()]).await;
        let svids = sent(manager.poll(1));
        assert_eq!(svids.svid, USB_SID_PD);
        manager.handle_vdm(1, &ack(svids, &pack_svids(&[0x1234]))).await;

        assert_eq!(manager.poll(1), Setup::Unsupported);
        assert_eq!(manager.entry(1).unwrap().state(), EntryState::Start);
    }

    #[tokio::test]
    async fn busy_partner_is_asked_again() {
        let (_, _, mut manager) = rig();
        manager.connect(0).unwrap();
        let identity = sent(manager.poll(0));
        let reply = manager.handle_vdm(0, &[identity.reply(CommandType::Busy).to_raw()]).await;
        assert_eq!(reply, Reply::None);
        assert_eq!(sent(manager.poll(0)).command, Command::DiscoverIdentity);
    }

    #[tokio::test]
    async fn chipset_off_exits_active_ports() {
        let (board, _, mut manager) = rig();
        manager.connect(0).unwrap();
        enter_as_dfp(&mut manager, 0).await;

        assert!(manager.chipset_changed(ChipsetState::SUSPEND).is_empty());
        let exits = manager.chipset_changed(ChipsetState::SOFT_OFF);
        assert_eq!(exits, vec![(0, Setup::MuxWait)]);
        assert_eq!(board.mux(0), MuxState::SAFE_MODE);

        let exit = sent(manager.poll(0));
        assert_eq!(exit.command, Command::ExitMode);
        manager.handle_vdm(0, &ack(exit, &[])).await;
        assert_eq!(manager.entry(0).unwrap().state(), EntryState::Inactive);
        assert_eq!(board.mux(0), MuxState::USB_ENABLED);
        assert!(!board.hpd_level(0));
    }

    #[tokio::test]
    async fn disconnect_resets_port_and_power() {
        let (board, host, mut manager) = rig();
        manager.connect(0).unwrap();
        enter_as_dfp(&mut manager, 0).await;
        manager.set_power_supply_ready(0).unwrap();
        host.take();

        manager.disconnect(0).await;
        assert!(!manager.is_connected(0));
        assert_eq!(manager.entry(0).unwrap().state(), EntryState::Start);
        assert!(manager.discovery(0).unwrap().identity().is_none());
        assert!(!board.hpd_level(0));
        assert!(!board.sbu(0));
        assert_eq!(board.mux(0), MuxState::empty());
        assert!(!board.is_sourcing_vbus(0));
        assert!(board.is_discharging(0));
        assert_eq!(host.take(), vec![HostEvent::HotPlugDetect { port: 0, level: false }, HostEvent::PowerChange(0)]);
    }

    #[tokio::test]
    async fn config_request_respects_mf_allow() {
        let (_, _, mut manager) = rig();
        manager.connect(0).unwrap();
        manager.set_mf_allow(0, false).unwrap();
        assert_eq!(manager.set_mf_allow(4, true), Err(Nak::InvalidPort(4)));

        // The dock prefers multi-function, but it is not allowed here.
        let caps = DpModeCaps::new(PinAssignments::C | PinAssignments::D, PinAssignments::empty(), true, PortCapability::UfpD);
        manager.dp.enter(&manager.plat, 0, caps).unwrap();
        manager.dp.attention(&manager.plat, 0, DpStatus::default().with_mf_pref(true)).await.unwrap();
        assert!(!manager.dp.mf_pref(0));
        assert_eq!(manager.dp.config(0).unwrap(), DpConfig::ufp_d(PinAssignments::C));
    }
}
