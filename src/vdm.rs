// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Routes vendor defined messages to the mode they belong to.

use crate::{
    dp::DpState,
    errors::Nak,
    host::HostEvent,
    manager::{PartnerImage, PortManager},
    vdo::{
        custom, Command, CommandType, DeviceInfo, DpConfig, DpModeCaps, DpStatus, VdmHeader, DP_OPOS, SVDM_V2,
        USB_SID_DISPLAYPORT, USB_SID_PD, USB_VID_GOOGLE,
    },
    Port,
};

/// Alternate modes this policy knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AltMode {
    DisplayPort,
    /// Google firmware update.
    FirmwareUpdate,
}

impl AltMode {
    pub fn from_svid(svid: u16) -> Option<Self> {
        match svid {
            USB_SID_DISPLAYPORT => Some(AltMode::DisplayPort),
            USB_VID_GOOGLE => Some(AltMode::FirmwareUpdate),
            _ => None,
        }
    }

    pub fn svid(self) -> u16 {
        match self {
            AltMode::DisplayPort => USB_SID_DISPLAYPORT,
            AltMode::FirmwareUpdate => USB_VID_GOOGLE,
        }
    }
}

/// What goes back to the partner after a message was handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ack(Vec<u32>),
    Nak(Nak),
    /// The message was a response, or needs none.
    None,
}

impl Reply {
    /// Objects to transmit. An empty response is sent as a NAK by the protocol layer.
    pub fn into_vdos(self) -> Vec<u32> {
        match self {
            Reply::Ack(vdos) => vdos,
            Reply::Nak(_) | Reply::None => Vec::new(),
        }
    }
}

/// Object count a request must carry, header included.
fn request_len(command: Command) -> usize {
    match command {
        Command::Attention | Command::DpStatus | Command::DpConfig => 2,
        _ => 1,
    }
}

impl PortManager {
    /// Handles one message received on `port`.
    pub async fn handle_vdm(&mut self, port: Port, vdos: &[u32]) -> Reply {
        if port >= self.ports.len() {
            return Reply::Nak(Nak::InvalidPort(port));
        }

        let Some(&raw) = vdos.first() else {
            return Reply::Nak(Nak::Malformed { command: Command::Other(0), count: 0 });
        };

        let header = VdmHeader::from_raw(raw);
        if !header.structured {
            self.custom_vdm(port, vdos);
            return Reply::None;
        }

        log::debug!("C{}: VDM {:?} {:?} for {:04x}, {} objects", port, header.cmd_type, header.command, header.svid, vdos.len());

        match header.cmd_type {
            CommandType::Init => match self.respond(port, header, vdos).await {
                Ok(payload) => {
                    let mut reply = vec![header.reply(CommandType::Ack).with_version(SVDM_V2).to_raw()];
                    reply.extend(payload);
                    Reply::Ack(reply)
                }
                Err(why) => {
                    log::warn!("C{}: NAK {:?}: {}", port, header.command, why);
                    Reply::Nak(why)
                }
            },
            CommandType::Ack => {
                self.acked(port, header, vdos).await;
                Reply::None
            }
            CommandType::Nak => {
                self.naked(port, header).await;
                Reply::None
            }
            CommandType::Busy => {
                log::debug!("C{}: partner busy for {:?}", port, header.command);
                Reply::None
            }
        }
    }

    /// Answers a request from the partner, returning the objects that follow the ACK header.
    async fn respond(&mut self, port: Port, header: VdmHeader, vdos: &[u32]) -> Result<Vec<u32>, Nak> {
        if vdos.len() != request_len(header.command) {
            return Err(Nak::Malformed { command: header.command, count: vdos.len() });
        }

        match header.command {
            Command::DiscoverIdentity | Command::DiscoverSvids => {
                let responder = self.responder.as_ref().filter(|_| header.svid == USB_SID_PD);
                let responder = responder.ok_or(Nak::UnsupportedSvid(header.svid))?;
                Ok(if header.command == Command::DiscoverIdentity {
                    responder.identity()
                } else {
                    responder.svid_vdos()
                })
            }
            Command::DiscoverModes => self
                .responder
                .as_ref()
                .and_then(|responder| responder.modes(header.svid))
                .ok_or(Nak::UnsupportedSvid(header.svid)),
            Command::EnterMode => {
                let mode = self.mode(header)?;
                match mode {
                    AltMode::DisplayPort => {
                        let caps = self.dp_caps(port).ok_or(Nak::UnsupportedSvid(header.svid))?;
                        self.dp.enter(&self.plat, port, caps)?;
                    }
                    AltMode::FirmwareUpdate => {
                        log::info!("C{}: entered firmware update mode", port);
                        self.context_mut(port)?.gfu = true;
                    }
                }
                Ok(Vec::new())
            }
            Command::ExitMode => {
                match self.mode(header)? {
                    AltMode::DisplayPort => self.dp.exit(&self.plat, port).await,
                    AltMode::FirmwareUpdate => self.context_mut(port)?.gfu = false,
                }
                Ok(Vec::new())
            }
            Command::Attention => {
                self.displayport(header)?;
                self.dp.attention(&self.plat, port, DpStatus(vdos[1])).await?;
                Ok(Vec::new())
            }
            Command::DpStatus => {
                self.displayport(header)?;
                if self.dp.port(port).map_or(true, |dp| dp.state == DpState::Idle) {
                    return Err(Nak::NotEntered);
                }
                let status = self.dp.status_vdo(port).with_connected(DpStatus::UFP_D_CONNECTED);
                Ok(vec![status.0])
            }
            Command::DpConfig => {
                self.displayport(header)?;
                if self.dp.accept_config(&self.plat, port, DpConfig::from_raw(vdos[1])).await? {
                    self.dp.post_config(&self.plat, port).await;
                }
                Ok(Vec::new())
            }
            Command::Other(_) => Err(Nak::Unexpected(header.command)),
        }
    }

    /// The alternate mode a mode request addresses.
    fn mode(&self, header: VdmHeader) -> Result<AltMode, Nak> {
        let mode = AltMode::from_svid(header.svid).ok_or(Nak::UnsupportedSvid(header.svid))?;
        if mode == AltMode::FirmwareUpdate && !self.responder.as_ref().map_or(false, |r| r.firmware_update) {
            return Err(Nak::UnsupportedSvid(header.svid));
        }

        if header.opos != DP_OPOS {
            return Err(Nak::InvalidObjectPosition(header.opos));
        }

        Ok(mode)
    }

    fn displayport(&self, header: VdmHeader) -> Result<(), Nak> {
        if header.svid != USB_SID_DISPLAYPORT {
            return Err(Nak::UnsupportedSvid(header.svid));
        }
        Ok(())
    }

    /// DisplayPort capabilities to enter with: the partner's discovered mode,
    /// or else the one we advertise.
    fn dp_caps(&self, port: Port) -> Option<DpModeCaps> {
        let discovered = self
            .ports
            .get(port)
            .and_then(|ctx| ctx.discovery.modes(USB_SID_DISPLAYPORT))
            .and_then(|modes| modes.first().copied())
            .map(DpModeCaps);

        discovered.or_else(|| self.responder.as_ref().and_then(|responder| responder.dp_caps()))
    }

    async fn acked(&mut self, port: Port, header: VdmHeader, vdos: &[u32]) {
        let Some(ctx) = self.ports.get_mut(port) else {
            return;
        };

        let consumed = match header.command {
            Command::DiscoverIdentity => {
                ctx.entry.set_version(header.version.min(SVDM_V2));
                ctx.discovery.consume_identity(vdos)
            }
            Command::DiscoverSvids => ctx.discovery.consume_svids(vdos),
            Command::DiscoverModes => ctx.discovery.consume_modes(vdos),
            Command::EnterMode | Command::ExitMode if header.svid == USB_VID_GOOGLE => {
                ctx.gfu = header.command == Command::EnterMode;
                Ok(())
            }
            Command::EnterMode | Command::ExitMode | Command::DpStatus | Command::DpConfig
                if header.svid == USB_SID_DISPLAYPORT =>
            {
                ctx.entry.vdm_acked(&mut self.dp, &self.plat, port, vdos).await;
                Ok(())
            }
            command => {
                log::debug!("C{}: ignoring ACK for {:?}", port, command);
                Ok(())
            }
        };

        if let Err(why) = consumed {
            log::warn!("C{}: discovery response dropped: {}", port, why);
            ctx.discovery.refused(header);
        }
    }

    async fn naked(&mut self, port: Port, header: VdmHeader) {
        let Some(ctx) = self.ports.get_mut(port) else {
            return;
        };

        match header.command {
            Command::DiscoverIdentity | Command::DiscoverSvids | Command::DiscoverModes => {
                log::info!("C{}: partner refused {:?}", port, header.command);
                ctx.discovery.refused(header);
            }
            Command::EnterMode | Command::ExitMode | Command::DpStatus | Command::DpConfig
                if header.svid == USB_SID_DISPLAYPORT =>
            {
                ctx.entry.vdm_naked(&mut self.dp, &self.plat, port, header.command).await;
            }
            command => log::debug!("C{}: ignoring NAK for {:?}", port, command),
        }
    }

    /// Unstructured commands. None of them are answered.
    pub fn custom_vdm(&mut self, port: Port, vdos: &[u32]) {
        let Some(&raw) = vdos.first() else {
            return;
        };

        let header = VdmHeader::from_raw(raw);
        if header.svid != USB_VID_GOOGLE {
            log::debug!("C{}: unstructured VDM for {:04x} ignored", port, header.svid);
            return;
        }

        match header.command.raw() {
            custom::VERSION => {
                // The last object is dropped so the string is always terminated.
                let bytes: Vec<u8> = vdos[1..vdos.len().saturating_sub(1).max(1)]
                    .iter()
                    .flat_map(|vdo| vdo.to_le_bytes())
                    .take_while(|&byte| byte != 0)
                    .collect();
                log::info!("C{}: partner version: {}", port, String::from_utf8_lossy(&bytes));
            }
            custom::READ_INFO | custom::SEND_INFO => {
                if vdos.len() < 6 {
                    log::warn!("C{}: info carried {} objects", port, vdos.len());
                    return;
                }

                let mut hash = [0; 5];
                hash.copy_from_slice(&vdos[1..6]);
                let info = vdos.get(6).copied().map(DeviceInfo);
                if let Some(ctx) = self.ports.get_mut(port) {
                    ctx.image = Some(PartnerImage { hash, info });
                }

                if let Some(info) = info {
                    log::info!(
                        "C{}: partner device {}.{}, version {}, {}",
                        port,
                        info.major(),
                        info.minor(),
                        info.sw_version(),
                        if info.is_rw() { "RW" } else { "RO" }
                    );

                    if !info.is_rw() {
                        self.plat.host.send(HostEvent::UpdateDevice(port));
                    }
                }
            }
            custom::CURRENT => {
                log::info!("C{}: partner current: {}mA", port, vdos.get(1).copied().unwrap_or(0));
            }
            other => log::debug!("C{}: unknown unstructured command {}", port, other),
        }
    }
}
