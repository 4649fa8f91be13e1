// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! DisplayPort mode entry driven from our side, as the DFP.

use crate::{
    board::{MuxState, Platform, SwitchMode},
    discovery::Discovery,
    dp::{DisplayPort, DpState},
    errors::Nak,
    vdo::{Command, DpModeCaps, DpStatus, VdmHeader, DP_OPOS, USB_SID_DISPLAYPORT},
    Port,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryState {
    #[default]
    Start,
    EnterAcked,
    EnterNaked,
    StatusAcked,
    PrepareConfig,
    Active,
    EnterRetry,
    PrepareExit,
    Inactive,
}

impl EntryState {
    /// Command a response must carry in this state.
    fn expected(self) -> Option<Command> {
        match self {
            EntryState::Start | EntryState::EnterRetry => Some(Command::EnterMode),
            EntryState::EnterAcked => Some(Command::DpStatus),
            EntryState::PrepareConfig => Some(Command::DpConfig),
            EntryState::PrepareExit => Some(Command::ExitMode),
            _ => None,
        }
    }
}

/// Outcome of asking for the next message to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Setup {
    Send(Vec<u32>),
    /// The mux was changed; ask again once it settles.
    MuxWait,
    Error(Nak),
    Unsupported,
}

#[derive(Clone, Debug, Default)]
pub struct DpEntry {
    state:   EntryState,
    retry:   bool,
    version: u8,
}

impl DpEntry {
    pub fn state(&self) -> EntryState { self.state }

    pub fn reset(&mut self) { *self = Self::default(); }

    /// Structured VDM version agreed with the partner.
    pub fn set_version(&mut self, version: u8) { self.version = version; }

    pub fn is_active(&self) -> bool { matches!(self.state, EntryState::Active | EntryState::PrepareExit) }

    pub fn is_done(&self) -> bool { matches!(self.state, EntryState::Active | EntryState::Inactive) }

    fn header(&self, command: Command) -> u32 {
        VdmHeader::request(USB_SID_DISPLAYPORT, command)
            .with_opos(DP_OPOS)
            .with_version(self.version)
            .to_raw()
    }

    pub fn fail(&mut self, port: Port) {
        log::warn!("C{}: DP alt mode protocol failed", port);
        self.state = EntryState::Inactive;
        self.retry = false;
    }

    /// Rejects responses that do not answer what this state sent.
    fn response_valid(&mut self, port: Port, command: Command) -> bool {
        if self.state != EntryState::Inactive && self.state.expected() != Some(command) {
            log::warn!("C{}: unexpected DP response {:?} in state {:?}", port, command, self.state);
            self.fail(port);
            return false;
        }

        true
    }

    fn begin_exit(&mut self, plat: &Platform, port: Port) -> Setup {
        let polarity = plat.board.polarity(port);
        if let Err(why) = plat.board.mux_set(port, MuxState::SAFE_MODE, SwitchMode::Connect, polarity) {
            log::error!("C{}: failed to enter safe mode for exit: {}", port, why);
        }
        self.state = EntryState::PrepareExit;
        Setup::MuxWait
    }

    async fn exit_to_usb(&mut self, dp: &mut DisplayPort, plat: &Platform, port: Port) {
        dp.exit(plat, port).await;
        let polarity = plat.board.polarity(port);
        if let Err(why) = plat.board.mux_set(port, MuxState::USB_ENABLED, SwitchMode::Connect, polarity) {
            log::error!("C{}: failed to restore USB: {}", port, why);
        }
        log::info!("C{}: exited DP mode", port);
        self.state = EntryState::Inactive;
    }

    /// Asks to leave the mode, as when the host shuts down.
    pub fn request_exit(&mut self, plat: &Platform, port: Port) -> Setup {
        if self.state != EntryState::Active {
            return Setup::Unsupported;
        }

        self.begin_exit(plat, port)
    }

    pub fn setup_next_vdm(&mut self, dp: &mut DisplayPort, plat: &Platform, discovery: &Discovery, port: Port) -> Setup {
        match self.state {
            EntryState::Start | EntryState::EnterRetry => {
                let Some(&mode) = discovery.modes(USB_SID_DISPLAYPORT).and_then(|modes| modes.get(usize::from(DP_OPOS) - 1)) else {
                    return Setup::Error(Nak::UnsupportedSvid(USB_SID_DISPLAYPORT));
                };

                if let Err(why) = dp.enter(plat, port, DpModeCaps(mode)) {
                    return Setup::Error(why);
                }

                if self.state == EntryState::Start {
                    log::info!("C{}: attempting to enter DP mode", port);
                }
                Setup::Send(vec![self.header(Command::EnterMode)])
            }
            EntryState::EnterAcked => Setup::Send(vec![self.header(Command::DpStatus), dp.status_vdo(port).0]),
            EntryState::StatusAcked | EntryState::PrepareConfig => {
                if self.state == EntryState::StatusAcked {
                    if dp.pin_mode(port).is_empty() {
                        return Setup::Error(Nak::NoPinAssignment);
                    }

                    self.state = EntryState::PrepareConfig;
                    if dp.prepare_config(plat, port) {
                        return Setup::MuxWait;
                    }
                }

                match dp.config(port) {
                    Ok(config) => Setup::Send(vec![self.header(Command::DpConfig), config.to_raw()]),
                    Err(why) => Setup::Error(why),
                }
            }
            EntryState::EnterNaked => {
                self.retry = true;
                self.begin_exit(plat, port)
            }
            EntryState::Active => Setup::Unsupported,
            EntryState::PrepareExit => Setup::Send(vec![self.header(Command::ExitMode)]),
            EntryState::Inactive => Setup::Error(Nak::NotEntered),
        }
    }

    pub async fn vdm_acked(&mut self, dp: &mut DisplayPort, plat: &Platform, port: Port, vdos: &[u32]) {
        let Some(&header) = vdos.first() else {
            return;
        };

        if !self.response_valid(port, VdmHeader::from_raw(header).command) {
            return;
        }

        match self.state {
            EntryState::Start | EntryState::EnterRetry => self.state = EntryState::EnterAcked,
            EntryState::EnterAcked => {
                // A status response carries the same payload as Attention.
                let Some(&status) = vdos.get(1) else {
                    self.fail(port);
                    return;
                };

                if let Err(why) = dp.attention(plat, port, DpStatus(status)).await {
                    log::warn!("C{}: status not applied: {}", port, why);
                }
                self.state = EntryState::StatusAcked;
            }
            EntryState::PrepareConfig => {
                dp.post_config(plat, port).await;
                if dp.port(port).map_or(false, |dp| dp.state == DpState::Configured) {
                    self.state = EntryState::Active;
                    log::info!("C{}: entered DP mode", port);
                } else {
                    self.fail(port);
                }
            }
            EntryState::PrepareExit => {
                if self.retry {
                    self.retry = false;
                    self.state = EntryState::EnterRetry;
                } else {
                    self.exit_to_usb(dp, plat, port).await;
                }
            }
            EntryState::Inactive => (),
            state => {
                log::warn!("C{}: ACK in state {:?}", port, state);
                self.fail(port);
            }
        }
    }

    pub async fn vdm_naked(&mut self, dp: &mut DisplayPort, plat: &Platform, port: Port, command: Command) {
        if !self.response_valid(port, command) {
            return;
        }

        match self.state {
            // The partner is probably still in the mode from an earlier session.
            EntryState::Start => self.state = EntryState::EnterNaked,
            EntryState::PrepareExit => self.exit_to_usb(dp, plat, port).await,
            EntryState::Inactive => (),
            state => {
                log::warn!("C{}: NAK for {:?} in state {:?}", port, command, state);
                self.fail(port);
            }
        }
    }
}
