// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    errors::Nak,
    vdo::{Command, IdHeader, VdmHeader, USB_SID_PD, VDO_MAX_SIZE},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub header:       IdHeader,
    pub cert:         u32,
    pub product:      u32,
    pub product_vdos: Vec<u32>,
}

/// What the partner told us about itself.
#[derive(Clone, Debug, Default)]
pub struct Discovery {
    identity:      Option<Identity>,
    identity_done: bool,
    svids:         Vec<u16>,
    svids_done:    bool,
    modes:         Vec<(u16, Vec<u32>)>,
}

impl Discovery {
    pub fn identity(&self) -> Option<&Identity> { self.identity.as_ref() }

    pub fn svids(&self) -> &[u16] { &self.svids }

    /// Modes discovered for `svid`. Empty when the partner refused to list them.
    pub fn modes(&self, svid: u16) -> Option<&[u32]> {
        self.modes.iter().find(|(s, _)| *s == svid).map(|(_, modes)| modes.as_slice())
    }

    pub fn consume_identity(&mut self, vdos: &[u32]) -> Result<(), Nak> {
        if vdos.len() < 4 {
            return Err(Nak::Malformed { command: Command::DiscoverIdentity, count: vdos.len() });
        }

        let header = IdHeader::from_raw(vdos[1]);
        let product_vdos = if header.product_type.has_vdo() { vdos[4..].to_vec() } else { Vec::new() };
        log::info!(
            "partner identity: vid {:04x}, pid {:04x}, {:?}{}",
            header.vid,
            vdos[3] >> 16,
            header.product_type,
            if header.modal { ", modal" } else { "" }
        );

        self.identity = Some(Identity { header, cert: vdos[2] & 0xfffff, product: vdos[3], product_vdos });
        self.identity_done = true;
        Ok(())
    }

    /// Collects SVIDs, two per object. A full message without a zero SVID
    /// means the partner has more to send.
    pub fn consume_svids(&mut self, vdos: &[u32]) -> Result<(), Nak> {
        if vdos.len() < 2 {
            return Err(Nak::Malformed { command: Command::DiscoverSvids, count: vdos.len() });
        }

        for vdo in &vdos[1..] {
            for svid in [(vdo >> 16) as u16, *vdo as u16] {
                if svid == 0 {
                    self.svids_done = true;
                    return Ok(());
                }

                if !self.svids.contains(&svid) {
                    log::debug!("partner SVID {:04x}", svid);
                    self.svids.push(svid);
                }
            }
        }

        if vdos.len() < VDO_MAX_SIZE {
            self.svids_done = true;
        }

        Ok(())
    }

    pub fn consume_modes(&mut self, vdos: &[u32]) -> Result<(), Nak> {
        if vdos.len() < 2 {
            return Err(Nak::Malformed { command: Command::DiscoverModes, count: vdos.len() });
        }

        let svid = VdmHeader::from_raw(vdos[0]).svid;
        self.set_modes(svid, vdos[1..].to_vec());
        Ok(())
    }

    fn set_modes(&mut self, svid: u16, modes: Vec<u32>) {
        match self.modes.iter_mut().find(|(s, _)| *s == svid) {
            Some(entry) => entry.1 = modes,
            None => self.modes.push((svid, modes)),
        }
    }

    /// Records a refused discovery request so it is not repeated.
    pub fn refused(&mut self, header: VdmHeader) {
        match header.command {
            Command::DiscoverIdentity => self.identity_done = true,
            Command::DiscoverSvids => self.svids_done = true,
            Command::DiscoverModes => self.set_modes(header.svid, Vec::new()),
            _ => (),
        }
    }

    /// The next discovery request to send, limited to SVIDs we can use.
    pub fn next_request(&self, supported: &[u16]) -> Option<VdmHeader> {
        if !self.identity_done {
            return Some(VdmHeader::request(USB_SID_PD, Command::DiscoverIdentity));
        }

        if !self.svids_done {
            return Some(VdmHeader::request(USB_SID_PD, Command::DiscoverSvids));
        }

        self.svids
            .iter()
            .find(|svid| supported.contains(svid) && self.modes(**svid).is_none())
            .map(|&svid| VdmHeader::request(svid, Command::DiscoverModes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdo::{pack_svids, product, CommandType, ProductType, USB_SID_DISPLAYPORT, USB_VID_GOOGLE};

    fn ack(svid: u16, command: Command) -> u32 {
        VdmHeader::request(svid, command).reply(CommandType::Ack).to_raw()
    }

    #[test]
    fn walks_identity_svids_then_modes() {
        let supported = [USB_SID_DISPLAYPORT];
        let mut discovery = Discovery::default();
        assert_eq!(discovery.next_request(&supported).unwrap().command, Command::DiscoverIdentity);

        let id = IdHeader { usb_host: false, usb_device: true, product_type: ProductType::Ama, modal: true, vid: 0x18d1 };
        discovery
            .consume_identity(&[ack(USB_SID_PD, Command::DiscoverIdentity), id.to_raw(), 0x123, product(0x5010, 0x0100), 0xdead])
            .unwrap();
        let identity = discovery.identity().unwrap();
        assert_eq!(identity.header, id);
        assert_eq!(identity.product_vdos, vec![0xdead]);
        assert_eq!(discovery.next_request(&supported).unwrap().command, Command::DiscoverSvids);

        let mut svids = vec![ack(USB_SID_PD, Command::DiscoverSvids)];
        svids.extend(pack_svids(&[USB_VID_GOOGLE, USB_SID_DISPLAYPORT, USB_SID_DISPLAYPORT]));
        discovery.consume_svids(&svids).unwrap();
        assert_eq!(discovery.svids(), &[USB_VID_GOOGLE, USB_SID_DISPLAYPORT]);

        let next = discovery.next_request(&supported).unwrap();
        assert_eq!((next.command, next.svid), (Command::DiscoverModes, USB_SID_DISPLAYPORT));

        discovery.consume_modes(&[ack(USB_SID_DISPLAYPORT, Command::DiscoverModes), 0x0c_0045]).unwrap();
        assert_eq!(discovery.modes(USB_SID_DISPLAYPORT), Some(&[0x0c_0045][..]));
        assert!(discovery.next_request(&supported).is_none());
    }

    #[test]
    fn full_svid_message_asks_for_more() {
        let mut discovery = Discovery::default();
        discovery.refused(VdmHeader::request(USB_SID_PD, Command::DiscoverIdentity));

        let mut vdos = vec![ack(USB_SID_PD, Command::DiscoverSvids)];
        vdos.extend((1..=6u32).map(|n| n << 16 | (n + 0x10)));
        discovery.consume_svids(&vdos).unwrap();
        assert_eq!(discovery.svids().len(), 12);
        assert_eq!(discovery.next_request(&[]).unwrap().command, Command::DiscoverSvids);

        discovery.consume_svids(&[ack(USB_SID_PD, Command::DiscoverSvids), 0]).unwrap();
        assert!(discovery.next_request(&[]).is_none());
    }

    #[test]
    fn refused_modes_are_not_requested_again() {
        let mut discovery = Discovery::default();
        discovery.refused(VdmHeader::request(USB_SID_PD, Command::DiscoverIdentity));
        discovery.consume_svids(&[ack(USB_SID_PD, Command::DiscoverSvids), 0xff01_0000]).unwrap();
        discovery.refused(VdmHeader::request(USB_SID_DISPLAYPORT, Command::DiscoverModes));
        assert_eq!(discovery.modes(USB_SID_DISPLAYPORT), Some(&[][..]));
        assert!(discovery.next_request(&[USB_SID_DISPLAYPORT]).is_none());
    }

    #[test]
    fn short_identity_is_malformed() {
        let mut discovery = Discovery::default();
        assert!(discovery.consume_identity(&[0, 0]).is_err());
        assert!(discovery.identity().is_none());
    }
}
