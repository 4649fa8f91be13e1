// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::vdo::{
    cert_stat, pack_svids, product, DpModeCaps, IdHeader, PinAssignments, PortCapability, ProductType,
    MODE_GOOGLE_FU, USB_SID_DISPLAYPORT, USB_VID_GOOGLE,
};
use serde::{Deserialize, Serialize};

/// What we answer when the partner discovers us.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResponderConfig {
    pub vid:             u16,
    pub pid:             u16,
    pub bcd:             u16,
    pub xid:             u32,
    /// DisplayPort mode VDO to advertise; no DisplayPort SVID when absent.
    pub dp_mode:         Option<u32>,
    /// Advertise the firmware update mode under the Google SVID.
    pub firmware_update: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        let pins = PinAssignments::C | PinAssignments::D | PinAssignments::E;
        Self {
            vid:             USB_VID_GOOGLE,
            pid:             0x5000,
            bcd:             0x0001,
            xid:             0,
            dp_mode:         Some(DpModeCaps::new(pins, PinAssignments::empty(), true, PortCapability::UfpD).0),
            firmware_update: false,
        }
    }
}

impl ResponderConfig {
    pub fn svids(&self) -> Vec<u16> {
        let mut svids = Vec::new();
        if self.dp_mode.is_some() {
            svids.push(USB_SID_DISPLAYPORT);
        }
        if self.firmware_update {
            svids.push(USB_VID_GOOGLE);
        }
        svids
    }

    /// Objects following the header of a Discover Identity ACK.
    pub fn identity(&self) -> Vec<u32> {
        let header = IdHeader {
            usb_host:     false,
            usb_device:   true,
            product_type: ProductType::Peripheral,
            modal:        !self.svids().is_empty(),
            vid:          self.vid,
        };

        vec![header.to_raw(), cert_stat(self.xid), product(self.pid, self.bcd)]
    }

    /// Objects following the header of a Discover SVIDs ACK.
    pub fn svid_vdos(&self) -> Vec<u32> { pack_svids(&self.svids()) }

    pub fn modes(&self, svid: u16) -> Option<Vec<u32>> {
        match svid {
            USB_SID_DISPLAYPORT => self.dp_mode.map(|mode| vec![mode]),
            USB_VID_GOOGLE if self.firmware_update => Some(vec![MODE_GOOGLE_FU]),
            _ => None,
        }
    }

    pub fn dp_caps(&self) -> Option<DpModeCaps> { self.dp_mode.map(DpModeCaps) }
}
