// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Vendor defined message headers and the DisplayPort object layouts carried in them.

use bitflags::bitflags;

/// Standard ID used for discovery.
pub const USB_SID_PD: u16 = 0xff00;

/// Standard ID assigned to the DisplayPort alternate mode.
pub const USB_SID_DISPLAYPORT: u16 = 0xff01;

/// Vendor ID used by the firmware update mode and the unstructured commands.
pub const USB_VID_GOOGLE: u16 = 0x18d1;

/// Maximum number of objects in one message, header included.
pub const VDO_MAX_SIZE: usize = 7;

/// DisplayPort is always exposed as the first mode of its SVID.
pub const DP_OPOS: u8 = 1;

/// Mode offered under the Google SVID for firmware updates.
pub const MODE_GOOGLE_FU: u32 = 1;

/// Structured VDM version 2.0.
pub const SVDM_V2: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes,
    EnterMode,
    ExitMode,
    Attention,
    DpStatus,
    DpConfig,
    Other(u8),
}

impl Command {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x1f {
            1 => Command::DiscoverIdentity,
            2 => Command::DiscoverSvids,
            3 => Command::DiscoverModes,
            4 => Command::EnterMode,
            5 => Command::ExitMode,
            6 => Command::Attention,
            16 => Command::DpStatus,
            17 => Command::DpConfig,
            other => Command::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Command::DiscoverIdentity => 1,
            Command::DiscoverSvids => 2,
            Command::DiscoverModes => 3,
            Command::EnterMode => 4,
            Command::ExitMode => 5,
            Command::Attention => 6,
            Command::DpStatus => 16,
            Command::DpConfig => 17,
            Command::Other(other) => other & 0x1f,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    Init,
    Ack,
    Nak,
    Busy,
}

impl CommandType {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x3 {
            0 => CommandType::Init,
            1 => CommandType::Ack,
            2 => CommandType::Nak,
            _ => CommandType::Busy,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            CommandType::Init => 0,
            CommandType::Ack => 1,
            CommandType::Nak => 2,
            CommandType::Busy => 3,
        }
    }
}

/// First object of every VDM.
///
/// ```text
/// <31:16> SVID
/// <15>    structured
/// <14:13> structured VDM version
/// <10:8>  object position
/// <7:6>   command type
/// <4:0>   command
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VdmHeader {
    pub svid:       u16,
    pub structured: bool,
    pub version:    u8,
    pub opos:       u8,
    pub cmd_type:   CommandType,
    pub command:    Command,
}

impl VdmHeader {
    /// A structured request initiated by this side.
    pub fn request(svid: u16, command: Command) -> Self {
        Self {
            svid,
            structured: true,
            version: SVDM_V2,
            opos: 0,
            cmd_type: CommandType::Init,
            command,
        }
    }

    /// An unstructured vendor command.
    pub fn custom(svid: u16, command: u8) -> Self {
        Self {
            svid,
            structured: false,
            version: 0,
            opos: 0,
            cmd_type: CommandType::Init,
            command: Command::from_raw(command),
        }
    }

    pub fn with_opos(self, opos: u8) -> Self { Self { opos: opos & 0x7, ..self } }

    pub fn with_version(self, version: u8) -> Self { Self { version: version & 0x3, ..self } }

    /// The header answering this request.
    pub fn reply(self, cmd_type: CommandType) -> Self { Self { cmd_type, ..self } }

    pub fn from_raw(raw: u32) -> Self {
        Self {
            svid:       (raw >> 16) as u16,
            structured: raw & (1 << 15) != 0,
            version:    ((raw >> 13) & 0x3) as u8,
            opos:       ((raw >> 8) & 0x7) as u8,
            cmd_type:   CommandType::from_raw((raw >> 6) as u8),
            command:    Command::from_raw(raw as u8),
        }
    }

    pub fn to_raw(self) -> u32 {
        if !self.structured {
            return u32::from(self.svid) << 16 | u32::from(self.command.raw());
        }

        u32::from(self.svid) << 16
            | 1 << 15
            | u32::from(self.version & 0x3) << 13
            | u32::from(self.opos & 0x7) << 8
            | u32::from(self.cmd_type.raw()) << 6
            | u32::from(self.command.raw())
    }
}

/// Unstructured commands understood under [`USB_VID_GOOGLE`].
pub mod custom {
    const fn vendor(x: u8) -> u8 { (10 + x) & 0x1f }

    pub const VERSION: u8 = vendor(0);
    pub const SEND_INFO: u8 = vendor(1);
    pub const READ_INFO: u8 = vendor(2);
    pub const CURRENT: u8 = vendor(11);
}

bitflags! {
    /// DisplayPort pin assignments A through F.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PinAssignments: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
        const C = 1 << 2;
        const D = 1 << 3;
        const E = 1 << 4;
        const F = 1 << 5;

        /// Assignments leaving two lanes for USB.
        const MULTIFUNCTION = Self::B.bits() | Self::D.bits() | Self::F.bits();
        /// Assignments using the legacy BR2 signaling levels.
        const BR2 = Self::A.bits() | Self::B.bits();
        /// Assignments using DisplayPort signaling levels.
        const DP = Self::C.bits() | Self::D.bits() | Self::E.bits() | Self::F.bits();
    }
}

impl PinAssignments {
    /// Parses a set written as letters, such as `"CDE"`.
    pub fn from_letters(letters: &str) -> Option<Self> {
        let mut pins = Self::empty();
        for c in letters.chars() {
            pins |= match c.to_ascii_uppercase() {
                'A' => Self::A,
                'B' => Self::B,
                'C' => Self::C,
                'D' => Self::D,
                'E' => Self::E,
                'F' => Self::F,
                _ => return None,
            };
        }

        Some(pins)
    }

    pub fn letters(self) -> String {
        ['A', 'B', 'C', 'D', 'E', 'F']
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.bits() & (1 << bit) != 0)
            .map(|(_, c)| *c)
            .collect()
    }

    /// The highest assignment of the set.
    pub fn highest(self) -> Option<Self> {
        if self.is_empty() {
            return None;
        }

        Some(Self::from_bits_truncate(1 << (7 - self.bits().leading_zeros())))
    }

    pub fn is_multifunction(self) -> bool { self.intersects(Self::MULTIFUNCTION) }
}

/// Signal direction advertised in a DisplayPort mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortCapability {
    Reserved,
    UfpD,
    DfpD,
    Both,
}

/// DisplayPort mode capabilities, as returned by Discover Modes.
///
/// ```text
/// <23:16> UFP_D pin assignments
/// <15:8>  DFP_D pin assignments
/// <7>     USB 2.0 signaling not used
/// <6>     receptacle
/// <5:2>   signaling
/// <1:0>   port capability
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DpModeCaps(pub u32);

impl DpModeCaps {
    pub const SIGNALING_V13: u8 = 0x1;
    pub const SIGNALING_GEN2: u8 = 0x2;

    pub fn new(ufp_pins: PinAssignments, dfp_pins: PinAssignments, receptacle: bool, capability: PortCapability) -> Self {
        let capability = match capability {
            PortCapability::Reserved => 0,
            PortCapability::UfpD => 1,
            PortCapability::DfpD => 2,
            PortCapability::Both => 3,
        };

        Self(
            u32::from(ufp_pins.bits()) << 16
                | u32::from(dfp_pins.bits()) << 8
                | u32::from(receptacle) << 6
                | u32::from(Self::SIGNALING_V13) << 2
                | capability,
        )
    }

    pub fn receptacle(self) -> bool { self.0 & (1 << 6) != 0 }

    pub fn signaling(self) -> u8 { ((self.0 >> 2) & 0xf) as u8 }

    pub fn capability(self) -> PortCapability {
        match self.0 & 0x3 {
            1 => PortCapability::UfpD,
            2 => PortCapability::DfpD,
            3 => PortCapability::Both,
            _ => PortCapability::Reserved,
        }
    }

    /// True when the device can act as the DisplayPort sink.
    pub fn is_ufp_d(self) -> bool { self.0 & 0x1 != 0 }

    /// Pin assignments usable with this adapter.
    ///
    /// Receptacles report them in the UFP_D field; plugs with a captive cable
    /// report them in the DFP_D field.
    pub fn pin_caps(self) -> PinAssignments {
        let shift = if self.receptacle() { 16 } else { 8 };
        PinAssignments::from_bits_truncate((self.0 >> shift) as u8)
    }
}

/// DisplayPort connection status reported by DP Status and Attention.
///
/// ```text
/// <8>   HPD IRQ
/// <7>   HPD level
/// <6>   exit request
/// <5>   switch to USB request
/// <4>   multi-function preferred
/// <3>   enabled
/// <2>   power low
/// <1:0> connected
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DpStatus(pub u32);

impl DpStatus {
    pub const DFP_D_CONNECTED: u8 = 0x1;
    pub const UFP_D_CONNECTED: u8 = 0x2;

    const IRQ: u32 = 1 << 8;
    const LEVEL: u32 = 1 << 7;
    const EXIT: u32 = 1 << 6;
    const USB: u32 = 1 << 5;
    const MF: u32 = 1 << 4;
    const ENABLED: u32 = 1 << 3;
    const POWER_LOW: u32 = 1 << 2;

    fn flag(self, bit: u32, set: bool) -> Self { if set { Self(self.0 | bit) } else { Self(self.0 & !bit) } }

    pub fn with_hpd_irq(self, set: bool) -> Self { self.flag(Self::IRQ, set) }

    pub fn with_hpd_level(self, set: bool) -> Self { self.flag(Self::LEVEL, set) }

    pub fn with_mf_pref(self, set: bool) -> Self { self.flag(Self::MF, set) }

    pub fn with_enabled(self, set: bool) -> Self { self.flag(Self::ENABLED, set) }

    pub fn with_exit_request(self, set: bool) -> Self { self.flag(Self::EXIT, set) }

    pub fn with_connected(self, connected: u8) -> Self { Self((self.0 & !0x3) | u32::from(connected & 0x3)) }

    pub fn hpd_irq(self) -> bool { self.0 & Self::IRQ != 0 }

    pub fn hpd_level(self) -> bool { self.0 & Self::LEVEL != 0 }

    pub fn exit_request(self) -> bool { self.0 & Self::EXIT != 0 }

    pub fn usb_request(self) -> bool { self.0 & Self::USB != 0 }

    pub fn mf_pref(self) -> bool { self.0 & Self::MF != 0 }

    pub fn enabled(self) -> bool { self.0 & Self::ENABLED != 0 }

    pub fn power_low(self) -> bool { self.0 & Self::POWER_LOW != 0 }

    pub fn connected(self) -> u8 { (self.0 & 0x3) as u8 }
}

/// Configuration requested of the UFP_U in DP Config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSelect {
    Usb,
    DfpD,
    UfpD,
    Reserved,
}

/// DisplayPort configuration.
///
/// ```text
/// <15:8> pin assignment
/// <5:2>  signaling
/// <1:0>  configuration
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DpConfig {
    pub pin:       PinAssignments,
    pub signaling: u8,
    pub select:    ConfigSelect,
}

impl DpConfig {
    /// A DPv1.3 configuration with the partner as UFP_D.
    pub fn ufp_d(pin: PinAssignments) -> Self {
        Self { pin, signaling: DpModeCaps::SIGNALING_V13, select: ConfigSelect::UfpD }
    }

    /// Older partners carry the pin assignment in bits 23:16 instead.
    pub fn from_raw(raw: u32) -> Self {
        let pin = match (raw >> 8) as u8 {
            0 => (raw >> 16) as u8,
            pin => pin,
        };

        Self {
            pin:       PinAssignments::from_bits_truncate(pin),
            signaling: ((raw >> 2) & 0xf) as u8,
            select:    match raw & 0x3 {
                0 => ConfigSelect::Usb,
                1 => ConfigSelect::DfpD,
                2 => ConfigSelect::UfpD,
                _ => ConfigSelect::Reserved,
            },
        }
    }

    pub fn to_raw(self) -> u32 {
        let select = match self.select {
            ConfigSelect::Usb => 0,
            ConfigSelect::DfpD => 1,
            ConfigSelect::UfpD => 2,
            ConfigSelect::Reserved => 3,
        };

        u32::from(self.pin.bits()) << 8 | u32::from(self.signaling & 0xf) << 2 | select
    }

    /// True when the configuration routes DisplayPort over the connector.
    pub fn is_dp_on(self) -> bool { matches!(self.select, ConfigSelect::DfpD | ConfigSelect::UfpD) }

    pub fn is_multifunction(self) -> bool { self.pin.is_multifunction() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProductType {
    Undefined,
    Hub,
    Peripheral,
    PassiveCable,
    ActiveCable,
    Ama,
    Other(u8),
}

impl ProductType {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x7 {
            0 => ProductType::Undefined,
            1 => ProductType::Hub,
            2 => ProductType::Peripheral,
            3 => ProductType::PassiveCable,
            4 => ProductType::ActiveCable,
            5 => ProductType::Ama,
            other => ProductType::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            ProductType::Undefined => 0,
            ProductType::Hub => 1,
            ProductType::Peripheral => 2,
            ProductType::PassiveCable => 3,
            ProductType::ActiveCable => 4,
            ProductType::Ama => 5,
            ProductType::Other(other) => other & 0x7,
        }
    }

    /// Product types followed by a product type VDO.
    pub fn has_vdo(self) -> bool {
        matches!(self, ProductType::PassiveCable | ProductType::ActiveCable | ProductType::Ama)
    }
}

/// ID header returned by Discover Identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdHeader {
    pub usb_host:     bool,
    pub usb_device:   bool,
    pub product_type: ProductType,
    pub modal:        bool,
    pub vid:          u16,
}

impl IdHeader {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            usb_host:     raw & (1 << 31) != 0,
            usb_device:   raw & (1 << 30) != 0,
            product_type: ProductType::from_raw((raw >> 27) as u8),
            modal:        raw & (1 << 26) != 0,
            vid:          raw as u16,
        }
    }

    pub fn to_raw(self) -> u32 {
        u32::from(self.usb_host) << 31
            | u32::from(self.usb_device) << 30
            | u32::from(self.product_type.raw()) << 27
            | u32::from(self.modal) << 26
            | u32::from(self.vid)
    }
}

/// Cert stat VDO: the 20 bit XID assigned by USB-IF.
pub fn cert_stat(xid: u32) -> u32 { xid & 0xfffff }

/// Product VDO: product ID and device release.
pub fn product(pid: u16, bcd: u16) -> u32 { u32::from(pid) << 16 | u32::from(bcd) }

/// Packs SVIDs two per object, upper half first, ending with a zero SVID.
pub fn pack_svids(svids: &[u16]) -> Vec<u32> {
    let mut vdos: Vec<u32> = svids
        .chunks(2)
        .map(|pair| u32::from(pair[0]) << 16 | pair.get(1).map_or(0, |&svid| u32::from(svid)))
        .collect();

    if svids.len() % 2 == 0 {
        vdos.push(0);
    }

    vdos
}

/// Device information sent with the `SEND_INFO` and `READ_INFO` commands.
///
/// ```text
/// <31:26> hardware ID minor
/// <25:16> hardware ID major
/// <15:1>  software debug version
/// <0>     running RW image
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo(pub u32);

impl DeviceInfo {
    pub fn new(id: u16, id_minor: u8, version: u16, is_rw: bool) -> Self {
        Self(
            u32::from(id_minor) << 26
                | u32::from(id & 0x3ff) << 16
                | u32::from(version & 0x7fff) << 1
                | u32::from(is_rw),
        )
    }

    pub fn hw_dev_id(self) -> u16 { (self.0 >> 16) as u16 }

    pub fn major(self) -> u16 { self.hw_dev_id() & 0x3ff }

    pub fn minor(self) -> u16 { self.hw_dev_id() >> 10 }

    pub fn sw_version(self) -> u16 { ((self.0 >> 1) & 0x7fff) as u16 }

    pub fn is_rw(self) -> bool { self.0 & 1 != 0 }
}
