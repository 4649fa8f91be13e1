// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};
use zvariant::Type;

#[derive(Deserialize, Serialize, Type, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortStatus {
    pub port:        u32,
    pub connected:   bool,
    /// One of `idle`, `mode-entered`, `configuring` or `configured`.
    pub dp_state:    String,
    pub dp_on:       bool,
    pub hpd_pending: bool,
    pub hpd_level:   bool,
    /// Pin assignment letter, empty when unconfigured.
    pub pin:         String,
    pub mf_allow:    bool,
    pub aux_owner:   bool,
    pub gfu_active:  bool,
    pub sourcing:    bool,
}

#[zbus::dbus_proxy(
    interface = "com.system76.TypecAltMode",
    default_service = "com.system76.TypecAltMode",
    default_path = "/com/system76/TypecAltMode"
)]
trait TypecAltMode {
    /// GetPortCount method
    fn get_port_count(&self) -> zbus::Result<u32>;

    /// GetPortStatus method
    fn get_port_status(&self, port: u32) -> zbus::Result<PortStatus>;

    /// SetMfAllow method
    fn set_mf_allow(&self, port: u32, allow: bool) -> zbus::Result<()>;

    /// SendVdm method
    fn send_vdm(&self, port: u32, vdos: &[u32]) -> zbus::Result<Vec<u32>>;

    /// PollVdm method
    fn poll_vdm(&self, port: u32) -> zbus::Result<Vec<u32>>;

    /// SetConnected method
    fn set_connected(&self, port: u32, connected: bool) -> zbus::Result<()>;

    /// SetChipsetState method
    fn set_chipset_state(&self, state: &str) -> zbus::Result<u32>;

    /// HotPlugDetect signal
    #[dbus_proxy(signal)]
    fn hot_plug_detect(&self, port: u32, level: bool) -> zbus::Result<()>;

    /// PowerInfoChange signal
    #[dbus_proxy(signal)]
    fn power_info_change(&self, port: u32) -> zbus::Result<()>;

    /// DpAltModeEntry signal
    #[dbus_proxy(signal)]
    fn dp_alt_mode_entry(&self, port: u32) -> zbus::Result<()>;

    /// UpdateDevice signal
    #[dbus_proxy(signal)]
    fn update_device(&self, port: u32) -> zbus::Result<()>;
}
