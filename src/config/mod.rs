// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

mod responder;

pub use self::responder::ResponderConfig;

use crate::{
    board::ChipsetState, errors::ConfigError, hpd::HpdTiming, vdo::PinAssignments, Port,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT: &str = "/usr/lib/typec-altmode/config.json";
const USER: &str = "/etc/typec-altmode/config.json";

/// Most ports a single controller handles.
pub const MAX_PORTS: usize = 8;

/// Ports that share one DisplayPort output, HPD line and aux channel.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SharedDpConfig {
    pub ports:      Vec<Port>,
    /// The board has a select line steering the aux channel between them.
    #[serde(default)]
    pub aux_switch: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HpdConfig {
    pub irq_pulse_us:   u64,
    pub min_spacing_us: u64,
}

impl Default for HpdConfig {
    fn default() -> Self { Self { irq_pulse_us: 500, min_spacing_us: 2000 } }
}

impl HpdConfig {
    pub fn timing(&self) -> HpdTiming {
        HpdTiming {
            irq_pulse:   Duration::from_micros(self.irq_pulse_us),
            min_spacing: Duration::from_micros(self.min_spacing_us),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub ports:           usize,
    pub shared_dp:       Option<SharedDpConfig>,
    pub hpd:             HpdConfig,
    /// Pin assignments this side can drive, as letters.
    pub pin_assignments: String,
    pub mf_allow:        bool,
    /// Chipset state the simulated board starts in.
    pub chipset:         String,
    pub responder:       Option<ResponderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ports:           2,
            shared_dp:       None,
            hpd:             HpdConfig::default(),
            pin_assignments: "CDE".into(),
            mf_allow:        true,
            chipset:         "on".into(),
            responder:       None,
        }
    }
}

impl Config {
    /// Loads the config at `path`, or else the first of the user and system
    /// configs that exists, or else the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_path(path);
        }

        for path in [USER, DEFAULT] {
            if Path::new(path).exists() {
                log::info!("loading config from {}", path);
                return Self::from_path(Path::new(path));
            }
        }

        log::info!("no config found, using defaults");
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|why| ConfigError::Read(PathBuf::from(path), why))?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.ports == 0 || self.ports > MAX_PORTS {
            return invalid(format!("ports must be between 1 and {}, not {}", MAX_PORTS, self.ports));
        }

        if let Some(shared) = &self.shared_dp {
            if shared.ports.len() < 2 {
                return invalid("a shared DisplayPort output needs at least two ports".into());
            }

            if let Some(port) = shared.ports.iter().find(|&&port| port >= self.ports) {
                return invalid(format!("shared port {} does not exist", port));
            }

            if let Some((_, port)) = shared.ports.iter().enumerate().find(|&(n, port)| shared.ports[..n].contains(port)) {
                return invalid(format!("shared port {} is listed more than once", port));
            }
        }

        if self.hpd.irq_pulse_us == 0 || self.hpd.irq_pulse_us >= self.hpd.min_spacing_us {
            return invalid("HPD IRQ pulse must be non-zero and shorter than the minimum spacing".into());
        }

        if self.pins().is_none() {
            return invalid(format!("unknown pin assignments {:?}", self.pin_assignments));
        }

        if self.chipset_state().is_none() {
            return invalid(format!("unknown chipset state {:?}", self.chipset));
        }

        Ok(())
    }

    pub fn pins(&self) -> Option<PinAssignments> { PinAssignments::from_letters(&self.pin_assignments) }

    pub fn chipset_state(&self) -> Option<ChipsetState> { ChipsetState::parse(&self.chipset) }

    pub fn shared_ports(&self) -> &[Port] { self.shared_dp.as_ref().map_or(&[], |shared| shared.ports.as_slice()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.pins(), Some(PinAssignments::C | PinAssignments::D | PinAssignments::E));
        assert_eq!(config.hpd.timing(), HpdTiming::default());
    }

    #[test]
    fn shared_output() {
        let config = Config::from_json(r#"{ "ports": 2, "shared_dp": { "ports": [0, 1], "aux_switch": true } }"#).unwrap();
        assert_eq!(config.shared_ports(), &[0, 1]);
    }

    #[test]
    fn rejects_bad_values() {
        for json in [
            r#"{ "ports": 0 }"#,
            r#"{ "ports": 9 }"#,
            r#"{ "shared_dp": { "ports": [0] } }"#,
            r#"{ "shared_dp": { "ports": [0, 2] } }"#,
            r#"{ "shared_dp": { "ports": [0, 0] } }"#,
            r#"{ "ports": 3, "shared_dp": { "ports": [0, 1, 1] } }"#,
            r#"{ "hpd": { "irq_pulse_us": 3000 } }"#,
            r#"{ "pin_assignments": "CDX" }"#,
            r#"{ "chipset": "g3" }"#,
        ] {
            assert!(matches!(Config::from_json(json), Err(ConfigError::Invalid(_))), "{}", json);
        }

        assert!(matches!(Config::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
