// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Replays port events from a JSON script against the simulated board.

use crate::{
    board::{ChipsetState, Platform, SimulatedBoard},
    config::Config,
    dfp::Setup,
    host::RecordingHost,
    manager::PortManager,
    time::{Clock, ManualClock},
    Port,
};
use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc, time::Duration};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Connect(Port),
    Disconnect(Port),
    /// A message received from the partner.
    Vdm { port: Port, vdos: Vec<u32> },
    /// Ask for the next request to send as the DFP.
    Poll(Port),
    AdvanceUs(u64),
    Chipset(String),
    MfAllow { port: Port, allow: bool },
    Source { port: Port, enable: bool },
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    pub config: Config,
    pub steps:  Vec<Step>,
}

impl Script {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let script: Self = serde_json::from_str(&data).context("failed to parse script")?;
        script.config.validate()?;
        Ok(script)
    }
}

fn hex(vdos: &[u32]) -> String { vdos.iter().map(|vdo| format!("{:08x}", vdo)).collect::<Vec<_>>().join(" ") }

/// Runs every step, returning one line of output per step followed by the
/// hardware trace and the host events.
pub async fn replay(script: &Script) -> anyhow::Result<Vec<String>> {
    let config = &script.config;
    let clock = Arc::new(ManualClock::new());
    let board = Arc::new(SimulatedBoard::new(config.ports, config.shared_ports(), clock.clone()));
    board.set_chipset(config.chipset_state().ok_or_else(|| anyhow!("unknown chipset state {}", config.chipset))?);
    let host = Arc::new(RecordingHost::default());
    let plat = Platform { board: board.clone(), clock: clock.clone(), host: host.clone() };
    let mut manager = PortManager::new(config, plat);

    let mut output = Vec::new();
    for (n, step) in script.steps.iter().enumerate() {
        let line = match step {
            Step::Connect(port) => {
                manager.connect(*port).map_err(|why| anyhow!("step {}: {}", n, why))?;
                format!("C{}: connected", port)
            }
            Step::Disconnect(port) => {
                manager.disconnect(*port).await;
                format!("C{}: disconnected", port)
            }
            Step::Vdm { port, vdos } => {
                let reply = manager.handle_vdm(*port, vdos).await;
                format!("C{}: {} -> {:?}", port, hex(vdos), reply)
            }
            Step::Poll(port) => match manager.poll(*port) {
                Setup::Send(vdos) => format!("C{}: send {}", port, hex(&vdos)),
                other => format!("C{}: {:?}", port, other),
            },
            Step::AdvanceUs(micros) => {
                clock.advance(Duration::from_micros(*micros));
                format!("now {}us", clock.now().as_micros())
            }
            Step::Chipset(name) => {
                let state = ChipsetState::parse(name).ok_or_else(|| anyhow!("step {}: unknown chipset state {}", n, name))?;
                board.set_chipset(state);
                let exits = manager.chipset_changed(state);
                format!("chipset {}, {} ports leaving DisplayPort", name, exits.len())
            }
            Step::MfAllow { port, allow } => {
                manager.set_mf_allow(*port, *allow).map_err(|why| anyhow!("step {}: {}", n, why))?;
                format!("C{}: mf allow {}", port, allow)
            }
            Step::Source { port, enable } => {
                if *enable {
                    manager.set_power_supply_ready(*port).with_context(|| format!("step {}", n))?;
                } else {
                    manager.power_supply_reset(*port);
                }
                format!("C{}: sourcing {}", port, enable)
            }
        };

        output.push(line);
    }

    for (at, event) in board.take_trace() {
        output.push(format!("{:>8}us {:?}", at.as_micros(), event));
    }

    for event in host.take() {
        output.push(format!("host {:?}", event));
    }

    Ok(output)
}

#[tokio::main(flavor = "current_thread")]
pub async fn simulate(path: &Path) -> anyhow::Result<()> {
    let script = Script::from_path(path)?;
    for line in replay(&script).await? {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_entry_with_pending_hpd() {
        // Enter, HPD high before configuration, then pin D.
        let script: Script = serde_json::from_str(
            r#"{
                "config": { "ports": 1, "responder": {} },
                "steps": [
                    { "connect": 0 },
                    { "vdm": { "port": 0, "vdos": [4278296836] } },
                    { "vdm": { "port": 0, "vdos": [4278296838, 138] } },
                    { "advance_us": 1000 },
                    { "vdm": { "port": 0, "vdos": [4278296849, 2054] } }
                ]
            }"#,
        )
        .unwrap();

        let output = replay(&script).await.unwrap();
        assert!(output[1].contains("Ack"), "{}", output[1]);
        assert!(output[2].contains("Ack"), "{}", output[2]);
        assert_eq!(output[3], "now 1000us");
        assert!(output.iter().any(|line| line.ends_with("Hpd { port: 0, level: true }")));
        assert!(output.iter().any(|line| line == "host HotPlugDetect { port: 0, level: true }"));
    }

    #[tokio::test]
    async fn bad_steps_are_errors() {
        let script = Script { config: Config::default(), steps: vec![Step::Chipset("g3".into())] };
        assert!(replay(&script).await.is_err());

        let script = Script { config: Config::default(), steps: vec![Step::Connect(5)] };
        assert!(replay(&script).await.is_err());
    }
}
