// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::args::Command;
use typec_altmode_zbus::{PortStatus, TypecAltModeProxy};
use zbus::Connection;

fn print_status(status: &PortStatus) {
    println!("C{}:", status.port);
    println!("  Connected: {}", status.connected);
    println!("  DisplayPort: {}{}", status.dp_state, if status.dp_on { ", routed" } else { "" });
    if !status.pin.is_empty() {
        println!("  Pin assignment: {}", status.pin);
    }
    println!("  HPD: {}{}", if status.hpd_level { "high" } else { "low" }, if status.hpd_pending { " (pending)" } else { "" });
    println!("  Multi-function: {}", if status.mf_allow { "allowed" } else { "disallowed" });
    if status.aux_owner {
        println!("  Owns the shared DisplayPort output");
    }
    if status.gfu_active {
        println!("  Firmware update mode active");
    }
    println!("  Sourcing VBUS: {}", status.sourcing);
}

async fn connect(session: bool) -> zbus::Result<TypecAltModeProxy<'static>> {
    let connection = if session { Connection::session().await? } else { Connection::system().await? };
    TypecAltModeProxy::new(&connection).await
}

#[tokio::main(flavor = "current_thread")]
pub async fn client(command: &Command) -> Result<(), String> {
    match command {
        Command::Status { port, session } => {
            let proxy = connect(*session).await.map_err(|why| why.to_string())?;
            let ports = match port {
                Some(port) => vec![*port],
                None => (0..proxy.get_port_count().await.map_err(|why| why.to_string())?).collect(),
            };

            for port in ports {
                let status = proxy.get_port_status(port).await.map_err(|why| why.to_string())?;
                print_status(&status);
            }

            Ok(())
        }
        Command::Mfallow { port, allow, session } => {
            let proxy = connect(*session).await.map_err(|why| why.to_string())?;
            proxy.set_mf_allow(*port, *allow).await.map_err(|why| why.to_string())
        }
        Command::Daemon { .. } | Command::Simulate { .. } => Err("not a client command".into()),
    }
}
