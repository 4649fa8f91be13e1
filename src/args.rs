// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Manages USB Type-C DisplayPort alternate mode and port power roles
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the program in daemon mode
    ///
    /// Registers a new DBUS service and starts an event loop to listen for,
    /// and respond to, DBUS events from clients
    Daemon {
        /// Set the verbosity of daemon logs to 'off' [default is 'info']
        #[arg(long, short, group = "verbosity")]
        quiet: bool,

        /// Set the verbosity of daemon logs to 'debug' [default is 'info']
        #[arg(long, short, group = "verbosity")]
        verbose: bool,

        /// Serve on the session bus, without requiring root
        #[arg(long)]
        session: bool,

        /// Read the configuration from this file instead of the default locations
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Query the state of one port, or of every port
    Status {
        port: Option<u32>,

        /// Talk to a daemon on the session bus
        #[arg(long)]
        session: bool,
    },

    /// Allow or forbid multi-function pin assignments on a port
    Mfallow {
        port: u32,

        #[arg(action = ArgAction::Set)]
        allow: bool,

        /// Talk to a daemon on the session bus
        #[arg(long)]
        session: bool,
    },

    /// Replay a JSON script of port events against the simulated board
    Simulate {
        script: PathBuf,

        /// Set the verbosity of simulation logs to 'debug'
        #[arg(long, short)]
        verbose: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = Args::try_parse_from(["typec-altmode", "mfallow", "1", "false"]).unwrap();
        assert!(matches!(args.command, Command::Mfallow { port: 1, allow: false, session: false }));

        let args = Args::try_parse_from(["typec-altmode", "daemon", "--verbose", "--config", "/tmp/c.json"]).unwrap();
        let Command::Daemon { verbose, config, .. } = args.command else { panic!("not a daemon command") };
        assert!(verbose);
        assert_eq!(config, Some(PathBuf::from("/tmp/c.json")));

        assert!(Args::try_parse_from(["typec-altmode", "daemon", "-q", "-v"]).is_err());
    }
}
