// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser;
use std::process;
use typec_altmode::{
    args::{Args, Command},
    client::client,
    daemon::daemon,
    logging,
    simulate::simulate,
};

fn main() {
    let args = Args::parse();

    let res = match &args.command {
        Command::Daemon { quiet, verbose, session, config } => {
            if let Err(why) = logging::setup(logging::level(*quiet, *verbose)) {
                eprintln!("failed to set up logging: {}", why);
                process::exit(1);
            }

            daemon(config.as_deref(), *session).map_err(|why| why.to_string())
        }
        Command::Simulate { script, verbose } => {
            if let Err(why) = logging::setup(logging::level(false, *verbose)) {
                eprintln!("failed to set up logging: {}", why);
                process::exit(1);
            }

            simulate(script).map_err(|why| format!("{:#}", why))
        }
        command => client(command),
    };

    match res {
        Ok(()) => (),
        Err(err) => {
            eprintln!("typec-altmode: {}", err);
            process::exit(1);
        }
    }
}
