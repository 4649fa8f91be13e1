// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

#![deny(clippy::all)]
#![deny(unused_crate_dependencies)]
#![deny(unused_imports)]
#![allow(clippy::match_like_matches_macro)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::single_match)]

pub mod arbiter;
pub mod args;
pub mod board;
pub mod client;
pub mod config;
pub mod daemon;
pub mod dfp;
pub mod discovery;
pub mod dp;
pub mod errors;
pub mod host;
pub mod hpd;
pub mod logging;
pub mod manager;
pub mod power;
pub mod simulate;
pub mod time;
pub mod util;
pub mod vdm;
pub mod vdo;

pub static DBUS_NAME: &str = "com.system76.TypecAltMode";
pub static DBUS_PATH: &str = "/com/system76/TypecAltMode";
pub static DBUS_IFACE: &str = "com.system76.TypecAltMode";

/// Index of a Type-C port on this controller.
pub type Port = usize;
