// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::{util::lock, Port};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Notifications raised towards the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// The port started or stopped supplying power.
    PowerChange(Port),
    /// DisplayPort was entered, or the sink asserted HPD, while the host sleeps.
    DpAltModeEntry(Port),
    /// The physical HPD level of a port changed.
    HotPlugDetect { port: Port, level: bool },
    /// The partner reported a firmware image that may need an update.
    UpdateDevice(Port),
}

pub trait HostEvents: Send + Sync {
    fn send(&self, event: HostEvent);
}

/// Forwards events to the task that owns the D-Bus connection.
pub struct ChannelHost {
    tx: UnboundedSender<HostEvent>,
}

impl ChannelHost {
    pub fn new(tx: UnboundedSender<HostEvent>) -> Self { Self { tx } }
}

impl HostEvents for ChannelHost {
    fn send(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("host event {:?} dropped: no listener", event);
        }
    }
}

/// Keeps every event, for the simulator and the tests.
#[derive(Default)]
pub struct RecordingHost {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    pub fn take(&self) -> Vec<HostEvent> { std::mem::take(&mut *lock(&self.events)) }
}

impl HostEvents for RecordingHost {
    fn send(&self, event: HostEvent) {
        log::debug!("host event: {:?}", event);
        lock(&self.events).push(event);
    }
}
