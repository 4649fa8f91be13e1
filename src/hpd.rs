// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Hot plug detect signaling towards the display controller.
//!
//! An HPD IRQ is a short low pulse on a line that is already high. Sinks need
//! a minimum gap between consecutive IRQs, so every transition records the
//! earliest time the next IRQ may start.

use crate::{
    board::Board,
    errors::Nak,
    time::{Clock, Timestamp},
    Port,
};
use std::time::Duration;

/// Width of the low pulse forming an IRQ.
pub const IRQ_PULSE: Duration = Duration::from_micros(500);

/// Minimum time between the end of one transition and the next IRQ.
pub const MIN_SPACING: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HpdTiming {
    pub irq_pulse:   Duration,
    pub min_spacing: Duration,
}

impl Default for HpdTiming {
    fn default() -> Self { Self { irq_pulse: IRQ_PULSE, min_spacing: MIN_SPACING } }
}

/// Drives HPD lines, one deadline per physical line.
pub struct HpdGenerator {
    timing:    HpdTiming,
    deadlines: Vec<Timestamp>,
}

impl HpdGenerator {
    pub fn new(lines: usize, timing: HpdTiming) -> Self {
        Self { timing, deadlines: vec![Timestamp::default(); lines] }
    }

    pub fn deadline(&self, line: usize) -> Timestamp { self.deadlines.get(line).copied().unwrap_or_default() }

    /// Forgets the spacing requirement of a line, as after a fresh connection.
    pub fn reset(&mut self, line: usize) {
        if let Some(deadline) = self.deadlines.get_mut(line) {
            *deadline = Timestamp::default();
        }
    }

    /// Puts `level`, optionally with an IRQ pulse, on the HPD line of `port`.
    ///
    /// IRQs require the line to be high already and to stay high. A pulse
    /// never starts before the line's deadline; waiting for it yields.
    pub async fn apply(
        &mut self,
        board: &dyn Board,
        clock: &dyn Clock,
        port: Port,
        line: usize,
        level: bool,
        irq: bool,
    ) -> Result<(), Nak> {
        if line >= self.deadlines.len() {
            return Err(Nak::InvalidPort(port));
        }

        if irq {
            if !level || !board.hpd_level(port) {
                log::warn!("C{}: HPD IRQ without a high level", port);
                return Err(Nak::IrqWithoutLevel);
            }

            let deadline = self.deadlines[line];
            if clock.now() < deadline {
                clock.sleep_until(deadline).await;
            }

            board.set_hpd_level(port, false);
            clock.delay(self.timing.irq_pulse);
            board.set_hpd_level(port, true);
        } else {
            board.set_hpd_level(port, level);
        }

        self.deadlines[line] = clock.now() + self.timing.min_spacing;
        board.mux_hpd_update(port, level, irq);
        Ok(())
    }
}
