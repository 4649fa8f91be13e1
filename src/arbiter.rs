// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::{board::Board, util::lock, Port};
use std::sync::Mutex;

/// Ownership of a DisplayPort output shared between several ports.
///
/// Ports outside the shared group have their own output and are always muxable.
pub struct AuxArbiter {
    members: Vec<Port>,
    switch:  bool,
    owner:   Mutex<Option<Port>>,
}

impl AuxArbiter {
    /// `switch` is set when the board has a select line steering the aux channel.
    pub fn new(members: Vec<Port>, switch: bool) -> Self { Self { members, switch, owner: Mutex::new(None) } }

    pub fn is_shared(&self, port: Port) -> bool { self.members.contains(&port) }

    pub fn owner(&self) -> Option<Port> { *lock(&self.owner) }

    /// Claims the output for `port` unless another port holds it.
    pub fn try_claim(&self, port: Port, board: &dyn Board) -> bool {
        if !self.is_shared(port) {
            return true;
        }

        let mut owner = lock(&self.owner);
        match *owner {
            Some(current) => current == port,
            None => {
                *owner = Some(port);
                if self.switch {
                    board.set_aux_path(Some(port));
                }
                log::info!("C{}: claimed shared DisplayPort output", port);
                true
            }
        }
    }

    pub fn is_muxable(&self, port: Port) -> bool {
        !self.is_shared(port) || lock(&self.owner).map_or(true, |owner| owner == port)
    }

    /// Gives up ownership held by `port`, handing it to the first other member
    /// for which `connected` holds. Returns the new owner.
    pub fn release<F: Fn(Port) -> bool>(&self, port: Port, board: &dyn Board, connected: F) -> Option<Port> {
        if !self.is_shared(port) {
            return None;
        }

        let mut owner = lock(&self.owner);
        if *owner != Some(port) {
            return None;
        }

        let next = self.members.iter().copied().find(|&other| other != port && connected(other));
        *owner = next;
        if self.switch {
            board.set_aux_path(next);
        }

        match next {
            Some(next) => log::info!("C{}: shared DisplayPort output handed to C{}", port, next),
            None => log::info!("C{}: released shared DisplayPort output", port),
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{board::SimulatedBoard, time::ManualClock};
    use std::sync::Arc;

    fn board() -> SimulatedBoard { SimulatedBoard::new(3, &[0, 1], Arc::new(ManualClock::new())) }

    #[test]
    fn one_of_two_simultaneous_claims_wins() {
        let board = board();
        let arbiter = AuxArbiter::new(vec![0, 1], true);

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| arbiter.try_claim(0, &board));
            let b = s.spawn(|| arbiter.try_claim(1, &board));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(a ^ b);
        let owner = arbiter.owner().unwrap();
        assert_eq!(board.aux_path(), Some(owner));
        assert!(arbiter.is_muxable(owner));
        assert!(!arbiter.is_muxable(1 - owner));
    }

    #[test]
    fn release_transfers_to_connected_port() {
        let board = board();
        let arbiter = AuxArbiter::new(vec![0, 1], true);
        assert!(arbiter.try_claim(0, &board));
        assert!(arbiter.try_claim(0, &board));
        assert!(!arbiter.try_claim(1, &board));

        assert_eq!(arbiter.release(1, &board, |_| true), None);
        assert_eq!(arbiter.owner(), Some(0));

        assert_eq!(arbiter.release(0, &board, |port| port == 1), Some(1));
        assert_eq!(board.aux_path(), Some(1));
        assert!(arbiter.is_muxable(1));

        assert_eq!(arbiter.release(1, &board, |_| false), None);
        assert_eq!(arbiter.owner(), None);
        assert_eq!(board.aux_path(), None);
    }

    #[test]
    fn dedicated_ports_are_always_muxable() {
        let board = board();
        let arbiter = AuxArbiter::new(vec![0, 1], false);
        assert!(arbiter.try_claim(0, &board));
        assert!(arbiter.try_claim(2, &board));
        assert!(arbiter.is_muxable(2));
        assert_eq!(arbiter.release(2, &board, |_| true), None);
        assert_eq!(board.aux_path(), None);
    }
}
