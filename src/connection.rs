// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whether a host is there at all.
//!
//! We find out from VBUS. Nothing else in the crate changes its behavior based
//! on this yet; it's here so that plugging and unplugging show up in the log,
//! and so that the controller gets re-attached to the bus each time power
//! comes back.

/// The bits of the controller that have to do with bus power.
pub trait BusPower {
    /// Whether the host is supplying VBUS.
    fn vbus_present(&mut self) -> bool;

    /// Connects to the bus (pull-up on) and arms the bus reset interrupt. Safe
    /// to call again on every new plug-in.
    fn attach(&mut self);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Enumerated,
}

pub struct Connection {
    state: ConnectionState,
}

impl Connection {
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Samples VBUS and moves between states on a change.
    pub fn poll(&mut self, bus: &mut impl BusPower) {
        let powered = bus.vbus_present();
        match (self.state, powered) {
            (ConnectionState::Disconnected, true) => {
                bus.attach();
                self.state = ConnectionState::Enumerated;
                log::info!("plugged in");
            }
            (ConnectionState::Enumerated, false) => {
                self.state = ConnectionState::Disconnected;
                log::info!("disconnected");
            }
            _ => (),
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
