// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// What the host has told us about ourselves.
///
/// There is exactly one of these and it belongs to the main loop; every
/// request handler borrows it mutably for the length of one control transfer.
/// Interrupt handlers don't get to touch it. A bus reset is reported through
/// `sync::Latch` instead and applied here by the main loop, so nothing ever
/// sees a half-updated state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    configuration: u8,
    address: u8,
    /// Address received in `SetAddress` but not yet in effect. We have to
    /// finish the status stage on the old address first.
    pending_address: Option<u8>,
}

impl DeviceState {
    pub const fn new() -> Self {
        Self {
            configuration: 0,
            address: 0,
            pending_address: None,
        }
    }

    /// Back to the just-plugged-in state: default address, unconfigured.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn set_configuration(&mut self, value: u8) {
        self.configuration = value;
    }

    pub fn is_configured(&self) -> bool {
        self.configuration != 0
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Records a new address to switch to once the current transfer's status
    /// stage is done. Only the low 7 bits mean anything.
    pub fn set_pending_address(&mut self, address: u8) {
        self.pending_address = Some(address & 0x7F);
    }

    /// Hands out the pending address, if any, and makes it current.
    pub fn latch_address(&mut self) -> Option<u8> {
        let a = self.pending_address.take()?;
        self.address = a;
        Some(a)
    }

    pub fn cancel_pending_address(&mut self) {
        self.pending_address = None;
    }

    pub fn pending_address(&self) -> Option<u8> {
        self.pending_address
    }
}
