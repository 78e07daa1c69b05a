// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The view of the USB peripheral that the protocol engine is written against.
//!
//! The model is the "selected endpoint" window that a lot of small USB device
//! controllers expose: there is one set of FIFO/status registers, and which
//! endpoint they talk to depends on what you selected last. Every method on
//! `EndpointAccess` other than `select_endpoint` and the address/config calls
//! acts on the selected endpoint, so callers must select before each access
//! and must not assume the selection survived a call into someone else's code.

use bitflags::bitflags;

use crate::descriptors::UsbEndpointDescriptor;
use crate::error::UsbError;

bitflags! {
    /// Per-endpoint status flags.
    ///
    /// Clearing a flag is how you tell the hardware you're done with the thing
    /// it signals, so each one has a second meaning when cleared, noted below.
    pub struct EpFlags: u8 {
        /// IN bank is free for us to fill. Cleared on a control endpoint: send
        /// whatever is in the bank (possibly nothing, which is a zero-length
        /// packet), except right after the status OUT of a control read, where
        /// it only closes out the transfer.
        const TX_READY = 1 << 0;
        /// The host sent us an OUT packet. Cleared: acknowledged.
        const RX_OUT = 1 << 2;
        /// A SETUP packet arrived. Cleared: acknowledged, and the bank is
        /// freed for the data stage.
        const RX_SETUP = 1 << 3;
        /// Bank ownership on bulk endpoints. Cleared on IN: the bank is handed
        /// to the hardware for sending. Cleared on OUT: the bank is released
        /// for the next packet.
        const FIFO_CONTROL = 1 << 7;
    }
}

/// Register-window access to the USB device controller.
pub trait EndpointAccess {
    /// Points the window at endpoint `num` (0..=15, no direction bit).
    fn select_endpoint(&mut self, num: u8);

    fn read_byte(&mut self) -> u8;

    fn read_word_le(&mut self) -> u16 {
        let lo = self.read_byte();
        let hi = self.read_byte();
        u16::from_le_bytes([lo, hi])
    }

    fn write_byte(&mut self, value: u8);

    fn write_word_le(&mut self, value: u16) {
        for b in value.to_le_bytes() {
            self.write_byte(b);
        }
    }

    fn status_flags(&mut self) -> EpFlags;

    fn clear_status_flag(&mut self, flag: EpFlags);

    /// Answers the next token on this endpoint with STALL.
    fn request_stall(&mut self);

    /// Bytes currently in the selected endpoint's bank: received and not yet
    /// read for OUT, written and not yet sent for IN.
    fn bytes_available(&mut self) -> u16;

    /// (Re)configures the endpoint described by `descriptor`, leaving it
    /// selected. Returns `false` if the hardware rejected the configuration.
    fn configure_endpoint(&mut self, descriptor: &UsbEndpointDescriptor) -> bool;

    /// Loads a new device address without using it yet. The status stage of
    /// `SetAddress` still has to go out under the old one.
    fn load_address(&mut self, address: u8);

    /// Starts answering to the address passed to `load_address`.
    fn enable_address(&mut self);
}

/// How long a busy-wait on endpoint flags may spin before giving up.
///
/// On hardware we wait forever: the only way out of a wedged control transfer
/// is the host sending a new SETUP, which the waits notice. Tests use a
/// bounded budget so a bug shows up as an error instead of a hang.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitBudget {
    Unbounded,
    Polls(u32),
}

/// Poll counter for one busy-wait, enforcing a `WaitBudget`.
pub struct Spinner {
    budget: WaitBudget,
    polls: u32,
}

impl Spinner {
    pub fn new(budget: WaitBudget) -> Self {
        Self { budget, polls: 0 }
    }

    /// Accounts for one unsuccessful poll for `mask`.
    pub fn tick(&mut self, mask: EpFlags) -> Result<(), UsbError> {
        if let WaitBudget::Polls(limit) = self.budget {
            self.polls += 1;
            if self.polls >= limit {
                return Err(UsbError::TimedOut { flags: mask.bits() });
            }
        }
        core::hint::spin_loop();
        Ok(())
    }
}

/// Spins on the selected endpoint until any flag in `mask` is set, and returns
/// the flags seen at that moment.
pub fn wait_for(
    ep: &mut impl EndpointAccess,
    mask: EpFlags,
    budget: WaitBudget,
) -> Result<EpFlags, UsbError> {
    let mut spin = Spinner::new(budget);
    loop {
        let flags = ep.status_flags();
        if flags.intersects(mask) {
            return Ok(flags);
        }
        spin.tick(mask)?;
    }
}

/// Copies `bytes` into the selected endpoint's bank.
pub fn write_all(ep: &mut impl EndpointAccess, bytes: &[u8]) {
    for &b in bytes {
        ep.write_byte(b);
    }
}
