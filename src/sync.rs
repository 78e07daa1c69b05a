// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two things interrupt handlers are allowed to hand the main loop.
//!
//! Both are single cells behind a critical section. Cortex-M0+ has no
//! compare-and-swap, so "read it and clear it" has to happen with interrupts
//! masked rather than with an atomic swap.

use core::cell::Cell;

use critical_section::Mutex;

/// A one-bit mailbox: raised by an interrupt, consumed by the main loop.
/// Raising it twice before it's consumed is the same as raising it once.
pub struct Latch(Mutex<Cell<bool>>);

impl Latch {
    pub const fn new() -> Self {
        Self(Mutex::new(Cell::new(false)))
    }

    pub fn raise(&self) {
        critical_section::with(|cs| self.0.borrow(cs).set(true));
    }

    /// Returns whether the latch was raised, and lowers it.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.0.borrow(cs).replace(false))
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity-1 byte channel from the serial receive interrupt to the relay.
///
/// Overflow policy is last-write-wins: a byte that arrives before the previous
/// one was taken replaces it. This is the same loss the relay accepts for
/// echoes, and there is nowhere to put a queue's worth of bytes anyway, since
/// the relay sends one byte per bulk packet.
pub struct ByteSlot(Mutex<Cell<Option<u8>>>);

impl ByteSlot {
    pub const fn new() -> Self {
        Self(Mutex::new(Cell::new(None)))
    }

    pub fn put(&self, byte: u8) {
        critical_section::with(|cs| self.0.borrow(cs).set(Some(byte)));
    }

    pub fn take(&self) -> Option<u8> {
        critical_section::with(|cs| self.0.borrow(cs).take())
    }
}

impl Default for ByteSlot {
    fn default() -> Self {
        Self::new()
    }
}
