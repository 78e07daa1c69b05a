// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serial data over the bulk endpoints.
//!
//! This is deliberately tiny. Each pass of the main loop drains at most one
//! packet from the host and sends at most one packet to it, and there is room
//! for exactly one thing waiting to go out. What goes out:
//!
//! - the banner, if the host sent the trigger byte;
//! - otherwise an echo of the last byte the host sent;
//! - otherwise the last byte the serial port received.
//!
//! Bytes from the host also go straight out the serial port.
//!
//! Anything that doesn't fit is dropped: if the host sends "xyz" in one
//! packet, only 'z' is echoed. Likewise a banner that hasn't gone out yet
//! swallows every echo after it, so "aq" in one packet gets just the banner.
//! That's an accepted limitation, not a bug.
//!
//! Every packet to the host starts with the two status bytes the FTDI driver
//! strips off (modem status, then line status), so a one-byte echo is a
//! three-byte packet.

use crate::descriptors::{BULK_IN_ADDR, BULK_OUT_ADDR};
use crate::endpoint::{self, EndpointAccess, EpFlags};

/// Byte that makes us send the banner instead of an echo.
pub const TRIGGER: u8 = b'a';
pub const BANNER: &[u8] = b"Hello world!\r\n";

/// Modem status (bit 7 is always set on this chip family, nothing else is
/// asserted) and line status (no errors).
pub const STATUS_PREFIX: [u8; 2] = [0x80, 0x00];

/// Where serial bytes from the host end up.
pub trait SerialSink {
    fn write_byte(&mut self, byte: u8);
}

/// The single outbound slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    None,
    Echo(u8),
    Banner,
}

pub struct Relay {
    pending: Outbound,
    /// Byte from the serial port waiting to go to the host. Lower priority
    /// than `pending`.
    from_serial: Option<u8>,
    last_received: Option<u8>,
}

impl Relay {
    pub const fn new() -> Self {
        Self {
            pending: Outbound::None,
            from_serial: None,
            last_received: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn pending(&self) -> Outbound {
        self.pending
    }

    pub fn last_received(&self) -> Option<u8> {
        self.last_received
    }

    /// Takes a packet from the bulk OUT endpoint, if the host sent one.
    pub fn receive(&mut self, ep: &mut impl EndpointAccess, sink: &mut impl SerialSink) {
        ep.select_endpoint(BULK_OUT_ADDR & 0x0F);
        if !ep.status_flags().contains(EpFlags::RX_OUT) {
            return;
        }
        ep.clear_status_flag(EpFlags::RX_OUT);

        let n = ep.bytes_available();
        for _ in 0..n {
            let b = ep.read_byte();
            sink.write_byte(b);
            self.accept(b);
        }
        // Hand the bank back for the next packet.
        ep.clear_status_flag(EpFlags::FIFO_CONTROL);
        log::trace!("bulk out: {} bytes", n);
    }

    /// Queues a byte from the serial port for the host. A byte that hasn't
    /// gone out yet is replaced.
    pub fn offer_serial(&mut self, byte: u8) {
        self.from_serial = Some(byte);
    }

    /// Sends the waiting item, if there is one and the IN bank is free. If the
    /// bank is busy the item stays put for the next pass.
    pub fn transmit(&mut self, ep: &mut impl EndpointAccess) {
        let mut one = [0u8];
        let payload: &[u8] = match (self.pending, self.from_serial) {
            (Outbound::Banner, _) => BANNER,
            (Outbound::Echo(b), _) | (Outbound::None, Some(b)) => {
                one[0] = b;
                &one
            }
            (Outbound::None, None) => return,
        };

        ep.select_endpoint(BULK_IN_ADDR & 0x0F);
        if !ep.status_flags().contains(EpFlags::TX_READY) {
            return;
        }
        ep.clear_status_flag(EpFlags::TX_READY);
        endpoint::write_all(ep, &STATUS_PREFIX);
        endpoint::write_all(ep, payload);
        ep.clear_status_flag(EpFlags::FIFO_CONTROL);
        log::trace!("bulk in: {:?}", self.pending);

        if self.pending == Outbound::None {
            self.from_serial = None;
        } else {
            self.pending = Outbound::None;
        }
    }

    fn accept(&mut self, b: u8) {
        self.last_received = Some(b);
        self.pending = match (self.pending, b) {
            (_, TRIGGER) => Outbound::Banner,
            // A banner that hasn't gone out yet wins over later echoes.
            (Outbound::Banner, _) => Outbound::Banner,
            (_, b) => Outbound::Echo(b),
        };
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
