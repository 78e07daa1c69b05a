// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SETUP packets and the bit-fields packed into them.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::endpoint::EndpointAccess;

/// USB deals in two different transfer directions, called OUT (host-to-device)
/// and IN (device-to-host). In both endpoint addresses and `bmRequestType`,
/// OUT is a clear top bit and IN is `0x80`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Bits 6..5 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Handy `bmRequestType` values. The ones we accept are exact matches, so
/// these get compared against the whole byte.
pub mod request_type {
    pub const STANDARD_OUT_DEVICE: u8 = 0x00;
    pub const STANDARD_IN_DEVICE: u8 = 0x80;
    pub const STANDARD_IN_INTERFACE: u8 = 0x81;
    pub const STANDARD_IN_ENDPOINT: u8 = 0x82;
    pub const VENDOR_OUT_DEVICE: u8 = 0x40;
    pub const VENDOR_IN_DEVICE: u8 = 0xC0;
}

/// Layout of an 8-byte USB SETUP packet.
///
/// One of these is captured at the start of every control transfer and stays
/// put until the next SETUP arrives.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// `bmRequestType`: direction and kind, see the accessors. Recipient is
    /// the low five bits.
    pub request_type: u8,
    /// `bRequest`. Standard values are in `standard::StandardRequest`; vendor
    /// ones in `vendor::VendorRequest`.
    pub request: u8,
    /// Request-specific argument.
    pub value: U16<LittleEndian>,
    /// Request-specific argument; for FTDI requests it selects the port.
    pub index: U16<LittleEndian>,
    /// Number of bytes in the data stage (OUT), or the most the host will
    /// accept (IN).
    pub length: U16<LittleEndian>,
}

impl UsbSetupPacket {
    pub const SIZE: usize = 8;

    /// Pulls a SETUP packet out of the currently selected endpoint's FIFO.
    ///
    /// This doesn't acknowledge the packet; the caller does that once it has
    /// it, so the hardware can reuse the buffer.
    pub fn read(ep: &mut impl EndpointAccess) -> Self {
        let request_type = ep.read_byte();
        let request = ep.read_byte();
        let value = ep.read_word_le();
        let index = ep.read_word_le();
        let length = ep.read_word_le();
        Self {
            request_type,
            request,
            value: U16::new(value),
            index: U16::new(index),
            length: U16::new(length),
        }
    }

    /// Reinterprets 8 raw bytes as a SETUP packet.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        // An 8-byte array is always exactly the right size.
        match Self::read_from(&bytes[..]) {
            Some(p) => p,
            None => unreachable!(),
        }
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    /// Descriptor type, for `GetDescriptor`: the top byte of `value`.
    pub fn descriptor_type(&self) -> u8 {
        (self.value.get() >> 8) as u8
    }

    /// Descriptor index, for `GetDescriptor`: the bottom byte of `value`.
    pub fn descriptor_index(&self) -> u8 {
        self.value.get() as u8
    }
}
