// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB descriptors for the emulated FT232.
//!
//! Everything here is a `static`, laid out byte-for-byte the way it goes on
//! the wire, so serving a descriptor is just a matter of handing out a slice
//! of it. The layouts are `#[repr(C)]` structs built only from `u8`s and
//! unaligned little-endian `U16`s, which `zerocopy` lets us view as bytes.
//!
//! The identity we claim is FTDI's (VID 0x0403, PID 0x6001, bcdDevice 0x0400,
//! which is what an FT232BM reports). One deliberate difference: the real chip
//! has an 8-byte EP0, we use 64 so that no descriptor ever needs more than one
//! packet.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, U16};

use crate::setup::UsbDir;

/// Maximum packet size on the control endpoint.
pub const EP0_SIZE: u8 = 64;
/// Maximum packet size on both bulk endpoints.
pub const BULK_PACKET_SIZE: u16 = 64;

/// FTDI's vendor ID.
pub const VENDOR_ID: u16 = 0x0403;
/// FT232 product ID.
pub const PRODUCT_ID: u16 = 0x6001;
/// Device release, as BCD. 0x0400 is what the FT232BM reports, and the host
/// driver uses it to pick the chip type.
pub const DEVICE_RELEASE: u16 = 0x0400;

/// Device-to-host serial data.
pub const BULK_IN_ADDR: u8 = UsbDir::In.endpoint(1);
/// Host-to-device serial data.
pub const BULK_OUT_ADDR: u8 = UsbDir::Out.endpoint(2);

/// Value the host passes to `SetConfiguration` to select our only
/// configuration.
pub const CONFIGURATION_VALUE: u8 = 1;

const PRODUCT: &str = "USB <-> Serial";
const SERIAL_NUMBER: &str = "FTP1W65N";

/// String descriptor indices, as referenced from the device descriptor.
pub const PRODUCT_STRING_INDEX: u8 = 1;
pub const SERIAL_STRING_INDEX: u8 = 2;

/// The device descriptor. The host asks for this first.
pub static DEVICE_DESCRIPTOR: UsbDeviceDescriptor = UsbDeviceDescriptor {
    length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
    descriptor_type: UsbDescType::Device,
    bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0110)),
    // Class, subclass and protocol are all deferred to the interface.
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_SIZE,
    vendor: U16::from_bytes(u16::to_le_bytes(VENDOR_ID)),
    product: U16::from_bytes(u16::to_le_bytes(PRODUCT_ID)),
    bcd_device: U16::from_bytes(u16::to_le_bytes(DEVICE_RELEASE)),
    manufacturer_s: 0,
    product_s: PRODUCT_STRING_INDEX,
    serial_s: SERIAL_STRING_INDEX,
    num_configurations: 1,
};

/// Our single configuration, together with the interface and endpoint
/// descriptors that the host gets back with it.
pub static CONFIGURATION: UsbConfigurationBundle = UsbConfigurationBundle {
    config: UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: U16::from_bytes(u16::to_le_bytes(
            core::mem::size_of::<UsbConfigurationBundle>() as u16,
        )),
        num_interfaces: 1,
        configuration_value: CONFIGURATION_VALUE,
        configuration_s: 0,
        // Bus powered, no remote wakeup.
        attributes: 0x80,
        // 20 mA, in units of 2 mA.
        max_power: 20 / 2,
    },
    interface: UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: 0xFF,
        interface_subclass: 0xFF,
        interface_protocol: 0xFF,
        interface_s: 0,
    },
    endpoints: [
        bulk_endpoint(BULK_IN_ADDR),
        bulk_endpoint(BULK_OUT_ADDR),
    ],
};

/// Language table: a single entry, US English.
pub static LANGUAGE_DESCRIPTOR: [u8; 4] = [4, UsbDescType::String as u8, 0x09, 0x04];
static PRODUCT_DESCRIPTOR: [u8; 2 + 2 * PRODUCT.len()] = string_descriptor(PRODUCT);
static SERIAL_DESCRIPTOR: [u8; 2 + 2 * SERIAL_NUMBER.len()] = string_descriptor(SERIAL_NUMBER);

/// String descriptors, indexed by string index. Index 0 is the language table.
pub static STRINGS: [&[u8]; 3] = [
    &LANGUAGE_DESCRIPTOR,
    &PRODUCT_DESCRIPTOR,
    &SERIAL_DESCRIPTOR,
];

/// The EP0 descriptor. Never sent to the host (EP0 is implied) but it's what
/// the endpoint layer is configured from.
pub static CONTROL_ENDPOINT: UsbEndpointDescriptor = UsbEndpointDescriptor {
    length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
    descriptor_type: UsbDescType::Endpoint,
    endpoint_address: 0,
    attributes: UsbTransferType::Control as u8,
    max_packet_size: U16::from_bytes(u16::to_le_bytes(EP0_SIZE as u16)),
    interval: 0,
};

/// Finds the descriptor the host asked for in a `GetDescriptor` request.
///
/// Returns the full native encoding; truncating it to the host's `wLength` is
/// the caller's business. Unknown types or out-of-range indices give `None`.
pub fn lookup(descriptor_type: u8, index: u8) -> Option<&'static [u8]> {
    match UsbDescType::from_u8(descriptor_type)? {
        UsbDescType::Device if index == 0 => Some(DEVICE_DESCRIPTOR.as_bytes()),
        UsbDescType::Config if index == 0 => Some(CONFIGURATION.as_bytes()),
        UsbDescType::String => STRINGS.get(usize::from(index)).copied(),
        _ => None,
    }
}

const fn bulk_endpoint(endpoint_address: u8) -> UsbEndpointDescriptor {
    UsbEndpointDescriptor {
        length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
        descriptor_type: UsbDescType::Endpoint,
        endpoint_address,
        attributes: UsbTransferType::Bulk as u8,
        max_packet_size: U16::from_bytes(u16::to_le_bytes(BULK_PACKET_SIZE)),
        interval: 0,
    }
}

/// Encodes an ASCII string as a string descriptor (UTF-16LE, length-prefixed).
///
/// `N` has to come out to `2 + 2 * s.len()`; getting it wrong fails the build.
const fn string_descriptor<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    assert!(N == 2 + 2 * bytes.len());
    assert!(N <= u8::MAX as usize);

    let mut out = [0; N];
    out[0] = N as u8;
    out[1] = UsbDescType::String as u8;
    let mut i = 0;
    while i < bytes.len() {
        assert!(bytes[i].is_ascii());
        out[2 + 2 * i] = bytes[i];
        i += 1;
    }
    out
}

/// Describes a device. This is the most broad description in USB and is
/// typically the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    /// Length of this structure, must be 18.
    pub length: u8,
    /// Must be `Device`.
    pub descriptor_type: UsbDescType,
    /// USB version, in binary-coded decimal.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Maximum packet size on EP0.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Device version number, as BCD again.
    pub bcd_device: U16<LittleEndian>,
    /// String indices; zero means "no string".
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Description of a single available device configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Must be `Config`.
    pub descriptor_type: UsbDescType,
    /// Total length of this descriptor plus everything the host gets along
    /// with it (interfaces and their endpoints).
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Number to use when requesting this configuration via a
    /// `SetConfiguration` request.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 must be set; bit 6 is self-powered; bit 5 is remote wakeup.
    pub attributes: u8,
    /// Maximum device power consumption in units of 2mA.
    pub max_power: u8,
}

/// Description of an interface within a configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Must be `Interface`.
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    pub alternate_setting: u8,
    /// Number of endpoint descriptors following this one.
    pub num_endpoints: u8,
    /// 0xFF all round: vendor specific.
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// Describes an endpoint within an interface.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    /// Length of this struct, must be 7.
    pub length: u8,
    /// Must be `Endpoint`.
    pub descriptor_type: UsbDescType,
    /// Bottom 4 bits are the endpoint number, top bit is the direction.
    pub endpoint_address: u8,
    /// Bottom 2 bits hold a `UsbTransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval; meaningless for bulk and control.
    pub interval: u8,
}

/// The configuration descriptor exactly as the host receives it: the
/// configuration, then the interface, then that interface's endpoints.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationBundle {
    pub config: UsbConfigurationDescriptor,
    pub interface: UsbInterfaceDescriptor,
    pub endpoints: [UsbEndpointDescriptor; 2],
}

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Types of transfer that can be indicated by the `attributes` field on
/// `UsbEndpointDescriptor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Bulk = 2,
}

impl UsbEndpointDescriptor {
    pub fn transfer_type(&self) -> Option<UsbTransferType> {
        UsbTransferType::from_u8(self.attributes & 0b11)
    }

    pub fn number(&self) -> u8 {
        self.endpoint_address & 0x0F
    }

    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.endpoint_address)
    }
}
