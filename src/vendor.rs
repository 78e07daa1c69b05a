// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FTDI "SIO" vendor requests.
//!
//! The host driver pokes at the chip with these while opening the port:
//! resets, baud rate, line settings, flow control, latency timer, EEPROM reads.
//! We don't drive a real UART from any of it. Setters are accepted and
//! forgotten; getters answer with what an idle, factory-fresh FT232 would say.
//!
//! Unknown vendor requests are acknowledged rather than stalled. Drivers for
//! this chip family check for optional features and expect to be ignored, not
//! rejected, by chips that don't have them.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::control::Response;
use crate::setup::{request_type::*, UsbDir, UsbSetupPacket};

/// Latency timer the driver reads back, in milliseconds. 16 is the FT232's
/// power-on default.
pub const DEFAULT_LATENCY_MS: u8 = 16;

/// Modem status with nothing asserted.
pub const MODEM_STATUS_IDLE: u8 = 0x00;

/// What an erased EEPROM word reads as.
pub static ERASED_EEPROM_WORD: [u8; 2] = [0xFF, 0xFF];

/// The vendor requests we recognize, by `bRequest`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum VendorRequest {
    Reset = 0x00,
    ModemCtrl = 0x01,
    SetFlowCtrl = 0x02,
    SetBaudRate = 0x03,
    /// Data bits, parity, stop bits, break.
    SetData = 0x04,
    GetModemStatus = 0x05,
    SetLatencyTimer = 0x09,
    GetLatencyTimer = 0x0A,
    ReadEeprom = 0x90,
}

impl VendorRequest {
    pub fn direction(self) -> UsbDir {
        match self {
            Self::GetModemStatus | Self::GetLatencyTimer | Self::ReadEeprom => UsbDir::In,
            _ => UsbDir::Out,
        }
    }

    fn request_type(self) -> u8 {
        match self.direction() {
            UsbDir::In => VENDOR_IN_DEVICE,
            UsbDir::Out => VENDOR_OUT_DEVICE,
        }
    }

    /// The canned answer to this request.
    pub fn response(self) -> Response {
        match self {
            Self::ReadEeprom => Response::Static(&ERASED_EEPROM_WORD),
            Self::GetLatencyTimer => Response::Byte(DEFAULT_LATENCY_MS),
            Self::GetModemStatus => Response::Byte(MODEM_STATUS_IDLE),
            Self::Reset
            | Self::ModemCtrl
            | Self::SetFlowCtrl
            | Self::SetBaudRate
            | Self::SetData
            | Self::SetLatencyTimer => Response::Ack,
        }
    }
}

/// Answers a vendor request. Never fails; see the module docs.
pub fn handle(setup: &UsbSetupPacket) -> Response {
    match VendorRequest::from_u8(setup.request) {
        Some(req) if setup.request_type == req.request_type() => {
            log::trace!("vendor {:?} value {:#06x}", req, setup.value.get());
            req.response()
        }
        _ => {
            log::warn!(
                "ignoring vendor request {:#04x} type {:#04x} value {:#06x} length {}",
                setup.request,
                setup.request_type,
                setup.value.get(),
                setup.length.get(),
            );
            Response::Ack
        }
    }
}
