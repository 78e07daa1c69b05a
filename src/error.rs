// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use snafu::Snafu;

/// Ways a control transfer, or the device as a whole, can go wrong.
///
/// Only some of these are really errors. `Unsupported` is how we tell the host
/// "no" (it turns into a STALL), and `Aborted` is what happens whenever the
/// host changes its mind mid-transfer. The fatal ones mean the peripheral and
/// our idea of it have drifted apart, and there is no way to resynchronize.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Snafu)]
pub enum UsbError {
    #[snafu(display("unsupported request {request:#04x} (type {request_type:#04x})"))]
    Unsupported { request_type: u8, request: u8 },

    #[snafu(display("transfer aborted by a new SETUP"))]
    Aborted,

    #[snafu(display("endpoint bank holds {count} bytes, more than fits"))]
    EndpointOverrun { count: u16 },

    #[snafu(display("endpoint has no room for the next chunk"))]
    ZeroLengthChunk,

    #[snafu(display("hardware rejected configuration of endpoint {address:#04x}"))]
    EndpointConfig { address: u8 },

    #[snafu(display("gave up waiting for endpoint flags {flags:#04x}"))]
    TimedOut { flags: u8 },
}

impl UsbError {
    /// Fatal errors leave the protocol state unrecoverable; the firmware logs
    /// them and parks.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EndpointOverrun { .. } | Self::ZeroLengthChunk | Self::EndpointConfig { .. }
        )
    }
}
