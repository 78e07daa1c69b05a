// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standard (chapter 9) requests.
//!
//! We implement just enough of these for a host to enumerate and configure
//! us. Anything else comes back as `UsbError::Unsupported`, which the control
//! pipe turns into a STALL.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::control::Response;
use crate::descriptors::{self, CONFIGURATION, CONFIGURATION_VALUE};
use crate::endpoint::EndpointAccess;
use crate::error::UsbError;
use crate::setup::{request_type::*, RequestKind, UsbSetupPacket};
use crate::state::DeviceState;

/// The standard request codes, as found in `bRequest`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Status word for `GetStatus`: not self-powered, no remote wakeup, not
/// halted. The same for every recipient.
static NO_STATUS_FLAGS: [u8; 2] = [0, 0];

/// Carries out a standard request.
///
/// Requests are only accepted with the exact `bmRequestType` they're defined
/// with; `SetAddress` sent to an interface, say, is unsupported.
pub fn handle<E: EndpointAccess>(
    ep: &mut E,
    dev: &mut DeviceState,
    setup: &UsbSetupPacket,
) -> Result<Response, UsbError> {
    let unsupported = UsbError::Unsupported {
        request_type: setup.request_type,
        request: setup.request,
    };
    if setup.kind() != RequestKind::Standard {
        return Err(unsupported);
    }
    let request = match StandardRequest::from_u8(setup.request) {
        Some(r) => r,
        None => return Err(unsupported),
    };

    match (request, setup.request_type) {
        (
            StandardRequest::GetStatus,
            STANDARD_IN_DEVICE | STANDARD_IN_INTERFACE | STANDARD_IN_ENDPOINT,
        ) => Ok(Response::Static(&NO_STATUS_FLAGS)),

        // We have no remote wakeup to enable, and EP0 is never halted, so
        // there's nothing for these to do.
        (StandardRequest::SetFeature | StandardRequest::ClearFeature, _) => Ok(Response::Ack),

        (StandardRequest::SetAddress, STANDARD_OUT_DEVICE) => {
            let address = setup.value.get() as u8 & 0x7F;
            dev.set_pending_address(address);
            ep.load_address(address);
            Ok(Response::Ack)
        }

        (StandardRequest::GetDescriptor, STANDARD_IN_DEVICE) => {
            descriptors::lookup(setup.descriptor_type(), setup.descriptor_index())
                .map(Response::Static)
                .ok_or(unsupported)
        }

        (StandardRequest::SetConfiguration, STANDARD_OUT_DEVICE) => {
            set_configuration(ep, dev, setup.value.get() as u8).map(|()| Response::Ack)
        }

        (StandardRequest::GetConfiguration, STANDARD_IN_DEVICE) => {
            Ok(Response::Byte(dev.configuration()))
        }

        // GetInterface, SetInterface, SetDescriptor, SynchFrame, and anything
        // above sent with the wrong request type.
        _ => Err(unsupported),
    }
}

/// Selects configuration `value`. Any non-zero value sets up the bulk
/// endpoints and is remembered as given; zero puts us back in the addressed
/// state.
fn set_configuration<E: EndpointAccess>(
    ep: &mut E,
    dev: &mut DeviceState,
    value: u8,
) -> Result<(), UsbError> {
    if value != 0 {
        if value != CONFIGURATION_VALUE {
            log::warn!("host picked configuration {}, we only describe {}", value, CONFIGURATION_VALUE);
        }
        for d in &CONFIGURATION.endpoints {
            if !ep.configure_endpoint(d) {
                return Err(UsbError::EndpointConfig {
                    address: d.endpoint_address,
                });
            }
        }
    }
    dev.set_configuration(value);
    log::info!("configuration {}", value);
    Ok(())
}
