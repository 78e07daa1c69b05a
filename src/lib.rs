// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FT232-style USB serial bridge, device side.
//!
//! This crate makes a microcontroller's USB device peripheral look enough like
//! an FTDI FT232 that the stock host drivers for that chip bind to it,
//! configure it, and then trade bytes with it over two bulk endpoints.
//!
//! The protocol engine lives here and is written against a small trait,
//! [`endpoint::EndpointAccess`], that models the kind of "selected endpoint"
//! register window found on many USB device controllers: you pick an
//! endpoint, then read and write its FIFO and its status flags. The firmware
//! binary (`src/main.rs`) provides an implementation of that trait for the
//! RP2040; the tests in this crate provide a scripted fake.
//!
//! Reading order, if you're new here:
//!
//! - `descriptors` -- the bytes we hand the host to describe ourselves.
//! - `setup` -- decoding the 8-byte SETUP packet.
//! - `control` -- the EP0 state machine that drives every control transfer.
//! - `standard` and `vendor` -- what we actually do for each request.
//! - `relay` -- moving serial bytes across the bulk endpoints.
//! - `connection` -- tracking whether we're plugged in.
//!
//! The whole thing runs from a single polling loop, see [`Bridge::poll`].

#![cfg_attr(not(test), no_std)]

pub mod connection;
pub mod control;
pub mod descriptors;
pub mod endpoint;
pub mod error;
pub mod relay;
pub mod setup;
pub mod standard;
pub mod state;
pub mod sync;
pub mod vendor;

#[cfg(test)]
mod testing;

use connection::{BusPower, Connection};
use control::ControlPipe;
use endpoint::{EndpointAccess, WaitBudget};
use error::UsbError;
use relay::{Relay, SerialSink};
use state::DeviceState;
use sync::{ByteSlot, Latch};

/// Everything the main loop needs, bundled so that `main` can be one `loop`.
///
/// `Bridge` owns the device state outright. Interrupt handlers never touch it;
/// they only poke the `Latch` and `ByteSlot` statics that get passed into
/// [`Bridge::poll`], and the main loop picks those up at a well-defined point.
pub struct Bridge<E> {
    pub endpoints: E,
    pub device: DeviceState,
    pub connection: Connection,
    control: ControlPipe,
    relay: Relay,
}

impl<E: EndpointAccess + BusPower> Bridge<E> {
    pub fn new(endpoints: E, budget: WaitBudget) -> Self {
        Self {
            endpoints,
            device: DeviceState::new(),
            connection: Connection::new(),
            control: ControlPipe::new(budget),
            relay: Relay::new(),
        }
    }

    /// Configures the control endpoint. Call once before the first `poll`.
    pub fn start(&mut self) -> Result<(), UsbError> {
        control::configure_control_endpoint(&mut self.endpoints)
    }

    /// One trip around the main loop: bus reset bookkeeping, connection
    /// tracking, then control, bulk OUT and bulk IN, strictly in that order.
    ///
    /// Aborted and unsupported control transfers are handled inside; the only
    /// errors that escape are the ones that leave the protocol state
    /// unrecoverable (and, in tests, an exhausted wait budget).
    pub fn poll(
        &mut self,
        bus_reset: &Latch,
        serial_rx: &ByteSlot,
        serial_tx: &mut impl SerialSink,
    ) -> Result<(), UsbError> {
        if bus_reset.take() {
            log::info!("bus reset");
            self.device.reset();
            self.relay.reset();
            control::configure_control_endpoint(&mut self.endpoints)?;
        }

        self.connection.poll(&mut self.endpoints);

        match self.control.service(&mut self.endpoints, &mut self.device) {
            Ok(_) | Err(UsbError::Aborted) => {}
            Err(e) => return Err(e),
        }

        self.relay.receive(&mut self.endpoints, serial_tx);
        if let Some(b) = serial_rx.take() {
            self.relay.offer_serial(b);
        }
        self.relay.transmit(&mut self.endpoints);
        Ok(())
    }
}
