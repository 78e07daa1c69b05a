// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The EP0 control transfer state machine.
//!
//! A control transfer has up to three stages:
//!
//! 1. SETUP: the host sends 8 bytes saying what it wants.
//! 2. DATA (optional): bytes move in the direction given by the SETUP.
//! 3. STATUS: a zero-length packet in the _opposite_ direction, confirming.
//!
//! For a control read (IN), we send the data, then wait for the host's empty
//! OUT. For a control write (OUT), the host sends any data, then we send an
//! empty IN.
//!
//! The host is allowed to give up on a transfer at any point by sending a new
//! SETUP. Every wait in here watches for that, and bails out with
//! `UsbError::Aborted` without acknowledging the new SETUP, so that the next
//! call to `ControlPipe::service` picks it up and starts over. This is the
//! _only_ way out of a wait on hardware, which is why we don't bother with
//! timeouts there.

use crate::descriptors::{self, EP0_SIZE};
use crate::endpoint::{self, EndpointAccess, EpFlags, Spinner, WaitBudget};
use crate::error::UsbError;
use crate::setup::{RequestKind, UsbDir, UsbSetupPacket};
use crate::standard;
use crate::state::DeviceState;
use crate::vendor;

/// Where we are in the current control transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    /// SETUP read and acknowledged; dispatching.
    ReceivedSetup,
    /// Control read: data sent, waiting for the host's status OUT.
    AwaitingHostAck,
    /// Control write: sending our status IN.
    Completing,
}

/// How a control transfer ended, when it ended normally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlOutcome {
    Completed,
    /// We didn't support the request and told the host so.
    Stalled,
}

/// What a request handler wants sent back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// No data. For a control write that's the normal case; for a control
    /// read it becomes a zero-length data stage.
    Ack,
    /// Fixed bytes, which get truncated to the host's `wLength`.
    Static(&'static [u8]),
    /// A single byte computed on the spot.
    Byte(u8),
}

pub struct ControlPipe {
    budget: WaitBudget,
    stage: Stage,
}

impl ControlPipe {
    pub fn new(budget: WaitBudget) -> Self {
        Self {
            budget,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Handles a control transfer, if EP0 has a SETUP waiting. Blocks until
    /// the transfer finishes or is aborted.
    ///
    /// Returns `Ok(None)` if there was nothing to do.
    pub fn service<E: EndpointAccess>(
        &mut self,
        ep: &mut E,
        dev: &mut DeviceState,
    ) -> Result<Option<ControlOutcome>, UsbError> {
        ep.select_endpoint(0);
        if !ep.status_flags().contains(EpFlags::RX_SETUP) {
            return Ok(None);
        }

        let setup = UsbSetupPacket::read(ep);
        // Acknowledging the SETUP frees the bank for the data stage. Note that
        // we must _not_ touch TX_READY here: clearing it would send an empty
        // packet as our answer.
        ep.clear_status_flag(EpFlags::RX_SETUP);
        self.stage = Stage::ReceivedSetup;
        log::trace!("setup {:02x?}", zerocopy::AsBytes::as_bytes(&setup));

        let result = match setup.direction() {
            UsbDir::In => self.control_read(ep, dev, &setup),
            UsbDir::Out => self.control_write(ep, dev, &setup),
        };
        self.stage = Stage::Idle;

        match result {
            Ok(outcome) => {
                log::debug!("control {:#04x}/{:#04x}: {:?}", setup.request_type, setup.request, outcome);
                Ok(Some(outcome))
            }
            Err(UsbError::Unsupported { request_type, request }) => {
                log::warn!(
                    "stalling request {:#04x} type {:#04x} value {:#06x} length {}",
                    request,
                    request_type,
                    setup.value.get(),
                    setup.length.get(),
                );
                ep.select_endpoint(0);
                ep.request_stall();
                Ok(Some(ControlOutcome::Stalled))
            }
            Err(UsbError::Aborted) => {
                log::debug!("control {:#04x}/{:#04x}: aborted", setup.request_type, setup.request);
                Err(UsbError::Aborted)
            }
            Err(e) => Err(e),
        }
    }

    fn control_read<E: EndpointAccess>(
        &mut self,
        ep: &mut E,
        dev: &mut DeviceState,
        setup: &UsbSetupPacket,
    ) -> Result<ControlOutcome, UsbError> {
        let response = dispatch(ep, dev, setup)?;
        ep.select_endpoint(0);

        let mut one = [0u8];
        let data: &[u8] = match response {
            Response::Ack => &[],
            Response::Static(bytes) => bytes,
            Response::Byte(b) => {
                one[0] = b;
                &one
            }
        };
        self.send(ep, data, setup.length.get())?;

        self.stage = Stage::AwaitingHostAck;
        let flags = endpoint::wait_for(ep, EpFlags::RX_SETUP | EpFlags::RX_OUT, self.budget)?;
        if flags.contains(EpFlags::RX_SETUP) {
            // The host skipped the status stage and moved on. Leave the new
            // SETUP for the next go around.
            return Err(UsbError::Aborted);
        }
        ep.clear_status_flag(EpFlags::RX_OUT);
        ep.clear_status_flag(EpFlags::TX_READY);
        Ok(ControlOutcome::Completed)
    }

    fn control_write<E: EndpointAccess>(
        &mut self,
        ep: &mut E,
        dev: &mut DeviceState,
        setup: &UsbSetupPacket,
    ) -> Result<ControlOutcome, UsbError> {
        // None of the requests we understand carry an OUT data stage, but the
        // host may send one anyway (unknown vendor requests, for example).
        self.drain(ep, setup.length.get())?;

        dispatch(ep, dev, setup)?;
        ep.select_endpoint(0);

        self.stage = Stage::Completing;
        // Zero-length status IN.
        ep.clear_status_flag(EpFlags::TX_READY);

        if let Some(address) = dev.pending_address() {
            // The status packet has to reach the host on the old address,
            // so only switch once the bank is free again.
            let flags = endpoint::wait_for(ep, EpFlags::RX_SETUP | EpFlags::TX_READY, self.budget)?;
            if flags.contains(EpFlags::RX_SETUP) {
                // Status never went out, so the old address stays.
                dev.cancel_pending_address();
                return Err(UsbError::Aborted);
            }
            dev.latch_address();
            ep.enable_address();
            log::info!("address {}", address);
        }
        Ok(ControlOutcome::Completed)
    }

    /// Sends the data stage of a control read: `data`, cut down to `requested`
    /// bytes, in packets of at most `EP0_SIZE`.
    ///
    /// If the host starts the status stage before we're done, we stop and call
    /// it a success. The host got a short answer and it's up to it whether to
    /// try again; there's nothing we can do about it from here.
    pub fn send<E: EndpointAccess>(
        &mut self,
        ep: &mut E,
        data: &[u8],
        requested: u16,
    ) -> Result<(), UsbError> {
        let max = usize::from(EP0_SIZE);
        let total = data.len().min(usize::from(requested));
        let mut sent = 0;
        let mut spin = Spinner::new(self.budget);

        while sent < total {
            let flags = ep.status_flags();
            if flags.contains(EpFlags::RX_SETUP) {
                return Err(UsbError::Aborted);
            }
            if flags.contains(EpFlags::RX_OUT) {
                log::debug!("host ended data stage after {} of {} bytes", sent, total);
                return Ok(());
            }
            if !flags.contains(EpFlags::TX_READY) {
                spin.tick(EpFlags::TX_READY)?;
                continue;
            }

            // The bank should be empty whenever TX_READY is set, but account
            // for whatever is already in it.
            let queued = ep.bytes_available();
            if usize::from(queued) > max {
                return Err(UsbError::EndpointOverrun { count: queued });
            }
            let n = (max - usize::from(queued)).min(total - sent);
            if n == 0 {
                return Err(UsbError::ZeroLengthChunk);
            }

            endpoint::write_all(ep, &data[sent..sent + n]);
            sent += n;
            ep.clear_status_flag(EpFlags::TX_READY);
        }

        // A response that ends exactly on a packet boundary doesn't tell the
        // host it's over, unless it's everything the host asked for. Send an
        // empty packet to say so. (This includes the no-data case.)
        if total < usize::from(requested) && total % max == 0 {
            let flags = endpoint::wait_for(
                ep,
                EpFlags::RX_SETUP | EpFlags::RX_OUT | EpFlags::TX_READY,
                self.budget,
            )?;
            if flags.contains(EpFlags::RX_SETUP) {
                return Err(UsbError::Aborted);
            }
            if !flags.contains(EpFlags::RX_OUT) {
                ep.clear_status_flag(EpFlags::TX_READY);
            }
        }
        Ok(())
    }

    /// Reads and discards the OUT data stage of a control write.
    fn drain<E: EndpointAccess>(&mut self, ep: &mut E, length: u16) -> Result<(), UsbError> {
        let mut received = 0usize;
        while received < usize::from(length) {
            let flags = endpoint::wait_for(ep, EpFlags::RX_SETUP | EpFlags::RX_OUT, self.budget)?;
            if flags.contains(EpFlags::RX_SETUP) {
                return Err(UsbError::Aborted);
            }
            let n = ep.bytes_available();
            for _ in 0..n {
                ep.read_byte();
            }
            ep.clear_status_flag(EpFlags::RX_OUT);
            received += usize::from(n);
            if n < u16::from(EP0_SIZE) {
                break;
            }
        }
        Ok(())
    }
}

/// Routes a request to the vendor shim or the standard dispatcher, based on
/// the kind bits of `bmRequestType`.
fn dispatch<E: EndpointAccess>(
    ep: &mut E,
    dev: &mut DeviceState,
    setup: &UsbSetupPacket,
) -> Result<Response, UsbError> {
    match setup.kind() {
        RequestKind::Vendor => Ok(vendor::handle(setup)),
        _ => standard::handle(ep, dev, setup),
    }
}

/// Sets up EP0. Done at start-up and again after every bus reset, which
/// un-configures all endpoints.
pub fn configure_control_endpoint(ep: &mut impl EndpointAccess) -> Result<(), UsbError> {
    let d = &descriptors::CONTROL_ENDPOINT;
    if !ep.configure_endpoint(d) {
        return Err(UsbError::EndpointConfig { address: d.endpoint_address });
    }
    ep.select_endpoint(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DEVICE_DESCRIPTOR;
    use crate::testing::{Event, FakeEndpoints};
    use zerocopy::AsBytes;

    fn pipe() -> ControlPipe {
        ControlPipe::new(WaitBudget::Polls(100))
    }

    fn get_descriptor(kind: u8, index: u8, length: u16) -> [u8; 8] {
        let [ll, lh] = length.to_le_bytes();
        [0x80, 0x06, index, kind, 0x00, 0x00, ll, lh]
    }

    fn run(ep: &mut FakeEndpoints, dev: &mut DeviceState, setup: [u8; 8]) -> Result<Option<ControlOutcome>, UsbError> {
        ep.queue_setup(setup);
        pipe().service(ep, dev)
    }

    #[test]
    fn nothing_to_do_without_setup() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        assert_eq!(pipe().service(&mut ep, &mut dev), Ok(None));
        assert!(ep.ep0_in_packets.is_empty());
    }

    #[test]
    fn device_descriptor_in_full() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let out = run(&mut ep, &mut dev, get_descriptor(1, 0, 18));
        assert_eq!(out, Ok(Some(ControlOutcome::Completed)));
        assert_eq!(ep.ep0_in_packets.len(), 1);
        let d = &ep.ep0_in_packets[0];
        assert_eq!(d.as_slice(), DEVICE_DESCRIPTOR.as_bytes());
        assert_eq!(d[0], 18);
        assert_eq!(d[1], 0x01);
        assert_eq!(u16::from_le_bytes([d[8], d[9]]), 0x0403);
        assert!(ep.events.contains(&Event::StatusHandshake));
    }

    #[test]
    fn descriptors_truncate_to_requested_length() {
        let all: [(u8, u8); 5] = [(1, 0), (2, 0), (3, 0), (3, 1), (3, 2)];
        for (kind, index) in all {
            let full = descriptors::lookup(kind, index).unwrap();
            for requested in [1u16, 2, 9, 18, 31, 32, 255] {
                let mut ep = FakeEndpoints::new();
                let mut dev = DeviceState::new();
                run(&mut ep, &mut dev, get_descriptor(kind, index, requested)).unwrap();
                let got: Vec<u8> = ep.ep0_in_packets.concat();
                let expect = full.len().min(usize::from(requested));
                assert_eq!(got.len(), expect, "type {} index {} wLength {}", kind, index, requested);
                assert_eq!(&got[..], &full[..expect]);
            }
        }
    }

    #[test]
    fn repeated_requests_give_identical_answers() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        run(&mut ep, &mut dev, get_descriptor(3, 1, 255)).unwrap();
        run(&mut ep, &mut dev, get_descriptor(3, 1, 255)).unwrap();
        run(&mut ep, &mut dev, [0x80, 0x00, 0, 0, 0, 0, 2, 0]).unwrap();
        run(&mut ep, &mut dev, [0x80, 0x00, 0, 0, 0, 0, 2, 0]).unwrap();
        assert_eq!(ep.ep0_in_packets[0], ep.ep0_in_packets[1]);
        assert_eq!(ep.ep0_in_packets[2], [0, 0]);
        assert_eq!(ep.ep0_in_packets[2], ep.ep0_in_packets[3]);
    }

    #[test]
    fn unknown_descriptor_stalls() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let out = run(&mut ep, &mut dev, get_descriptor(3, 9, 255));
        assert_eq!(out, Ok(Some(ControlOutcome::Stalled)));
        assert_eq!(ep.stalls, [0]);
        assert!(ep.ep0_in_packets.is_empty());
    }

    #[test]
    fn set_interface_stalls_without_data() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let out = run(&mut ep, &mut dev, [0x01, 0x0B, 0, 0, 0, 0, 0, 0]);
        assert_eq!(out, Ok(Some(ControlOutcome::Stalled)));
        assert_eq!(ep.stalls, [0]);
        assert!(ep.ep0_in_packets.is_empty());
    }

    #[test]
    fn set_address_switches_after_status() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        run(&mut ep, &mut dev, [0x00, 0x05, 0x2A, 0x00, 0, 0, 0, 0]).unwrap();
        assert_eq!(dev.address(), 0x2A);
        assert_eq!(ep.enabled_address, Some(0x2A));
        // Loaded, then the empty status packet under the old address, then
        // switched.
        let i_load = ep.events.iter().position(|e| *e == Event::AddressLoaded(0x2A)).unwrap();
        let i_zlp = ep.events.iter().position(|e| *e == Event::InPacket(0, 0)).unwrap();
        let i_enable = ep.events.iter().position(|e| *e == Event::AddressEnabled(0x2A)).unwrap();
        assert!(i_load < i_zlp && i_zlp < i_enable);
    }

    #[test]
    fn set_address_is_abandoned_if_host_moves_on() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        ep.interrupt_after_packets = Some((1, get_descriptor(1, 0, 18)));
        ep.withhold_tx_ready_after_packets = Some(1);
        let out = run(&mut ep, &mut dev, [0x00, 0x05, 0x2A, 0x00, 0, 0, 0, 0]);
        assert_eq!(out, Err(UsbError::Aborted));
        assert_eq!(ep.enabled_address, None);
        assert_eq!(dev.address(), 0);
        assert_eq!(dev.pending_address(), None);
    }

    #[test]
    fn set_then_get_configuration() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        run(&mut ep, &mut dev, [0x00, 0x09, 0x01, 0x00, 0, 0, 0, 0]).unwrap();
        run(&mut ep, &mut dev, [0x80, 0x08, 0, 0, 0, 0, 1, 0]).unwrap();
        assert_eq!(ep.ep0_in_packets.last().unwrap(), &[1]);
        assert_eq!(ep.configured, [0x81, 0x02]);
    }

    #[test]
    fn configuration_round_trips_for_any_value() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let set = run(&mut ep, &mut dev, [0x00, 0x09, 0x02, 0x00, 0, 0, 0, 0]);
        assert_eq!(set, Ok(Some(ControlOutcome::Completed)));
        assert!(ep.stalls.is_empty());
        run(&mut ep, &mut dev, [0x80, 0x08, 0, 0, 0, 0, 1, 0]).unwrap();
        assert_eq!(ep.ep0_in_packets.last().unwrap(), &[2]);
        assert_eq!(ep.configured, [0x81, 0x02]);
    }

    #[test]
    fn new_setup_aborts_mid_stream() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let mut p = pipe();
        ep.queue_setup(get_descriptor(2, 0, 200));
        ep.select_endpoint(0);
        ep.clear_status_flag(EpFlags::RX_SETUP);
        ep.interrupt_after_packets = Some((1, get_descriptor(1, 0, 18)));

        let big = [0x55u8; 150];
        assert_eq!(p.send(&mut ep, &big, 200), Err(UsbError::Aborted));
        assert_eq!(ep.ep0_in_packets.len(), 1);
        assert_eq!(ep.ep0_in_packets[0].len(), 64);

        // The new SETUP is still there for the next pass, which runs normally.
        assert_eq!(p.service(&mut ep, &mut dev), Ok(Some(ControlOutcome::Completed)));
        assert_eq!(ep.ep0_in_packets[1], DEVICE_DESCRIPTOR.as_bytes());
        assert_eq!(p.stage(), Stage::Idle);
    }

    #[test]
    fn new_setup_instead_of_status_aborts() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let mut p = pipe();
        ep.interrupt_after_packets = Some((1, [0x80, 0x08, 0, 0, 0, 0, 1, 0]));
        ep.queue_setup(get_descriptor(1, 0, 64));
        assert_eq!(p.service(&mut ep, &mut dev), Err(UsbError::Aborted));
        assert!(ep.stalls.is_empty());
        assert_eq!(p.service(&mut ep, &mut dev), Ok(Some(ControlOutcome::Completed)));
        assert_eq!(ep.ep0_in_packets.last().unwrap(), &[0]);
    }

    #[test]
    fn long_responses_go_out_in_full_packets() {
        let mut ep = FakeEndpoints::new();
        let mut p = pipe();
        ep.queue_setup(get_descriptor(2, 0, 150));
        ep.select_endpoint(0);
        ep.clear_status_flag(EpFlags::RX_SETUP);

        let big: Vec<u8> = (0..150u8).collect();
        p.send(&mut ep, &big, 150).unwrap();
        let sizes: Vec<usize> = ep.ep0_in_packets.iter().map(Vec::len).collect();
        assert_eq!(sizes, [64, 64, 22]);
        assert_eq!(ep.ep0_in_packets.concat(), big);
    }

    #[test]
    fn exact_multiple_of_packet_size_ends_with_empty_packet() {
        let mut ep = FakeEndpoints::new();
        let mut p = pipe();
        ep.queue_setup(get_descriptor(2, 0, 255));
        ep.select_endpoint(0);
        ep.clear_status_flag(EpFlags::RX_SETUP);

        p.send(&mut ep, &[7; 128], 255).unwrap();
        let sizes: Vec<usize> = ep.ep0_in_packets.iter().map(Vec::len).collect();
        assert_eq!(sizes, [64, 64, 0]);
    }

    #[test]
    fn early_status_ends_data_stage_quietly() {
        let mut ep = FakeEndpoints::new();
        let mut p = pipe();
        // The host only wanted 64, but we'll pretend we have more to say.
        ep.queue_setup(get_descriptor(2, 0, 64));
        ep.select_endpoint(0);
        ep.clear_status_flag(EpFlags::RX_SETUP);

        assert_eq!(p.send(&mut ep, &[1; 100], 100), Ok(()));
        assert_eq!(ep.ep0_in_packets.len(), 1);
    }

    #[test]
    fn stuck_host_times_out_under_a_budget() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        ep.withhold_status = true;
        let out = run(&mut ep, &mut dev, get_descriptor(1, 0, 18));
        assert!(matches!(out, Err(UsbError::TimedOut { .. })));
    }

    #[test]
    fn overfull_bank_is_fatal() {
        let mut ep = FakeEndpoints::new();
        let mut p = pipe();
        ep.select_endpoint(0);
        ep.bank_overfill = 65;
        let err = p.send(&mut ep, &[0; 8], 8).unwrap_err();
        assert_eq!(err, UsbError::EndpointOverrun { count: 65 });
        assert!(err.is_fatal());
    }

    #[test]
    fn full_bank_is_fatal() {
        let mut ep = FakeEndpoints::new();
        let mut p = pipe();
        ep.select_endpoint(0);
        ep.bank_overfill = 64;
        assert_eq!(p.send(&mut ep, &[0; 8], 8), Err(UsbError::ZeroLengthChunk));
    }

    #[test]
    fn control_write_data_stage_is_drained() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        // Unknown vendor OUT carrying 3 bytes of data.
        ep.host_sends_control_data(&[1, 2, 3]);
        let out = run(&mut ep, &mut dev, [0x40, 0x7E, 0, 0, 0, 0, 3, 0]);
        assert_eq!(out, Ok(Some(ControlOutcome::Completed)));
        assert_eq!(ep.ep0_in_packets, [Vec::<u8>::new()]);
        assert!(ep.stalls.is_empty());
    }

    #[test]
    fn unknown_vendor_in_gets_empty_data_stage() {
        let mut ep = FakeEndpoints::new();
        let mut dev = DeviceState::new();
        let out = run(&mut ep, &mut dev, [0xC0, 0x7E, 0, 0, 0, 0, 4, 0]);
        assert_eq!(out, Ok(Some(ControlOutcome::Completed)));
        assert!(ep.stalls.is_empty());
        assert_eq!(ep.ep0_in_packets, [Vec::<u8>::new()]);
        assert!(ep.events.contains(&Event::StatusHandshake));
    }

    #[test]
    fn failed_endpoint_configuration_is_fatal() {
        let mut ep = FakeEndpoints::new();
        ep.reject_config = Some(0);
        let err = configure_control_endpoint(&mut ep).unwrap_err();
        assert!(err.is_fatal());
    }
}
