// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scripted stand-in for the USB controller, and a pretend host behind it.
//!
//! The fake plays the host's side of each control transfer well enough for
//! the state machine to run unmodified: it delivers queued SETUPs, collects IN
//! packets, and sends the status OUT once a control read's data stage is
//! over. The knobs on it make the host misbehave in the ways a real one can:
//! never sending status, jumping in with a new SETUP partway through, or
//! holding the IN bank.

use std::collections::VecDeque;

use crate::connection::BusPower;
use crate::descriptors::{UsbEndpointDescriptor, EP0_SIZE};
use crate::endpoint::{EndpointAccess, EpFlags};
use crate::relay::SerialSink;

/// Things the fake saw happen, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An IN packet went out on endpoint `.0` with `.1` bytes.
    InPacket(u8, usize),
    /// TX_READY cleared to close a control read after the host's status OUT.
    StatusHandshake,
    Stall(u8),
    AddressLoaded(u8),
    AddressEnabled(u8),
}

/// What the last acknowledged SETUP asked for.
#[derive(Copy, Clone, Debug)]
struct Transfer {
    device_to_host: bool,
    length: u16,
}

#[derive(Default)]
pub struct FakeEndpoints {
    selected: u8,

    pub vbus: bool,
    /// Number of calls to `attach`.
    pub attached: u32,

    setups: VecDeque<[u8; 8]>,
    setup_cursor: usize,
    transfer: Option<Transfer>,
    sent_this_transfer: usize,
    ep0_bank: Vec<u8>,
    ep0_rx_out: bool,
    status_acked: bool,
    ep0_out_data: VecDeque<Vec<u8>>,
    ep0_out_cursor: usize,

    pub ep0_in_packets: Vec<Vec<u8>>,
    pub events: Vec<Event>,

    /// Host never sends the status OUT of a control read.
    pub withhold_status: bool,
    /// Once this many EP0 IN packets have gone out, TX_READY stays low.
    pub withhold_tx_ready_after_packets: Option<usize>,
    /// Once this many EP0 IN packets have gone out, the host sends this SETUP
    /// instead of carrying on. Fires once.
    pub interrupt_after_packets: Option<(usize, [u8; 8])>,
    /// Pretend the EP0 bank holds this many more bytes than we wrote.
    pub bank_overfill: u16,

    pub stalls: Vec<u8>,
    pub loaded_address: Option<u8>,
    pub enabled_address: Option<u8>,
    /// Endpoint addresses passed to `configure_endpoint`, in order.
    pub configured: Vec<u8>,
    /// Endpoint address whose configuration the hardware refuses.
    pub reject_config: Option<u8>,

    bulk_out: VecDeque<Vec<u8>>,
    bulk_out_cursor: usize,
    bulk_in_bank: Vec<u8>,
    /// The bulk IN bank is still owned by the hardware.
    pub bulk_in_busy: bool,
    pub bulk_in_packets: Vec<Vec<u8>>,
}

impl FakeEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_setup(&mut self, setup: [u8; 8]) {
        self.setups.push_back(setup);
    }

    /// Queues one packet for the data stage of the next control write.
    pub fn host_sends_control_data(&mut self, data: &[u8]) {
        self.ep0_out_data.push_back(data.to_vec());
    }

    /// Queues one packet on the bulk OUT endpoint.
    pub fn host_sends_bulk(&mut self, data: &[u8]) {
        self.bulk_out.push_back(data.to_vec());
    }

    fn in_control_write(&self) -> bool {
        matches!(self.transfer, Some(t) if !t.device_to_host)
    }

    fn tx_ready_withheld(&self) -> bool {
        matches!(self.withhold_tx_ready_after_packets, Some(n) if self.ep0_in_packets.len() >= n)
    }

    fn ack_setup(&mut self) {
        if let Some(raw) = self.setups.pop_front() {
            self.transfer = Some(Transfer {
                device_to_host: raw[0] & 0x80 != 0,
                length: u16::from_le_bytes([raw[6], raw[7]]),
            });
        }
        self.setup_cursor = 0;
        self.sent_this_transfer = 0;
        self.status_acked = false;
        self.ep0_rx_out = false;
        self.ep0_bank.clear();
    }

    /// The hardware sends whatever is in the EP0 bank, and the host reacts.
    fn ep0_send(&mut self) {
        if self.status_acked && self.ep0_bank.is_empty() {
            self.status_acked = false;
            self.events.push(Event::StatusHandshake);
            return;
        }

        let packet = core::mem::take(&mut self.ep0_bank);
        let len = packet.len();
        self.events.push(Event::InPacket(0, len));
        self.ep0_in_packets.push(packet);
        self.sent_this_transfer += len;

        if let Some((after, setup)) = self.interrupt_after_packets {
            if self.ep0_in_packets.len() >= after {
                self.interrupt_after_packets = None;
                self.setups.push_back(setup);
                return;
            }
        }

        if let Some(t) = self.transfer {
            let done = len < usize::from(EP0_SIZE) || self.sent_this_transfer >= usize::from(t.length);
            if t.device_to_host && done && !self.withhold_status {
                self.ep0_rx_out = true;
            }
        }
    }

    fn ep0_ack_out(&mut self) {
        if self.in_control_write() && self.ep0_out_data.pop_front().is_some() {
            self.ep0_out_cursor = 0;
        } else if self.ep0_rx_out {
            self.ep0_rx_out = false;
            self.status_acked = true;
        }
    }
}

impl EndpointAccess for FakeEndpoints {
    fn select_endpoint(&mut self, num: u8) {
        self.selected = num;
    }

    fn read_byte(&mut self) -> u8 {
        match self.selected {
            0 => {
                if let Some(raw) = self.setups.front() {
                    let b = raw[self.setup_cursor % 8];
                    self.setup_cursor += 1;
                    b
                } else {
                    let b = self
                        .ep0_out_data
                        .front()
                        .and_then(|p| p.get(self.ep0_out_cursor).copied())
                        .unwrap_or(0);
                    self.ep0_out_cursor += 1;
                    b
                }
            }
            2 => {
                let b = self
                    .bulk_out
                    .front()
                    .and_then(|p| p.get(self.bulk_out_cursor).copied())
                    .unwrap_or(0);
                self.bulk_out_cursor += 1;
                b
            }
            n => panic!("read from endpoint {}", n),
        }
    }

    fn write_byte(&mut self, value: u8) {
        match self.selected {
            0 => self.ep0_bank.push(value),
            1 => self.bulk_in_bank.push(value),
            n => panic!("write to endpoint {}", n),
        }
    }

    fn status_flags(&mut self) -> EpFlags {
        let mut flags = EpFlags::empty();
        match self.selected {
            0 => {
                if !self.setups.is_empty() {
                    flags |= EpFlags::RX_SETUP;
                }
                if !self.tx_ready_withheld() {
                    flags |= EpFlags::TX_READY;
                }
                if self.ep0_rx_out || (self.in_control_write() && !self.ep0_out_data.is_empty()) {
                    flags |= EpFlags::RX_OUT;
                }
            }
            1 => {
                if !self.bulk_in_busy {
                    flags |= EpFlags::TX_READY | EpFlags::FIFO_CONTROL;
                }
            }
            2 => {
                if !self.bulk_out.is_empty() {
                    flags |= EpFlags::RX_OUT | EpFlags::FIFO_CONTROL;
                }
            }
            _ => {}
        }
        flags
    }

    fn clear_status_flag(&mut self, flag: EpFlags) {
        match self.selected {
            0 => {
                if flag.contains(EpFlags::RX_SETUP) {
                    self.ack_setup();
                }
                if flag.contains(EpFlags::RX_OUT) {
                    self.ep0_ack_out();
                }
                if flag.contains(EpFlags::TX_READY) {
                    self.ep0_send();
                }
            }
            1 => {
                if flag.contains(EpFlags::FIFO_CONTROL) {
                    let packet = core::mem::take(&mut self.bulk_in_bank);
                    self.events.push(Event::InPacket(1, packet.len()));
                    self.bulk_in_packets.push(packet);
                }
            }
            2 => {
                if flag.contains(EpFlags::FIFO_CONTROL) && self.bulk_out.pop_front().is_some() {
                    self.bulk_out_cursor = 0;
                }
            }
            _ => {}
        }
    }

    fn request_stall(&mut self) {
        self.stalls.push(self.selected);
        self.events.push(Event::Stall(self.selected));
    }

    fn bytes_available(&mut self) -> u16 {
        let n = match self.selected {
            0 => match self.ep0_out_data.front() {
                Some(p) if self.in_control_write() => p.len().saturating_sub(self.ep0_out_cursor),
                _ => self.ep0_bank.len() + usize::from(self.bank_overfill),
            },
            1 => self.bulk_in_bank.len(),
            2 => self
                .bulk_out
                .front()
                .map_or(0, |p| p.len().saturating_sub(self.bulk_out_cursor)),
            _ => 0,
        };
        n as u16
    }

    fn configure_endpoint(&mut self, descriptor: &UsbEndpointDescriptor) -> bool {
        let address = descriptor.endpoint_address;
        if self.reject_config == Some(address) {
            return false;
        }
        self.configured.push(address);
        self.selected = address & 0x0F;
        true
    }

    fn load_address(&mut self, address: u8) {
        self.loaded_address = Some(address);
        self.events.push(Event::AddressLoaded(address));
    }

    fn enable_address(&mut self) {
        self.enabled_address = self.loaded_address;
        if let Some(a) = self.loaded_address {
            self.events.push(Event::AddressEnabled(a));
        }
    }
}

impl BusPower for FakeEndpoints {
    fn vbus_present(&mut self) -> bool {
        self.vbus
    }

    fn attach(&mut self) {
        self.attached += 1;
    }
}

/// Collects what would have gone out the serial port.
#[derive(Default)]
pub struct VecSink(pub Vec<u8>);

impl SerialSink for VecSink {
    fn write_byte(&mut self, byte: u8) {
        self.0.push(byte);
    }
}
