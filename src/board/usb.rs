// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RP2040 USB controller, dressed up as a selected-endpoint register
//! window.
//!
//! The RP2040 doesn't work like that natively. Each endpoint direction has a
//! 64-byte data buffer in the controller's dual-port RAM (DPRAM) and a
//! "buffer control" word saying who owns the buffer (the AVAILABLE bit: set
//! means the controller has it), whether it's full, its length, and which
//! DATA PID to use. We give a buffer to the controller to send or receive, and
//! it gives it back when the transaction is done.
//!
//! The flags map onto that like so:
//!
//! - TX_READY: the endpoint's IN buffer is ours.
//! - RX_OUT: the OUT buffer is back from the controller, with data in it.
//! - RX_SETUP: the SIE_STATUS.SETUP_REC bit.
//! - FIFO_CONTROL: on bulk endpoints, same as TX_READY or RX_OUT; clearing it
//!   hands the buffer back to the controller.
//!
//! We never touch these buffers from an interrupt handler, so everything
//! lives in plain fields here.

use rp2040_pac::{RESETS, USBCTRL_DPRAM, USBCTRL_REGS};

use ft232_emu::connection::BusPower;
use ft232_emu::descriptors::{UsbEndpointDescriptor, BULK_IN_ADDR, BULK_OUT_ADDR, EP0_SIZE};
use ft232_emu::endpoint::{EndpointAccess, EpFlags};
use ft232_emu::setup::UsbDir;

use super::{lower_pin, pulse_pin, BUFF_PIN, FORCE_VBUS, RESET_PIN, SETUP_PIN};

/// Every buffer is one max-size packet.
const BUFFER_SIZE: usize = 64;

/// Where one endpoint direction lives in DPRAM.
struct Slot {
    address: u8,
    /// Index into `ep_control`. EP0 has none; it's always on.
    control_index: Option<usize>,
    buffer_control_index: usize,
    /// Data buffer, as an offset from the start of DPRAM.
    buffer_offset: usize,
}

const EP0_IN: usize = 0;
const EP0_OUT: usize = 1;

/// EP0 IN and OUT share the fixed buffer at 0x100. Control and buffer
/// control registers for endpoint N live at index `2 * (N - 1) + out` and
/// `2 * N + out` respectively.
static SLOTS: [Slot; 4] = [
    Slot {
        address: UsbDir::In.endpoint(0),
        control_index: None,
        buffer_control_index: 0,
        buffer_offset: 0x100,
    },
    Slot {
        address: UsbDir::Out.endpoint(0),
        control_index: None,
        buffer_control_index: 1,
        buffer_offset: 0x100,
    },
    Slot {
        address: BULK_IN_ADDR,
        control_index: Some(0),
        buffer_control_index: 2,
        buffer_offset: 0x180,
    },
    Slot {
        address: BULK_OUT_ADDR,
        control_index: Some(3),
        buffer_control_index: 5,
        buffer_offset: 0x1C0,
    },
];

/// Our side of one buffer.
#[derive(Copy, Clone, Default)]
struct Cursor {
    /// PID for the next packet. Every buffer handed over flips it.
    next_pid_1: bool,
    /// Read or write position in the buffer.
    pos: usize,
}

pub struct Rp2040Endpoints {
    regs: USBCTRL_REGS,
    dpram: USBCTRL_DPRAM,
    selected: u8,
    cursors: [Cursor; 4],
    setup_cursor: usize,
    /// The EP0 OUT we last acknowledged was empty, i.e. the status stage of a
    /// control read. Clearing TX_READY after that closes the transfer
    /// without sending anything.
    status_received: bool,
    address: u8,
}

impl Rp2040Endpoints {
    /// Brings the controller out of reset and into device mode, not yet
    /// connected to the bus. USB clock must already be running at 48 MHz.
    pub fn bring_up(resets: &RESETS, regs: USBCTRL_REGS, dpram: USBCTRL_DPRAM) -> Self {
        resets.reset.modify(|_, w| w.usbctrl().set_bit());
        resets.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !resets.reset_done.read().usbctrl().bit() {}

        // Clear the control portion of DPRAM. The datasheet is vague on
        // whether this is needed; the SDK does it.
        dpram.setup_packet_low.write(|w| unsafe { w.bits(0) });
        dpram.setup_packet_high.write(|w| unsafe { w.bits(0) });
        for epc in &dpram.ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &dpram.ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        // Onboard PHY.
        regs.usb_muxing.write(|w| w.to_phy().set_bit().softcon().set_bit());

        if FORCE_VBUS {
            regs.usb_pwr.write(|w| {
                w.vbus_detect().set_bit()
                    .vbus_detect_override_en().set_bit()
            });
        }

        regs.main_ctrl.write(|w| {
            w.controller_en().set_bit()
                .host_ndevice().clear_bit()
        });

        // Only bus reset interrupts. Everything else is polled.
        regs.inte.write(|w| w.bus_reset().set_bit());

        Self {
            regs,
            dpram,
            selected: 0,
            cursors: [Cursor::default(); 4],
            setup_cursor: 0,
            status_received: false,
            address: 0,
        }
    }

    fn dpram_byte(offset: usize) -> *mut u8 {
        (USBCTRL_DPRAM::ptr() as *mut u8).wrapping_add(offset)
    }

    /// The slot the selected endpoint uses in direction `dir`, if any.
    fn slot(&self, dir: UsbDir) -> Option<usize> {
        let address = dir.endpoint(self.selected);
        SLOTS.iter().position(|s| s.address == address)
    }

    /// The controller is done with a buffer we gave it, or we never did.
    fn is_ours(&self, slot: usize) -> bool {
        let bc = self.dpram.ep_buffer_control[SLOTS[slot].buffer_control_index].read();
        !bc.available_0().bit()
    }

    /// An OUT buffer came back with a packet in it.
    fn has_packet(&self, slot: usize) -> bool {
        let bc = self.dpram.ep_buffer_control[SLOTS[slot].buffer_control_index].read();
        bc.full_0().bit() && !bc.available_0().bit()
    }

    fn received_len(&self, slot: usize) -> usize {
        let bc = self.dpram.ep_buffer_control[SLOTS[slot].buffer_control_index].read();
        usize::from(bc.length_0().bits())
    }

    /// Gives the buffer of `slot` to the controller: to send `len` bytes on an
    /// IN endpoint, or to receive up to `len` on an OUT one.
    fn hand_over(&mut self, slot: usize, len: usize) {
        let full = UsbDir::of_endpoint_addr(SLOTS[slot].address) == UsbDir::In;
        let pid = self.cursors[slot].next_pid_1;
        self.dpram.ep_buffer_control[SLOTS[slot].buffer_control_index].write(|w| unsafe {
            w.pid_0().bit(pid)
                .full_0().bit(full)
                .available_0().set_bit()
                .length_0().bits(len as u16)
        });
        self.cursors[slot] = Cursor {
            next_pid_1: !pid,
            pos: 0,
        };
        pulse_pin(BUFF_PIN);
    }

    /// Takes a buffer back without the controller's say-so. Also clears a
    /// STALL.
    fn revoke(&mut self, slot: usize) {
        self.dpram.ep_buffer_control[SLOTS[slot].buffer_control_index]
            .write(|w| unsafe { w.bits(0) });
    }

    fn acknowledge_setup(&mut self) {
        self.regs.sie_status.write(|w| w.setup_rec().set_bit());
        self.setup_cursor = 0;
        self.status_received = false;
        self.revoke(EP0_IN);
        self.revoke(EP0_OUT);
        // Everything after a SETUP starts at DATA1, in both directions.
        self.cursors[EP0_IN] = Cursor {
            next_pid_1: true,
            pos: 0,
        };
        self.cursors[EP0_OUT] = self.cursors[EP0_IN];
        // Be ready for the host's OUT, be it data or status.
        self.hand_over(EP0_OUT, usize::from(EP0_SIZE));
        pulse_pin(SETUP_PIN);
    }
}

impl EndpointAccess for Rp2040Endpoints {
    fn select_endpoint(&mut self, num: u8) {
        self.selected = num & 0x0F;
    }

    fn read_byte(&mut self) -> u8 {
        if self.selected == 0 && self.regs.sie_status.read().setup_rec().bit() {
            // The SETUP packet sits in the first 8 bytes of DPRAM.
            let i = self.setup_cursor % 8;
            self.setup_cursor += 1;
            return unsafe { Self::dpram_byte(i).read_volatile() };
        }
        let slot = match self.slot(UsbDir::Out) {
            Some(s) => s,
            None => return 0,
        };
        let pos = self.cursors[slot].pos;
        self.cursors[slot].pos += 1;
        if pos < BUFFER_SIZE {
            // Safety: in bounds of our slot's buffer, which the controller
            // has handed back to us.
            unsafe { Self::dpram_byte(SLOTS[slot].buffer_offset + pos).read_volatile() }
        } else {
            0
        }
    }

    fn write_byte(&mut self, value: u8) {
        let slot = match self.slot(UsbDir::In) {
            Some(s) => s,
            None => return,
        };
        let pos = self.cursors[slot].pos;
        // Keep counting past the end so that `bytes_available` shows the
        // overrun, but don't write past the buffer.
        self.cursors[slot].pos += 1;
        if pos < BUFFER_SIZE {
            unsafe { Self::dpram_byte(SLOTS[slot].buffer_offset + pos).write_volatile(value) }
        }
    }

    fn status_flags(&mut self) -> EpFlags {
        let mut flags = EpFlags::empty();
        let bulk = self.selected != 0;
        if !bulk && self.regs.sie_status.read().setup_rec().bit() {
            flags |= EpFlags::RX_SETUP;
        }
        if let Some(s) = self.slot(UsbDir::In) {
            if self.is_ours(s) {
                flags |= EpFlags::TX_READY;
                if bulk {
                    flags |= EpFlags::FIFO_CONTROL;
                }
            }
        }
        if let Some(s) = self.slot(UsbDir::Out) {
            if self.has_packet(s) {
                flags |= EpFlags::RX_OUT;
                if bulk {
                    flags |= EpFlags::FIFO_CONTROL;
                }
            }
        }
        flags
    }

    fn clear_status_flag(&mut self, flag: EpFlags) {
        if flag.contains(EpFlags::RX_SETUP) && self.selected == 0 {
            self.acknowledge_setup();
        }
        if flag.contains(EpFlags::RX_OUT) && self.selected == 0 {
            self.status_received = self.received_len(EP0_OUT) == 0;
            self.hand_over(EP0_OUT, usize::from(EP0_SIZE));
        }
        if flag.contains(EpFlags::TX_READY) {
            match self.slot(UsbDir::In) {
                Some(EP0_IN) if self.status_received => self.status_received = false,
                Some(EP0_IN) => {
                    let len = self.cursors[EP0_IN].pos.min(BUFFER_SIZE);
                    self.hand_over(EP0_IN, len);
                }
                // Claiming a bulk IN buffer; fill from the top.
                Some(s) => self.cursors[s].pos = 0,
                None => {}
            }
        }
        if flag.contains(EpFlags::FIFO_CONTROL) && self.selected != 0 {
            if let Some(s) = self.slot(UsbDir::In) {
                let len = self.cursors[s].pos.min(BUFFER_SIZE);
                self.hand_over(s, len);
            } else if let Some(s) = self.slot(UsbDir::Out) {
                self.hand_over(s, BUFFER_SIZE);
            }
        }
    }

    fn request_stall(&mut self) {
        if self.selected == 0 {
            // EP0 stalls have to be armed separately; the controller disarms
            // them at the next SETUP.
            self.regs.ep_stall_arm.write(|w| w.ep0_in().set_bit().ep0_out().set_bit());
        }
        for dir in [UsbDir::In, UsbDir::Out] {
            if let Some(s) = self.slot(dir) {
                self.dpram.ep_buffer_control[SLOTS[s].buffer_control_index]
                    .modify(|_, w| w.stall().set_bit());
            }
        }
    }

    fn bytes_available(&mut self) -> u16 {
        let n = if let Some(s) = self.slot(UsbDir::Out).filter(|&s| self.has_packet(s)) {
            self.received_len(s).saturating_sub(self.cursors[s].pos)
        } else if let Some(s) = self.slot(UsbDir::In) {
            self.cursors[s].pos
        } else {
            0
        };
        n as u16
    }

    fn configure_endpoint(&mut self, descriptor: &UsbEndpointDescriptor) -> bool {
        let address = descriptor.endpoint_address;
        self.selected = descriptor.number();

        if self.selected == 0 {
            // Bus reset or power-up: EP0 is always enabled, but goes back to
            // a clean slate on address 0.
            for s in [EP0_IN, EP0_OUT] {
                self.revoke(s);
                self.cursors[s] = Cursor::default();
            }
            self.status_received = false;
            self.address = 0;
            self.regs.addr_endp.write(|w| unsafe { w.address().bits(0) });
            lower_pin(RESET_PIN);
            return true;
        }

        let (slot, ci) = match SLOTS
            .iter()
            .enumerate()
            .find(|(_, s)| s.address == address)
            .and_then(|(i, s)| Some((i, s.control_index?)))
        {
            Some(found) => found,
            None => return false,
        };
        let offset = SLOTS[slot].buffer_offset;
        let kind = match descriptor.transfer_type() {
            Some(t) => t as u8,
            None => return false,
        };

        self.dpram.ep_control[ci].write(|w| unsafe {
            w.enable().set_bit()
                .endpoint_type().bits(kind)
                .buffer_address().bits(offset as u16)
        });
        let epc = self.dpram.ep_control[ci].read();
        if !epc.enable().bit() || usize::from(epc.buffer_address().bits()) != offset {
            return false;
        }

        self.revoke(slot);
        self.cursors[slot] = Cursor::default();
        if descriptor.direction() == UsbDir::Out {
            self.hand_over(slot, BUFFER_SIZE);
        }
        true
    }

    fn load_address(&mut self, address: u8) {
        self.address = address;
    }

    fn enable_address(&mut self) {
        let a = self.address;
        self.regs.addr_endp.write(|w| unsafe { w.address().bits(a) });
    }
}

impl BusPower for Rp2040Endpoints {
    fn vbus_present(&mut self) -> bool {
        self.regs.sie_status.read().vbus_detected().bit()
    }

    fn attach(&mut self) {
        self.regs.inte.modify(|_, w| w.bus_reset().set_bit());
        // Full speed: pull up D+. This is when the host notices us.
        self.regs.sie_ctrl.modify(|_, w| w.pullup_en().set_bit());
    }
}
