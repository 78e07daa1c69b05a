// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board-specific bits: pin assignments, the second-stage bootloader, and the
//! activity pins.

pub mod uart;
pub mod usb;

// GPIO numbers of pins used here, other than USB. The firmware toggles the
// activity pins so that you can watch them on a logic analyzer and follow the
// event flow.
//
// UART0 on GPIO 0/1 is the serial port we bridge to. The diagnostic log goes
// out of UART1, transmit only.
cfg_if::cfg_if! {
    if #[cfg(feature = "target-pico")] {
        pub const LED_PIN: u8 = 25; // any activity
        pub const SETUP_PIN: u8 = 2; // SETUP packet acknowledged
        pub const BUFF_PIN: u8 = 3; // a bank handed to the controller
        pub const RESET_PIN: u8 = 6; // bus reset, until EP0 is set up again
        pub const DIAG_TX_PIN: u8 = 4;
        /// The Pico wires VBUS to the controller's detect input.
        pub const FORCE_VBUS: bool = false;

        // The Pi Pico uses a Winbond W25Q080 chip.
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
    } else if #[cfg(feature = "target-feather")] {
        pub const LED_PIN: u8 = 13;
        pub const SETUP_PIN: u8 = 2;
        pub const BUFF_PIN: u8 = 3;
        pub const RESET_PIN: u8 = 6;
        pub const DIAG_TX_PIN: u8 = 24;
        /// The Feather doesn't route VBUS to the detect input, so we pretend
        /// it's always there.
        pub const FORCE_VBUS: bool = true;

        // The Adafruit board uses a GigaDevice flash chip that wants its own
        // bootloader.
        #[link_section = ".boot2"]
        #[used]
        static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GD25Q64_COMPAT_CHECK;
    } else {
        compile_error!("missing or unknown target-* feature");
    }
}

pub const SERIAL_TX_PIN: u8 = 0;
pub const SERIAL_RX_PIN: u8 = 1;

pub const ACTIVITY_PINS: [u8; 4] = [LED_PIN, SETUP_PIN, BUFF_PIN, RESET_PIN];

fn sio() -> &'static rp2040_pac::sio::RegisterBlock {
    // Safety: the set/clear registers are single writes with no
    // read-modify-write, so sharing them with interrupt handlers is fine.
    unsafe { &*rp2040_pac::SIO::ptr() }
}

/// Raise the GPIO pin with index `pin`.
///
/// The pin must already be configured as an SIO output.
#[inline(always)]
pub fn raise_pin(pin: u8) {
    sio().gpio_out_set.write(|w| unsafe { w.bits(1 << pin) });
}

/// Lower the GPIO pin with index `pin`.
#[inline(always)]
pub fn lower_pin(pin: u8) {
    sio().gpio_out_clr.write(|w| unsafe { w.bits(1 << pin) });
}

/// Raises and immediately lowers `pin`, for events with no duration.
#[inline(always)]
pub fn pulse_pin(pin: u8) {
    raise_pin(pin);
    lower_pin(pin);
}
