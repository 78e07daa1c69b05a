// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FT232 emulation firmware for RP2040 boards.
//!
//! Plug the board in and the host sees an FTDI FT232 USB-serial adapter. Bytes
//! the host writes come out of UART0 (GPIO 0) and are echoed back; bytes that
//! arrive on UART0 (GPIO 1) go to the host. Send an `a` for a greeting.
//!
//! The protocol side is all in the library crate. This file just gets the
//! chip to the point where that can run: clocks, pins, UARTs, USB controller,
//! interrupts, and then a single polling loop.
//!
//! There's some `unsafe` here. Most of it is inside register `write` and
//! `modify` calls, where `rp2040_pac` asks for it on field writes that can't
//! actually go wrong. That kind gets no comment. The rest is commented where
//! it happens.

#![no_std]
#![no_main]

mod board;

use cortex_m_rt::entry;
use rp2040_pac::interrupt;

use panic_halt as _;

use ft232_emu::endpoint::WaitBudget;
use ft232_emu::sync::{ByteSlot, Latch};
use ft232_emu::Bridge;

use board::usb::Rp2040Endpoints;
use board::{lower_pin, raise_pin, ACTIVITY_PINS, LED_PIN, RESET_PIN};

/// Raised by the USB interrupt on bus reset, taken by the main loop.
static BUS_RESET: Latch = Latch::new();
/// Last byte received on the serial port and not yet sent to the host.
static SERIAL_RX: ByteSlot = ByteSlot::new();

#[entry]
fn main() -> ! {
    // The chip has come out of reset, executed the boot ROM, and jumped into
    // our program. We are running at 6-ish MHz from the internal ring
    // oscillator ROSC, with all pins tristated.
    let p = match rp2040_pac::Peripherals::take() {
        Some(p) => p,
        None => park(),
    };

    //////////////////////////////////////////////////////////////////////////
    // Pins. Bring IO bank 0 and the pads out of reset, then set up the
    // activity pins as outputs and hand the UART pins to the UARTs.

    p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit().pads_bank0().clear_bit());
    while !p.RESETS.reset_done.read().io_bank0().bit() {}
    while !p.RESETS.reset_done.read().pads_bank0().bit() {}

    for pin in ACTIVITY_PINS {
        p.IO_BANK0.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().sio());
        p.SIO.gpio_oe_set.write(|w| unsafe { w.bits(1 << pin) });
    }
    // Function 2 is the UART on every pin that has one.
    for pin in [board::SERIAL_TX_PIN, board::SERIAL_RX_PIN, board::DIAG_TX_PIN] {
        p.IO_BANK0.gpio[pin as usize].gpio_ctrl.write(|w| unsafe { w.funcsel().bits(2) });
    }

    //////////////////////////////////////////////////////////////////////////
    // Clocks: crystal, then PLL_SYS at 132 MHz for the CPU and peripherals,
    // then PLL_USB at the 48 MHz that USB requires.
    //
    // XOSC and CLOCKS do not need to be taken out of RESET.

    p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
    while !p.XOSC.status.read().stable().bit() {}
    // Switch ref clk from ROSC to XOSC. sys clk is derived from this by
    // default, so this moves the whole system over glitchlessly.
    p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
    while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
    // Turn off ROSC. We're now running at a crystal-governed 12MHz.
    p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

    // PLL_SYS: REFDIV = 1, FBDIV = 132 => VCO 1584 MHz, post dividers 6 * 2
    // => 132 MHz.
    p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
    while !p.RESETS.reset_done.read().pll_sys().bit() {}
    p.PLL_SYS.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_SYS.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(132) });
    p.PLL_SYS.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_SYS.cs.read().lock().bit() {}
    p.PLL_SYS.prim.write(|w| unsafe { w.postdiv1().bits(6).postdiv2().bits(2) });
    p.PLL_SYS.pwr.modify(|_, w| w.postdivpd().clear_bit());

    p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
    p.CLOCKS.clk_sys_ctrl.modify(|_, w| w.src().clksrc_clk_sys_aux());
    while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}

    // clk_peri follows clk_sys. Both UARTs run from it, and their baud
    // divisors assume 132 MHz.
    p.CLOCKS.clk_peri_ctrl.write(|w| w.auxsrc().clk_sys().enable().set_bit());

    // PLL_USB: REFDIV = 1, FBDIV = 100 => VCO 1200 MHz, post dividers 5 * 5
    // => 48 MHz.
    p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
    while !p.RESETS.reset_done.read().pll_usb().bit() {}
    p.PLL_USB.cs.write(|w| unsafe { w.refdiv().bits(1) });
    p.PLL_USB.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(100) });
    p.PLL_USB.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
    while !p.PLL_USB.cs.read().lock().bit() {}
    p.PLL_USB.prim.write(|w| unsafe { w.postdiv1().bits(5).postdiv2().bits(5) });
    p.PLL_USB.pwr.modify(|_, w| w.postdivpd().clear_bit());

    p.CLOCKS.clk_usb_ctrl.write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());

    //////////////////////////////////////////////////////////////////////////
    // UARTs. The diagnostic one first, so everything after can log.

    p.RESETS.reset.modify(|_, w| w.uart0().clear_bit().uart1().clear_bit());
    while !p.RESETS.reset_done.read().uart0().bit() {}
    while !p.RESETS.reset_done.read().uart1().bit() {}

    board::uart::install_logger(&p.UART1, log::LevelFilter::Info);
    log::info!("ft232-emu {}", env!("CARGO_PKG_VERSION"));

    let mut serial = board::uart::SerialPort::new(p.UART0);

    //////////////////////////////////////////////////////////////////////////
    // USB. The controller comes up detached; the bridge attaches it once it
    // sees VBUS.

    let endpoints = Rp2040Endpoints::bring_up(&p.RESETS, p.USBCTRL_REGS, p.USBCTRL_DPRAM);
    let mut bridge = Bridge::new(endpoints, WaitBudget::Unbounded);
    if let Err(e) = bridge.start() {
        fatal(e);
    }

    // Safety: the handlers only touch the two statics above and registers
    // the main loop doesn't use.
    unsafe {
        cortex_m::peripheral::NVIC::unmask(rp2040_pac::Interrupt::USBCTRL_IRQ);
        cortex_m::peripheral::NVIC::unmask(rp2040_pac::Interrupt::UART0_IRQ);
    }

    //////////////////////////////////////////////////////////////////////////
    // Main loop.

    loop {
        raise_pin(LED_PIN);
        match bridge.poll(&BUS_RESET, &SERIAL_RX, &mut serial) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => fatal(e),
            // Whatever transfer was going on is gone; the next SETUP starts
            // over.
            Err(e) => log::warn!("{}", e),
        }
        lower_pin(LED_PIN);
    }
}

/// Reports an error we can't continue from, and stops.
fn fatal(e: ft232_emu::error::UsbError) -> ! {
    log::error!("fatal: {}", e);
    for pin in ACTIVITY_PINS {
        raise_pin(pin);
    }
    park()
}

fn park() -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

#[interrupt]
fn USBCTRL_IRQ() {
    // Safety: SIE_STATUS is write-one-to-clear, so writing only the bus reset
    // bit can't disturb the main loop's use of the SETUP bit.
    let regs = unsafe { &*rp2040_pac::USBCTRL_REGS::ptr() };
    if regs.sie_status.read().bus_reset().bit() {
        raise_pin(RESET_PIN);
        regs.sie_status.write(|w| w.bus_reset().set_bit());
        BUS_RESET.raise();
    }
}

#[interrupt]
fn UART0_IRQ() {
    board::uart::drain_serial(|b| SERIAL_RX.put(b));
}
