// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two PL011 UARTs: UART0 is the serial port on the far side of the
//! bridge, UART1 carries the diagnostic log.

use core::fmt::Write;

use rp2040_pac::uart0::RegisterBlock as Pl011;
use rp2040_pac::UART0;

use ft232_emu::relay::SerialSink;

/// 132 MHz clk_peri / (16 * 115200) = 71.6146, so IBRD = 71 and
/// FBRD = round(0.6146 * 64) = 39.
const BAUD_DIVINT: u16 = 71;
const BAUD_DIVFRAC: u8 = 39;

/// Sets up a UART for 115200 8N1 with FIFOs. The UART must be out of reset and
/// clk_peri running.
pub fn configure(uart: &Pl011, receive: bool) {
    uart.uartibrd.write(|w| unsafe { w.baud_divint().bits(BAUD_DIVINT) });
    uart.uartfbrd.write(|w| unsafe { w.baud_divfrac().bits(BAUD_DIVFRAC) });
    // The divisors only take effect on a write to LCR_H, so this has to come
    // after them.
    uart.uartlcr_h.write(|w| unsafe { w.wlen().bits(0b11).fen().set_bit() });
    uart.uartcr.write(|w| {
        w.uarten().set_bit()
            .txe().set_bit()
            .rxe().bit(receive)
    });
    if receive {
        // Interrupt on data received, and on a receive timeout, so that a
        // single byte doesn't sit in the FIFO waiting for company.
        uart.uartimsc.write(|w| w.rxim().set_bit().rtim().set_bit());
    }
}

fn put(uart: &Pl011, byte: u8) {
    while uart.uartfr.read().txff().bit() {}
    uart.uartdr.write(|w| unsafe { w.data().bits(byte) });
}

/// Empties UART0's receive FIFO, handing each byte to `f`. Called from the
/// UART0 interrupt.
pub fn drain_serial(mut f: impl FnMut(u8)) {
    // Safety: only reads of UARTDR and UARTFR, which the main loop never does.
    let uart = unsafe { &*UART0::ptr() };
    while !uart.uartfr.read().rxfe().bit() {
        f(uart.uartdr.read().data().bits());
    }
}

/// Transmit side of the bridged serial port.
pub struct SerialPort(UART0);

impl SerialPort {
    pub fn new(uart: UART0) -> Self {
        configure(&uart, true);
        Self(uart)
    }
}

impl SerialSink for SerialPort {
    fn write_byte(&mut self, byte: u8) {
        put(&self.0, byte);
    }
}

struct DiagWriter<'a>(&'a Pl011);

impl Write for DiagWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                put(self.0, b'\r');
            }
            put(self.0, b);
        }
        Ok(())
    }
}

/// `log` backend writing one line per record to UART1.
pub struct DiagLog;

static LOGGER: DiagLog = DiagLog;

impl log::Log for DiagLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        // Safety: UART1 is written only from here, and only inside the
        // critical section.
        let uart = unsafe { &*rp2040_pac::UART1::ptr() };
        critical_section::with(|_| {
            let _ = writeln!(DiagWriter(uart), "{:5} {}", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Configures UART1 and routes `log` output to it.
pub fn install_logger(uart: &Pl011, level: log::LevelFilter) {
    configure(uart, false);
    // Safety: we're in main before any interrupt is unmasked, so nothing can
    // be logging concurrently. (Cortex-M0+ has no compare-and-swap, which is
    // why the safe `set_logger` isn't available.)
    unsafe {
        let _ = log::set_logger_racy(&LOGGER);
    }
    log::set_max_level(level);
}
