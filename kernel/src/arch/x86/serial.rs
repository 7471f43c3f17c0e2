//! 16550 UART console. Identical to the 64-bit port's `serial.rs` —
//! `uart_16550` is pure port I/O with no word-size dependency. KRM
//! depends only on this and raw port I/O (spec.md §4.9).

use core::fmt::{self, Write};

use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

const COM1_BASE: u16 = 0x3F8;

lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1_BASE) };
        port.init();
        Mutex::new(port)
    };
}

pub fn init() {
    lazy_static::initialize(&SERIAL1);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial console write should not fail");
    });
}

fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let were_enabled = super::disable_interrupts();
    let result = f();
    super::restore_interrupts(were_enabled);
    result
}

/// Write directly to the serial console, bypassing the lazy-static lock.
/// Only valid once we've committed to never returning (KRM after a
/// cascading panic, mirroring the 64-bit port).
///
/// # Safety
/// Caller must guarantee no other context is concurrently writing to COM1.
pub unsafe fn emergency_write(s: &str) {
    let mut port = unsafe { SerialPort::new(COM1_BASE) };
    let _ = port.write_str(s);
}
