//! 16550 UART console, used for kernel logging and the KRM's interactive
//! recovery menu. KRM deliberately depends only on this and raw port I/O
//! (spec.md §4.9), never on the heap, scheduler, or VFS.

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
    // Interrupts are disabled around the write so a timer tick can't
    // preempt us mid-write and deadlock on a re-entrant lock attempt from
    // an IRQ handler that also logs.
    x86_64::instructions::interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial console write should not fail");
    });
}

/// Write directly to the serial console, bypassing the lazy-static lock.
/// Used only by the KRM after a cascading panic, where the `SERIAL1` lock
/// may already be held by the task that panicked.
///
/// # Safety
/// Caller must guarantee no other context is concurrently writing to
/// COM1; only valid once we've committed to never returning (KRM).
pub unsafe fn emergency_write(s: &str) {
    let mut port = unsafe { SerialPort::new(COM1_BASE) };
    let _ = port.write_str(s);
}
