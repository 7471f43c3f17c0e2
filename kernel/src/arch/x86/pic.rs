//! 8259 PIC remap (spec.md §4.3). Identical to the 64-bit port's `pic.rs`
//! — `pic8259` is pure port I/O and has no word-size dependency.

use pic8259::ChainedPics;
use spin::Mutex;

use super::port;

const PIC1_OFFSET: u8 = crate::irq::IRQ_BASE;
const PIC2_OFFSET: u8 = PIC1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

pub fn init() {
    // SAFETY: offsets don't overlap any CPU exception vector, and this
    // runs once before interrupts are enabled.
    unsafe {
        PICS.lock().initialize();
    }
    port::io_wait();
}

pub fn send_eoi(irq: u8) {
    // SAFETY: `irq` is a valid PIC-routed line; only `irq::dispatch_irq`
    // calls this, with `irq` in 0..=15.
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC1_OFFSET + irq);
    }
}

pub fn mask(irq: u8) {
    use port::{inb, outb};
    let (port_addr, bit) = if irq < 8 { (0x21, irq) } else { (0xA1, irq - 8) };
    // SAFETY: read-modify-write of the PIC mask register is the standard
    // way to disable one IRQ line.
    unsafe {
        let mask = inb(port_addr) | (1 << bit);
        outb(port_addr, mask);
    }
}

pub fn unmask(irq: u8) {
    use port::{inb, outb};
    let (port_addr, bit) = if irq < 8 { (0x21, irq) } else { (0xA1, irq - 8) };
    // SAFETY: see `mask`.
    unsafe {
        let mask = inb(port_addr) & !(1 << bit);
        outb(port_addr, mask);
    }
}
