//! 8259 PIC remap. The legacy PIC delivers IRQ 0..=15 on vectors 0..=15 out
//! of reset, which collides with the CPU exception vectors; we remap the
//! master to 32 and the slave to 40 before enabling interrupts, per
//! spec.md §4.3.

use pic8259::ChainedPics;
use spin::Mutex;

use super::port;

const PIC1_OFFSET: u8 = crate::irq::IRQ_BASE;
const PIC2_OFFSET: u8 = PIC1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

pub fn init() {
    // SAFETY: offsets above don't overlap any CPU exception vector, and
    // this runs once before interrupts are enabled.
    unsafe {
        PICS.lock().initialize();
    }
    port::io_wait();
}

/// Send end-of-interrupt for `irq` (0..=15), cascading to the slave PIC
/// first when `irq >= 8` as the chained-PIC protocol requires.
pub fn send_eoi(irq: u8) {
    // SAFETY: `irq` is a valid PIC-routed IRQ line, checked by the caller
    // (irq::dispatch_irq only calls this with 0..=15).
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC1_OFFSET + irq);
    }
}

/// Mask (disable) a single IRQ line at the PIC, used when a module or
/// driver tears down an IRQ registration.
pub fn mask(irq: u8) {
    use port::{inb, outb};
    let (port_addr, bit) = if irq < 8 {
        (0x21, irq)
    } else {
        (0xA1, irq - 8)
    };
    // SAFETY: 0x21/0xA1 are the PIC data ports; read-modify-write of the
    // mask register is the standard way to disable one IRQ line.
    unsafe {
        let mask = inb(port_addr) | (1 << bit);
        outb(port_addr, mask);
    }
}

/// Unmask (enable) a single IRQ line at the PIC.
pub fn unmask(irq: u8) {
    use port::{inb, outb};
    let (port_addr, bit) = if irq < 8 {
        (0x21, irq)
    } else {
        (0xA1, irq - 8)
    };
    // SAFETY: see `mask`.
    unsafe {
        let mask = inb(port_addr) & !(1 << bit);
        outb(port_addr, mask);
    }
}
