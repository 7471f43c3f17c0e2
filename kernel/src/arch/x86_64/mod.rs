//! x86_64 architecture backend: GDT/TSS, IDT, PIC remap, serial console,
//! and the low-level context switch used by the scheduler.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;
pub mod reboot;
pub mod serial;
pub mod syscall;

use core::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time architecture bring-up, in dependency order: serial first so
/// early boot messages can be seen, then GDT/TSS, then IDT, then the PIC
/// remap (spec.md §4.3: vectors 32-47 for IRQs), then the syscall trap
/// gate (vector 128).
pub fn init() {
    serial::init();
    gdt::init();
    idt::init();
    pic::init();
    syscall::init();
    INITIALIZED.store(true, Ordering::Release);
}

pub fn halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Disable interrupts, returning whether they were previously enabled.
pub fn disable_interrupts() -> bool {
    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    was_enabled
}

/// Restore interrupts to a previously observed state.
pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        x86_64::instructions::interrupts::enable();
    }
}

pub fn flush_tlb_page(va: usize) {
    use x86_64::{instructions::tlb::flush, VirtAddr};
    flush(VirtAddr::new(va as u64));
}

pub fn flush_tlb_all() {
    use x86_64::registers::control::Cr3;
    let (frame, flags) = Cr3::read();
    unsafe {
        Cr3::write(frame, flags);
    }
}
