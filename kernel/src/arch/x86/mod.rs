//! 32-bit x86 architecture backend (spec.md §1's primary target,
//! structurally mirrored here as the port — see `arch/mod.rs` and
//! DESIGN.md for the primary/port inversion this crate takes for
//! buildability). Same bring-up order and `ArchOps` surface as the
//! 64-bit port, hand-rolled where the `x86_64` crate doesn't cover this
//! word width.

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod port;
pub mod reboot;
pub mod serial;
pub mod syscall;

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

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
        unsafe { asm!("hlt") };
    }
}

/// Disable interrupts, returning whether they were previously enabled.
pub fn disable_interrupts() -> bool {
    let flags: u32;
    // SAFETY: `pushfd`/`popfd` read/restore EFLAGS; `cli` disables
    // maskable interrupts. No memory side effects.
    unsafe {
        asm!("pushfd", "pop {}", out(reg) flags, options(nomem, preserves_flags));
        asm!("cli", options(nomem, nostack));
    }
    flags & (1 << 9) != 0
}

pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        unsafe { asm!("sti", options(nomem, nostack)) };
    }
}

pub fn flush_tlb_page(va: usize) {
    unsafe {
        asm!("invlpg [{}]", in(reg) va, options(nostack));
    }
}

pub fn flush_tlb_all() {
    unsafe {
        asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}
