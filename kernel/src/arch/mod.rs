//! Architecture/platform glue.
//!
//! Exposes one arch module per target word width. `x86_64` is the fully
//! fleshed primary port (GDT/IDT/TSS via the `x86_64` crate, PIC, serial,
//! PIT); `x86` is a structurally parallel 32-bit port sharing the same
//! `ArchOps` surface, hand-rolled the way the teacher hand-rolls its
//! non-`x86_64` arch backends (no external GDT/IDT crate exists for the
//! 32-bit target the way `x86_64` covers 64-bit).

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64 as cur;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use self::x86 as cur;

// Hosted test target: neither bare-metal backend is safe to link here (both
// carry real inline asm / port I/O for ring 0). Route to the no-op stand-in
// regardless of host word size, matching the rest of this crate's
// `target_os = "none"` dual-target convention (see `lib.rs`, `mm::heap`).
#[cfg(not(target_os = "none"))]
pub mod host_stub;
#[cfg(not(target_os = "none"))]
pub use host_stub as cur;

pub use cur::serial;

/// Per-architecture primitives the rest of the kernel depends on.
///
/// Each arch module implements these as free functions re-exported at
/// `arch::<fn>`; the trait exists purely to document and typecheck the
/// contract both arches must honor, the same role the teacher's per-arch
/// `mod.rs` re-export list plays.
pub trait ArchOps {
    /// One-time early init: GDT/IDT/TSS, PIC remap, serial console.
    fn init();
    /// Halt the CPU (used by the panic path and the idle task).
    fn halt() -> !;
    /// Disable maskable interrupts, returning whether they were enabled.
    fn disable_interrupts() -> bool;
    /// Restore interrupts to a previously observed enabled state.
    fn restore_interrupts(were_enabled: bool);
    /// Invalidate a single TLB entry for `va`.
    fn flush_tlb_page(va: usize);
    /// Flush the entire TLB (full page-table-base reload).
    fn flush_tlb_all();
}

pub fn init() {
    cur::init();
}

pub fn halt() -> ! {
    cur::halt()
}
