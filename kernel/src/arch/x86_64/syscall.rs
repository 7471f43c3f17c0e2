//! System-call trap gate: vector 128, installed user-callable (spec.md
//! §4.3, §5). `int 0x80` is still the ABI spec.md specifies (register-passed
//! syscall number and up to five arguments, result back in the same
//! register), rather than the `syscall`/`sysret` fast path, so the gate is
//! a plain IDT entry rather than MSR-configured `SYSCALL`.

use crate::syscall::SyscallArgs;

/// Registers saved by the trap stub, in push order (last pushed is on top,
/// so the layout below is highest address first).
#[repr(C)]
pub struct SavedRegisters {
    pub r9: u64,
    pub r8: u64,
    pub r10: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rax: u64,
}

/// Rust-side handler invoked by the naked trap stub with a pointer to the
/// saved registers; returns the value to place back in `rax`.
extern "C" fn syscall_trap(regs: *mut SavedRegisters) -> u64 {
    // SAFETY: `regs` points at the `SavedRegisters` the stub just pushed
    // onto its own stack; it's valid for the duration of this call.
    let regs = unsafe { &*regs };
    let args = SyscallArgs {
        number: regs.rax,
        args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8],
    };
    crate::syscall::dispatch(args) as u64
}

// Naked trap stub: saves the five argument registers plus the syscall
// number, hands a pointer to them to `syscall_trap`, then restores
// everything except `rax` (which now carries the return value) before
// `iretq` back to the caller.
core::arch::global_asm!(
    ".global aos_syscall_stub",
    "aos_syscall_stub:",
    "push rax",
    "push rdi",
    "push rsi",
    "push rdx",
    "push r10",
    "push r8",
    "push r9",
    "mov rdi, rsp",
    "call {handler}",
    "mov [rsp + 48], rax", // overwrite the saved rax slot with the result
    "pop r9",
    "pop r8",
    "pop r10",
    "pop rdx",
    "pop rsi",
    "pop rdi",
    "pop rax",
    "iretq",
    handler = sym syscall_trap,
);

/// The gate itself is installed by `idt::init` (vector 128 is wired to
/// `aos_syscall_stub` as part of building the IDT); nothing left to do
/// here, kept for symmetry with the rest of arch bring-up.
pub fn init() {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn saved_registers_is_seven_u64s() {
        assert_eq!(size_of::<SavedRegisters>(), 7 * 8);
    }
}
