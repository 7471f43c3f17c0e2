//! System-call trap gate: vector 128 (`int 0x80`), 32-bit ABI. Syscall
//! number in `eax`, up to five arguments in `ebx, ecx, edx, esi, edi`,
//! result back in `eax` (spec.md §6) — mirrors the 64-bit port's
//! `syscall.rs` with the 32-bit register set.

use crate::syscall::SyscallArgs;

#[repr(C)]
pub struct SavedRegisters {
    pub edi: u32,
    pub esi: u32,
    pub edx: u32,
    pub ecx: u32,
    pub ebx: u32,
    pub eax: u32,
}

extern "C" fn syscall_trap(regs: *mut SavedRegisters) -> u32 {
    // SAFETY: `regs` points at the `SavedRegisters` the stub just pushed
    // onto its own stack; valid for the duration of this call.
    let regs = unsafe { &*regs };
    let args = SyscallArgs {
        number: regs.eax as u64,
        args: [regs.ebx as u64, regs.ecx as u64, regs.edx as u64, regs.esi as u64, regs.edi as u64],
    };
    crate::syscall::dispatch(args) as u32
}

// Naked trap stub: saves the five argument registers plus the syscall
// number, hands a pointer to them to `syscall_trap`, restores everything
// except `eax` (which now carries the result), then `iretd`s back.
core::arch::global_asm!(
    ".global aos_syscall_stub",
    "aos_syscall_stub:",
    "push eax",
    "push ebx",
    "push ecx",
    "push edx",
    "push esi",
    "push edi",
    "mov eax, esp",
    "push eax",
    "call {handler}",
    "add esp, 4",
    "mov [esp + 20], eax", // overwrite the saved eax slot with the result
    "pop edi",
    "pop esi",
    "pop edx",
    "pop ecx",
    "pop ebx",
    "pop eax",
    "iretd",
    handler = sym syscall_trap,
);

/// The gate itself is installed by `idt::init` (vector 128 wired to
/// `aos_syscall_stub`); nothing left to do here, kept for symmetry.
pub fn init() {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn saved_registers_is_six_u32s() {
        assert_eq!(size_of::<SavedRegisters>(), 6 * 4);
    }
}
