//! Interrupt Descriptor Table for the 32-bit port: same arch-independent
//! dispatch contract as the 64-bit port's `idt.rs`, but the IDT entries
//! and the `InterruptStackFrame` type are hand-rolled since the
//! `x86_64` crate doesn't cover this word width. The `"x86-interrupt"`
//! calling convention itself is a compiler builtin available on both
//! widths (`#![feature(abi_x86_interrupt)]` in `lib.rs`), so the
//! exception handlers below are plain functions, not naked asm.

use core::mem::size_of;

use lazy_static::lazy_static;

use super::gdt::SELECTORS;
use crate::irq::{self, TrapFrame};

/// What the CPU pushes before transferring control to a same-privilege
/// interrupt/exception handler on IA-32 (Intel SDM Vol. 3A §6.12.1).
#[repr(C)]
pub struct InterruptStackFrame {
    pub instruction_pointer: u32,
    pub code_segment: u32,
    pub cpu_flags: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Present, ring 0, 32-bit interrupt gate.
const GATE_KERNEL: u8 = 0x8E;
/// Present, ring 3, 32-bit interrupt gate — the syscall trap is the only
/// user-callable vector (spec.md §4.3).
const GATE_USER: u8 = 0xEE;

extern "x86-interrupt" fn divide_by_zero(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(0, 0, &stack_frame));
}

extern "x86-interrupt" fn breakpoint(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(3, 0, &stack_frame));
}

extern "x86-interrupt" fn invalid_opcode(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(6, 0, &stack_frame));
}

extern "x86-interrupt" fn double_fault(stack_frame: InterruptStackFrame, error_code: u32) -> ! {
    irq::dispatch_exception(&frame_of(8, error_code as u64, &stack_frame));
    panic!("double fault did not abort via krm::fault");
}

extern "x86-interrupt" fn general_protection_fault(stack_frame: InterruptStackFrame, error_code: u32) {
    irq::dispatch_exception(&frame_of(13, error_code as u64, &stack_frame));
}

extern "x86-interrupt" fn page_fault(stack_frame: InterruptStackFrame, error_code: u32) {
    let cr2: u32;
    // SAFETY: reading CR2 has no side effects and is always valid.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
    }
    let mut frame = frame_of(14, error_code as u64, &stack_frame);
    frame.cr2 = cr2 as u64;
    irq::dispatch_exception(&frame);
}

fn frame_of(vector: u8, error_code: u64, stack_frame: &InterruptStackFrame) -> TrapFrame {
    TrapFrame {
        vector,
        error_code,
        instruction_pointer: stack_frame.instruction_pointer as u64,
        stack_pointer: 0,
        cr2: 0,
    }
}

macro_rules! irq_trampoline {
    ($name:ident, $irq:expr) => {
        extern "x86-interrupt" fn $name(_stack_frame: InterruptStackFrame) {
            irq::dispatch_irq($irq);
        }
    };
}

irq_trampoline!(irq_00, 0);
irq_trampoline!(irq_01, 1);
irq_trampoline!(irq_02, 2);
irq_trampoline!(irq_03, 3);
irq_trampoline!(irq_04, 4);
irq_trampoline!(irq_05, 5);
irq_trampoline!(irq_06, 6);
irq_trampoline!(irq_07, 7);
irq_trampoline!(irq_08, 8);
irq_trampoline!(irq_09, 9);
irq_trampoline!(irq_10, 10);
irq_trampoline!(irq_11, 11);
irq_trampoline!(irq_12, 12);
irq_trampoline!(irq_13, 13);
irq_trampoline!(irq_14, 14);
irq_trampoline!(irq_15, 15);

extern "C" {
    /// Defined in `syscall.rs` via `global_asm!`.
    fn aos_syscall_stub();
}

const NUM_VECTORS: usize = 256;

lazy_static! {
    static ref IDT: [IdtEntry; NUM_VECTORS] = {
        let mut idt = [IdtEntry::missing(); NUM_VECTORS];
        let code = SELECTORS.kernel_code;

        idt[0] = IdtEntry::new(divide_by_zero as u32, code, GATE_KERNEL);
        idt[3] = IdtEntry::new(breakpoint as u32, code, GATE_KERNEL);
        idt[6] = IdtEntry::new(invalid_opcode as u32, code, GATE_KERNEL);
        idt[8] = IdtEntry::new(double_fault as u32, code, GATE_KERNEL);
        idt[13] = IdtEntry::new(general_protection_fault as u32, code, GATE_KERNEL);
        idt[14] = IdtEntry::new(page_fault as u32, code, GATE_KERNEL);

        let base = irq::IRQ_BASE as usize;
        idt[base] = IdtEntry::new(irq_00 as u32, code, GATE_KERNEL);
        idt[base + 1] = IdtEntry::new(irq_01 as u32, code, GATE_KERNEL);
        idt[base + 2] = IdtEntry::new(irq_02 as u32, code, GATE_KERNEL);
        idt[base + 3] = IdtEntry::new(irq_03 as u32, code, GATE_KERNEL);
        idt[base + 4] = IdtEntry::new(irq_04 as u32, code, GATE_KERNEL);
        idt[base + 5] = IdtEntry::new(irq_05 as u32, code, GATE_KERNEL);
        idt[base + 6] = IdtEntry::new(irq_06 as u32, code, GATE_KERNEL);
        idt[base + 7] = IdtEntry::new(irq_07 as u32, code, GATE_KERNEL);
        idt[base + 8] = IdtEntry::new(irq_08 as u32, code, GATE_KERNEL);
        idt[base + 9] = IdtEntry::new(irq_09 as u32, code, GATE_KERNEL);
        idt[base + 10] = IdtEntry::new(irq_10 as u32, code, GATE_KERNEL);
        idt[base + 11] = IdtEntry::new(irq_11 as u32, code, GATE_KERNEL);
        idt[base + 12] = IdtEntry::new(irq_12 as u32, code, GATE_KERNEL);
        idt[base + 13] = IdtEntry::new(irq_13 as u32, code, GATE_KERNEL);
        idt[base + 14] = IdtEntry::new(irq_14 as u32, code, GATE_KERNEL);
        idt[base + 15] = IdtEntry::new(irq_15 as u32, code, GATE_KERNEL);

        // Vector 128: the syscall trap, user-callable (spec.md §4.3).
        idt[128] = IdtEntry::new(aos_syscall_stub as u32, code, GATE_USER);

        idt
    };
}

pub fn init() {
    let pointer = IdtPointer {
        limit: (size_of::<[IdtEntry; NUM_VECTORS]>() - 1) as u16,
        base: IDT.as_ptr() as u32,
    };
    // SAFETY: `pointer` addresses the `'static` IDT built above; every
    // installed gate points at a handler defined in this module or
    // `syscall.rs`'s matching naked stub.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}
