//! Interrupt Descriptor Table: wires the 256 CPU-facing vectors to the
//! arch-independent dispatcher in [`crate::irq`].
//!
//! Exceptions spec.md §4.3 names explicitly (divide-by-zero, breakpoint,
//! invalid opcode, double fault, GPF, page fault) get their own typed
//! `x86_64` crate entry point so we can read the CPU-provided context
//! (error code, faulting address); every other exception and every IRQ
//! goes through a small generated trampoline that forwards the vector
//! number to [`crate::irq::dispatch_exception`] / [`crate::irq::dispatch_irq`].

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::PrivilegeLevel;

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use crate::irq::{self, TrapFrame};

extern "C" {
    /// Defined in `syscall.rs` via `global_asm!`; saves the syscall ABI
    /// registers, calls into `syscall::dispatch`, and `iretq`s back.
    fn aos_syscall_stub();
}

fn frame_of(vector: u8, error_code: u64, stack_frame: &InterruptStackFrame) -> TrapFrame {
    TrapFrame {
        vector,
        error_code,
        instruction_pointer: stack_frame.instruction_pointer.as_u64(),
        stack_pointer: stack_frame.stack_pointer.as_u64(),
        cr2: 0,
    }
}

extern "x86-interrupt" fn divide_by_zero(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(0, 0, &stack_frame));
}

extern "x86-interrupt" fn breakpoint(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(3, 0, &stack_frame));
}

extern "x86-interrupt" fn invalid_opcode(stack_frame: InterruptStackFrame) {
    irq::dispatch_exception(&frame_of(6, 0, &stack_frame));
}

extern "x86-interrupt" fn double_fault(stack_frame: InterruptStackFrame, error_code: u64) -> ! {
    irq::dispatch_exception(&frame_of(8, error_code, &stack_frame));
    panic!("double fault did not abort via krm::fault");
}

extern "x86-interrupt" fn general_protection_fault(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    irq::dispatch_exception(&frame_of(13, error_code, &stack_frame));
}

extern "x86-interrupt" fn page_fault(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let cr2 = x86_64::registers::control::Cr2::read()
        .map(|a| a.as_u64())
        .unwrap_or(0);
    let mut frame = frame_of(14, error_code.bits(), &stack_frame);
    frame.cr2 = cr2;
    irq::dispatch_exception(&frame);
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

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_by_zero);
        idt.breakpoint.set_handler_fn(breakpoint);
        idt.invalid_opcode.set_handler_fn(invalid_opcode);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault)
                .set_stack_index(DOUBLE_FAULT_IST_INDEX);
        }
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault);
        idt.page_fault.set_handler_fn(page_fault);

        let base = irq::IRQ_BASE as usize;
        idt[base].set_handler_fn(irq_00);
        idt[base + 1].set_handler_fn(irq_01);
        idt[base + 2].set_handler_fn(irq_02);
        idt[base + 3].set_handler_fn(irq_03);
        idt[base + 4].set_handler_fn(irq_04);
        idt[base + 5].set_handler_fn(irq_05);
        idt[base + 6].set_handler_fn(irq_06);
        idt[base + 7].set_handler_fn(irq_07);
        idt[base + 8].set_handler_fn(irq_08);
        idt[base + 9].set_handler_fn(irq_09);
        idt[base + 10].set_handler_fn(irq_10);
        idt[base + 11].set_handler_fn(irq_11);
        idt[base + 12].set_handler_fn(irq_12);
        idt[base + 13].set_handler_fn(irq_13);
        idt[base + 14].set_handler_fn(irq_14);
        idt[base + 15].set_handler_fn(irq_15);

        // Vector 128: the syscall trap. User-callable, per spec.md §4.3.
        // SAFETY: `aos_syscall_stub` ends in `iretq` and matches the
        // interrupt-gate calling convention; vector 128 is otherwise
        // unused by any CPU exception or PIC-routed IRQ.
        unsafe {
            idt[128]
                .set_handler_addr(x86_64::VirtAddr::new(aos_syscall_stub as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }

        idt
    };
}

pub fn init() {
    IDT.load();
}
