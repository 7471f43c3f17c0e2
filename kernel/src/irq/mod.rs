//! Architecture-independent interrupt/exception dispatch (spec.md §4.3).
//!
//! The arch backend's IDT only knows how to turn a CPU trap into a vector
//! number and a [`TrapFrame`]; everything past that point — EOI policy,
//! handler lookup, the fallback to the panic/recovery subsystem — lives
//! here so it's identical across arch backends.

use spin::Mutex;

use crate::arch;

/// Number of CPU exception vectors (0..=31).
pub const NUM_EXCEPTIONS: usize = 32;
/// Number of IRQ lines routed through the legacy PIC (32..=47).
pub const NUM_IRQS: usize = 16;
/// Base vector IRQ 0 is remapped to.
pub const IRQ_BASE: u8 = 32;

/// Register/fault snapshot handed to a registered handler. Populated by
/// the arch backend from whatever the CPU pushed onto the trap stack.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub vector: u8,
    pub error_code: u64,
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    pub cr2: u64,
}

pub type ExceptionHandler = fn(&TrapFrame);
pub type IrqHandler = fn();

static EXCEPTION_HANDLERS: Mutex<[Option<ExceptionHandler>; NUM_EXCEPTIONS]> =
    Mutex::new([None; NUM_EXCEPTIONS]);
static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; NUM_IRQS]> = Mutex::new([None; NUM_IRQS]);

/// Names for the exceptions spec.md §4.3 calls out explicitly; used in the
/// panic message when no handler is registered and the fault is fatal.
fn exception_name(vector: u8) -> &'static str {
    match vector {
        0 => "divide-by-zero",
        3 => "breakpoint",
        6 => "invalid-opcode",
        8 => "double-fault",
        13 => "general-protection-fault",
        14 => "page-fault",
        _ => "exception",
    }
}

/// Register a handler for a CPU exception vector (0..=31). Returns the
/// previously registered handler, if any.
pub fn register_exception_handler(
    vector: u8,
    handler: ExceptionHandler,
) -> Option<ExceptionHandler> {
    let mut table = EXCEPTION_HANDLERS.lock();
    let slot = &mut table[vector as usize];
    core::mem::replace(slot, Some(handler))
}

/// Register a handler for an IRQ line (0..=15, i.e. vectors 32..=47).
pub fn register_irq_handler(irq: u8, handler: IrqHandler) -> Option<IrqHandler> {
    let mut table = IRQ_HANDLERS.lock();
    let slot = &mut table[irq as usize];
    core::mem::replace(slot, Some(handler))
}

pub fn unregister_irq_handler(irq: u8) {
    IRQ_HANDLERS.lock()[irq as usize] = None;
}

/// Called by the arch IDT stub for exception vectors. Breakpoint (3) always
/// logs and returns, since it's the debugger trap, not a fault. Anything
/// else with no registered handler is fatal and hands off to the panic
/// subsystem with the fault context.
pub fn dispatch_exception(frame: &TrapFrame) {
    let handler = EXCEPTION_HANDLERS.lock()[frame.vector as usize];
    match handler {
        Some(f) => f(frame),
        None if frame.vector == 3 => {
            log::info!("breakpoint at {:#x}", frame.instruction_pointer);
        }
        None => crate::panic::fault(exception_name(frame.vector), frame),
    }
}

/// Called by the arch IDT stub for IRQ vectors. Per spec.md §4.3, EOI is
/// always sent before the handler runs, so a misbehaving handler can never
/// wedge the PIC.
pub fn dispatch_irq(irq: u8) {
    arch::cur::pic::send_eoi(irq);
    if let Some(handler) = IRQ_HANDLERS.lock()[irq as usize] {
        handler();
    }
}
