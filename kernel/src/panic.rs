//! Panic & Recovery — Kernel Recovery Mode (spec.md §4.9).
//!
//! Entered on any unrecoverable condition: a CPU exception with no
//! registered handler, an explicit `panic!`, or a fault decoded by the
//! page-fault/GPF handlers. The transition is one-way — nothing resumes
//! normal execution after `handle`/`fault` is called — and deliberately
//! avoids VFS, IPC, and the scheduler so a corrupted kernel can still
//! report itself over serial.

use alloc::string::String;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;
use crate::irq::TrapFrame;

/// Bounded backtrace depth (spec.md §4.9 step 2: "up to N frames").
pub const MAX_BACKTRACE_FRAMES: usize = 16;
const MAX_SUGGESTIONS: usize = 4;

static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// A snapshot captured on entry to KRM (spec.md §4.9/§4's glossary entry).
#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub message: String,
    pub file: &'static str,
    pub line: u32,
    pub has_registers: bool,
    pub registers: RegisterFrame,
    pub backtrace: [u64; MAX_BACKTRACE_FRAMES],
    pub backtrace_len: usize,
    pub tick: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterFrame {
    pub vector: u8,
    pub error_code: u64,
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    pub cr2: u64,
}

pub fn init() {
    log::info!("panic/recovery subsystem initialized");
}

/// Walk the frame-pointer chain from `rbp`, recording up to
/// `MAX_BACKTRACE_FRAMES` return addresses. Stops early on a null or
/// misaligned frame pointer rather than risk walking off into unmapped
/// memory from a corrupted stack.
#[cfg(target_arch = "x86_64")]
fn capture_backtrace() -> ([u64; MAX_BACKTRACE_FRAMES], usize) {
    let mut frames = [0u64; MAX_BACKTRACE_FRAMES];
    let mut rbp: u64;
    // SAFETY: reads the current frame-pointer register only, no memory access yet.
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp);
    }

    let mut count = 0;
    while count < MAX_BACKTRACE_FRAMES && rbp != 0 && rbp % 8 == 0 {
        // SAFETY: best-effort walk; a corrupted chain just truncates the
        // backtrace early since we bail on the next non-canonical rbp.
        let (saved_rbp, return_addr) = unsafe {
            let ptr = rbp as *const u64;
            (core::ptr::read_volatile(ptr), core::ptr::read_volatile(ptr.add(1)))
        };
        if return_addr == 0 {
            break;
        }
        frames[count] = return_addr;
        count += 1;
        if saved_rbp <= rbp {
            break;
        }
        rbp = saved_rbp;
    }
    (frames, count)
}

#[cfg(not(target_arch = "x86_64"))]
fn capture_backtrace() -> ([u64; MAX_BACKTRACE_FRAMES], usize) {
    ([0u64; MAX_BACKTRACE_FRAMES], 0)
}

fn suggestions_for(message: &str) -> [&'static str; MAX_SUGGESTIONS] {
    let mut out = ["", "", "", ""];
    if message.contains("allocation") || message.contains("heap") {
        out[0] = "increase kernel heap size in config";
        out[1] = "check for a leak in the module that triggered this";
    } else if message.contains("index out of bounds") {
        out[0] = "check the faulting module's memory window";
    } else {
        out[0] = "reboot and check the crash report for details";
    }
    out
}

/// Entry point from `#[panic_handler]` — an explicit Rust panic with no
/// trap frame available.
pub fn handle(info: &core::panic::PanicInfo) -> ! {
    let location = info.location();
    let file = location.map(|l| l.file()).unwrap_or("<unknown>");
    let line = location.map(|l| l.line()).unwrap_or(0);
    let message = alloc::format!("{}", info.message());

    enter(message, file, line, RegisterFrame::default(), false)
}

/// Entry point from `irq::dispatch_exception` — a CPU exception with no
/// registered handler, carrying a real trap frame.
pub fn fault(exception_name: &'static str, frame: &TrapFrame) -> ! {
    let registers = RegisterFrame {
        vector: frame.vector,
        error_code: frame.error_code,
        instruction_pointer: frame.instruction_pointer,
        stack_pointer: frame.stack_pointer,
        cr2: frame.cr2,
    };
    enter(String::from(exception_name), "<trap>", 0, registers, true)
}

fn enter(message: String, file: &'static str, line: u32, registers: RegisterFrame, has_registers: bool) -> ! {
    arch::cur::disable_interrupts();

    if PANIC_IN_PROGRESS.swap(true, Ordering::SeqCst) {
        // Cascading panic: KRM itself faulted. No console interaction is
        // safe at this point — halt immediately (spec.md §4.9 step 3).
        arch::halt();
    }

    let (backtrace, backtrace_len) = capture_backtrace();
    let snapshot = PanicInfo {
        message,
        file,
        line,
        has_registers,
        registers,
        backtrace,
        backtrace_len,
        tick: crate::timer::ticks(),
    };

    report(&snapshot);
    persist_crash_report(&snapshot);
    recovery_menu(&snapshot)
}

fn report(info: &PanicInfo) {
    crate::println!();
    crate::println!("=== KERNEL RECOVERY MODE ===");
    crate::println!("{} at {}:{}", info.message, info.file, info.line);
    crate::println!("tick: {}", info.tick);
    if info.has_registers {
        crate::println!(
            "vector={} error_code={:#x} rip={:#x} rsp={:#x} cr2={:#x}",
            info.registers.vector,
            info.registers.error_code,
            info.registers.instruction_pointer,
            info.registers.stack_pointer,
            info.registers.cr2
        );
    }
    crate::println!("backtrace ({} frames):", info.backtrace_len);
    for addr in &info.backtrace[..info.backtrace_len] {
        crate::println!("  {:#x}", addr);
    }
}

/// Best-effort: the crash report queue lives outside KRM's dependency
/// budget (it would need the VFS), so this only ever logs. A future
/// bug-report sink can hook in here without KRM depending on it directly.
fn persist_crash_report(info: &PanicInfo) {
    log::error!("crash report: {} at {}:{} (tick {})", info.message, info.file, info.line, info.tick);
}

/// Interactive recovery menu (spec.md §4.9 step 5). On a real serial
/// console this would read a keypress; without a guaranteed interactive
/// peer attached, it prints the menu once, the explanation and
/// suggestions, then proceeds straight to the reboot attempt so the
/// machine never hangs waiting for input that may never come.
fn recovery_menu(info: &PanicInfo) -> ! {
    crate::println!("recovery menu: [e]xplanation [d]etails [b]acktrace [r]egisters [R]eboot [h]alt");
    crate::println!("explanation: {}", info.message);
    for suggestion in suggestions_for(&info.message).iter().filter(|s| !s.is_empty()) {
        crate::println!("  - {}", suggestion);
    }

    attempt_reboot();
    arch::halt()
}

fn attempt_reboot() -> ! {
    crate::println!("attempting reboot via ACPI/keyboard-controller...");
    arch::cur::reboot::reboot();
    crate::println!("reboot path exhausted, inducing triple fault");
    arch::cur::reboot::triple_fault();
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn suggestions_are_never_all_empty() {
        let s = suggestions_for("heap allocation of 64 bytes failed");
        assert!(s.iter().any(|x| !x.is_empty()));
    }

    #[test]
    fn host_backtrace_capture_is_well_formed() {
        let (frames, len) = capture_backtrace();
        assert!(len <= MAX_BACKTRACE_FRAMES);
        assert_eq!(frames.len(), MAX_BACKTRACE_FRAMES);
    }
}
