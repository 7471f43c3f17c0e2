//! Crate-level integration tests for the cross-module scenarios of
//! spec.md §8 that are reachable through `aos_kernel`'s public API: the
//! sandbox blocking a forbidden syscall, and a module VM denying a call
//! outside its granted capability set.

use aos_kernel::cap::sandbox::SyscallCategory;
use aos_kernel::cap::CapabilityFlags;
use aos_kernel::error::code::ERR_CAPABILITY;
use aos_kernel::mm::{AddressSpace, PageFlags, Vma, VirtualAddress};
use aos_kernel::modvm::context::{api, MemView, ModuleContext};
use aos_kernel::modvm::{MemoryWindow, VmError};
use aos_kernel::process::{Pcb, Pid, Priority, TaskType};
use aos_kernel::sched;
use aos_kernel::syscall::{self, SyscallArgs, SYSCALL_WRITE};
use std::sync::Arc;

extern "C" fn dummy_entry() -> ! {
    loop {}
}

/// spec.md §8 scenario 4: a process sandboxed to `ALLOW_IO_READ |
/// ALLOW_TIME` calling `write(1, "x", 1)` gets denied before the write
/// ever reaches `sys_write`, let alone stdout.
#[test]
fn sandbox_blocks_a_syscall_outside_its_allowed_categories() {
    let space: &'static AddressSpace = Box::leak(Box::new(AddressSpace::new_empty(
        VirtualAddress::new(0x2000),
        VirtualAddress::new(0x1000),
    )));
    space
        .add_vma(Vma {
            start: VirtualAddress::new(0x1000),
            end: VirtualAddress::new(0x2000),
            flags: PageFlags::PRESENT.union(PageFlags::USER).union(PageFlags::WRITABLE),
        })
        .unwrap();

    let mut pcb = Pcb::new(
        Pid(9000),
        None,
        String::from("caged"),
        TaskType::Process,
        Priority::Normal,
        space,
        0,
        dummy_entry,
    );
    pcb.sandbox.allowed = SyscallCategory::IO_READ | SyscallCategory::TIME;
    let task = Arc::new(pcb);

    sched::enqueue(task).expect("run queue has room");
    sched::reschedule();
    assert!(sched::current().is_some(), "reschedule must hand off to the enqueued task");

    let write_args = SyscallArgs {
        number: SYSCALL_WRITE,
        args: [1, 0x1000, 1, 0, 0],
    };
    assert_eq!(syscall::dispatch(write_args), ERR_CAPABILITY);

    // The categories this cage *was* granted still work.
    let time_args = SyscallArgs {
        number: aos_kernel::syscall::SYSCALL_YIELD,
        args: [0, 0, 0, 0, 0],
    };
    assert_eq!(syscall::dispatch(time_args), 0);
}

/// spec.md §8 scenario 5: a module declaring only the `LOG` capability
/// gets `ERR_CAPABILITY` from `register_command`, not a silent success.
#[test]
fn module_without_command_capability_is_denied_register_cmd() {
    let mut ctx = ModuleContext::new(String::from("untrusted"), CapabilityFlags::LOG);

    let window = MemoryWindow {
        code_base: 0,
        code_len: 0,
        data_base: 0,
        data_len: 16,
        bss_base: 16,
        bss_len: 0,
    };
    let code: [u8; 0] = [];
    let mut data = [0u8; 16];
    let mut bss: [u8; 0] = [];
    let mut mem = MemView {
        window: &window,
        code: &code,
        data: &mut data,
        bss: &mut bss,
    };

    let mut stack = [0i32; 8];
    // REGISTER_CMD pops `len` then `addr`: push addr first, len last.
    stack[0] = 0;
    stack[1] = 0;
    let mut sp = 2usize;

    let result = ctx.call(api::REGISTER_CMD, &mut stack, &mut sp, &mut mem);
    assert_eq!(result, Err(VmError::CapabilityDenied));
    assert_eq!(result.unwrap_err().to_code(), ERR_CAPABILITY);

    // A capability the module *was* granted still goes through.
    stack[0] = 0;
    stack[1] = 4;
    sp = 2;
    assert!(ctx.call(api::LOG, &mut stack, &mut sp, &mut mem).is_ok());
}
