//! Reboot paths used only by KRM (spec.md §4.9 step 5): first the
//! keyboard-controller pulse line, then a deliberate triple fault if the
//! machine is still running.

use super::port;

const KBD_STATUS_PORT: u16 = 0x64;
const KBD_DATA_PORT: u16 = 0x60;
const KBD_RESET_PULSE: u8 = 0xFE;

/// Pulse the CPU reset line via the 8042 keyboard controller. Returns if
/// the controller doesn't respond (emulators without a PS/2 controller,
/// or real hardware where this path is disabled) so the caller can fall
/// back to a triple fault.
pub fn reboot() {
    // SAFETY: reading port 0x64 only observes the controller's input-buffer
    // status bit; writing 0xFE to it is the documented reset pulse.
    unsafe {
        for _ in 0..0x1000 {
            if port::inb(KBD_STATUS_PORT) & 0x02 == 0 {
                break;
            }
        }
        port::outb(KBD_STATUS_PORT, KBD_RESET_PULSE);
    }
    let _ = KBD_DATA_PORT;
}

/// Force a triple fault: load a zero-limit IDT so the next exception has
/// nowhere to dispatch to, then trigger one. There is no return from this
/// function on real hardware; QEMU without `-no-reboot` restarts, bare
/// metal resets.
pub fn triple_fault() -> ! {
    use x86_64::instructions::tables::lidt;
    use x86_64::structures::DescriptorTablePointer;
    use x86_64::VirtAddr;

    let zero_idt = DescriptorTablePointer {
        limit: 0,
        base: VirtAddr::new(0),
    };
    // SAFETY: this is an intentionally invalid IDT used only to force a
    // fault the CPU cannot dispatch, as a last-resort reboot mechanism.
    unsafe {
        lidt(&zero_idt);
    }
    x86_64::instructions::interrupts::int3();
    loop {
        x86_64::instructions::hlt();
    }
}
