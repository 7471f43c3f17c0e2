//! Programmable Interval Timer bring-up and the process-wide tick
//! counter (spec.md §4.3's timer vector, §2.1 of the network-poll hook).

use core::sync::atomic::{AtomicU64, Ordering};

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
pub const TICKS_PER_SECOND: u64 = 100;
/// Every this many ticks, nudge the (external) network stack's poll hook.
const NETWORK_POLL_INTERVAL_TICKS: u64 = 10;

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Program PIT channel 0 for periodic interrupts at [`TICKS_PER_SECOND`]
/// Hz and register the IRQ0 handler that drives the scheduler.
pub fn init() {
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        use crate::arch::cur::port::outb;
        let divisor = (PIT_FREQUENCY_HZ as u64 / TICKS_PER_SECOND) as u16;
        // SAFETY: 0x43/0x40 are the PIT command/channel-0 ports; this is
        // the documented sequence for programming rate-generator mode.
        unsafe {
            outb(0x43, 0x36);
            outb(0x40, (divisor & 0xFF) as u8);
            outb(0x40, (divisor >> 8) as u8);
        }
    }
    crate::irq::register_irq_handler(0, on_tick);
    log::info!("PIT configured for {} ticks/sec", TICKS_PER_SECOND);
}

fn on_tick() {
    let tick = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    crate::sched::scheduler_tick();
    if tick % NETWORK_POLL_INTERVAL_TICKS == 0 {
        net_poll_hook::poll();
    }
    crate::process::table::wake_due(tick);
}

/// Stand-in for the external network stack's poll entry point. Real
/// drivers/net stack are out of scope (spec.md §1); this only documents
/// where the hook would be wired in.
mod net_poll_hook {
    pub fn poll() {}
}
