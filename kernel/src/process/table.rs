//! Global process table: every live PCB, keyed by PID.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

use super::pcb::{Pcb, Pid};

static TABLE: Mutex<BTreeMap<Pid, Arc<Pcb>>> = Mutex::new(BTreeMap::new());

pub fn insert(pcb: Arc<Pcb>) {
    TABLE.lock().insert(pcb.pid, pcb);
}

pub fn get(pid: Pid) -> Option<Arc<Pcb>> {
    TABLE.lock().get(&pid).cloned()
}

pub fn remove(pid: Pid) -> Option<Arc<Pcb>> {
    TABLE.lock().remove(&pid)
}

pub fn count() -> usize {
    TABLE.lock().len()
}

/// Move every SLEEPING task whose `wake_time` has passed back to READY.
/// Called from the timer IRQ; IRQ handlers may wake sleeping tasks but
/// must not themselves block (spec.md §6), which `sched::enqueue` upholds
/// by only ever pushing onto a lock-free-for-the-caller ready queue.
pub fn wake_due(tick: u64) {
    use super::pcb::ProcessState;
    let _guard = crate::sched::preempt::Guard::new();
    let due: alloc::vec::Vec<Arc<Pcb>> = TABLE
        .lock()
        .values()
        .filter(|p| {
            p.state() == ProcessState::Sleeping
                && p.wake_time.load(core::sync::atomic::Ordering::Acquire) <= tick
        })
        .cloned()
        .collect();
    for task in due {
        let _ = crate::sched::enqueue(task);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use super::super::pcb::{Priority, ProcessState, TaskType};

    #[test]
    fn missing_pid_returns_none() {
        assert!(get(Pid(999_999)).is_none());
    }

    extern "C" fn dummy_entry() -> ! {
        loop {}
    }

    fn sleeping_pcb(pid: Pid, wake_time: u64) -> Arc<Pcb> {
        use crate::mm::{AddressSpace, VirtualAddress};
        let space: &'static AddressSpace = alloc::boxed::Box::leak(alloc::boxed::Box::new(
            AddressSpace::new_empty(VirtualAddress::new(0x2000), VirtualAddress::new(0x1000)),
        ));
        let pcb = Pcb::new(
            pid,
            None,
            alloc::string::String::from("sleeper"),
            TaskType::Process,
            Priority::Normal,
            space,
            0,
            dummy_entry,
        );
        pcb.set_state(ProcessState::Sleeping);
        pcb.wake_time.store(wake_time, core::sync::atomic::Ordering::Release);
        Arc::new(pcb)
    }

    /// spec.md §8 scenario 3: a sleeper is left alone before its wake
    /// deadline and moved back to `Ready` exactly once the tick reaches it.
    #[test]
    fn wake_due_only_wakes_sleepers_whose_deadline_has_passed() {
        let pid = Pid(424_242);
        insert(sleeping_pcb(pid, 50));

        wake_due(49);
        assert_eq!(get(pid).unwrap().state(), ProcessState::Sleeping);

        wake_due(50);
        assert_eq!(get(pid).unwrap().state(), ProcessState::Ready);
    }
}
