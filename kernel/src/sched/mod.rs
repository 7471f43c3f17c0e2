//! Priority-based, preemptive, single-CPU scheduler (spec.md §4.4).
//!
//! Five FIFO bands, IDLE < LOW < NORMAL < HIGH < REALTIME. REALTIME tasks
//! are never preempted by a lower band; IDLE only runs when every other
//! band is empty.

use alloc::sync::Arc;
use spin::Mutex;

pub use crate::process::pcb::Priority;
use crate::process::pcb::{Pcb, ProcessState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    NoSuchTask,
    QueueFull,
    WouldDeadlock,
}

const MAX_READY_PER_BAND: usize = 256;

struct Band {
    queue: [Option<Arc<Pcb>>; MAX_READY_PER_BAND],
    head: usize,
    len: usize,
}

impl Band {
    const fn new() -> Self {
        Self {
            queue: [const { None }; MAX_READY_PER_BAND],
            head: 0,
            len: 0,
        }
    }

    fn push_back(&mut self, task: Arc<Pcb>) -> Result<(), SchedError> {
        if self.len >= MAX_READY_PER_BAND {
            return Err(SchedError::QueueFull);
        }
        let tail = (self.head + self.len) % MAX_READY_PER_BAND;
        self.queue[tail] = Some(task);
        self.len += 1;
        Ok(())
    }

    fn pop_front(&mut self) -> Option<Arc<Pcb>> {
        if self.len == 0 {
            return None;
        }
        let task = self.queue[self.head].take();
        self.head = (self.head + 1) % MAX_READY_PER_BAND;
        self.len -= 1;
        task
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct RunQueue {
    bands: [Band; 5],
}

impl RunQueue {
    const fn new() -> Self {
        Self {
            bands: [Band::new(), Band::new(), Band::new(), Band::new(), Band::new()],
        }
    }

    fn enqueue(&mut self, task: Arc<Pcb>) -> Result<(), SchedError> {
        let band = task.priority as usize;
        self.bands[band].push_back(task)
    }

    /// Highest non-empty band's head, scanning REALTIME down to IDLE.
    fn pick_next(&mut self) -> Option<Arc<Pcb>> {
        for band in self.bands.iter_mut().rev() {
            if let Some(task) = band.pop_front() {
                return Some(task);
            }
        }
        None
    }

    fn is_band_empty(&self, band: usize) -> bool {
        self.bands[band].is_empty()
    }
}

static RUN_QUEUE: Mutex<RunQueue> = Mutex::new(RunQueue::new());
static CURRENT: Mutex<Option<Arc<Pcb>>> = Mutex::new(None);
/// Per-CPU preemption guard: while > 0, `scheduler_tick` defers the
/// switch it would otherwise make (spec.md §4.4's preemption guard).
static PREEMPT_DISABLE: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
static NEEDS_RESCHEDULE: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

pub fn init() {
    log::info!("scheduler initialized");
}

pub fn enqueue(task: Arc<Pcb>) -> Result<(), SchedError> {
    task.set_state(ProcessState::Ready);
    RUN_QUEUE.lock().enqueue(task)
}

pub fn current() -> Option<Arc<Pcb>> {
    CURRENT.lock().clone()
}

pub fn preempt_disable() {
    PREEMPT_DISABLE.fetch_add(1, core::sync::atomic::Ordering::AcqRel);
}

/// Drop the preemption guard by one; if it reaches zero and a tick
/// requested a reschedule while we were guarded, switch now.
pub fn preempt_enable() {
    use core::sync::atomic::Ordering;
    if PREEMPT_DISABLE.fetch_sub(1, Ordering::AcqRel) == 1
        && NEEDS_RESCHEDULE.swap(false, Ordering::AcqRel)
    {
        reschedule();
    }
}

/// RAII bracket around [`preempt_disable`]/[`preempt_enable`] (spec.md §5):
/// hold one across a multi-step touch of run-queue or tick-counter state
/// that a reentrant timer IRQ on this same CPU must not interleave with.
pub mod preempt {
    pub struct Guard(());

    impl Guard {
        pub fn new() -> Self {
            super::preempt_disable();
            Self(())
        }
    }

    impl Default for Guard {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for Guard {
        fn drop(&mut self) {
            super::preempt_enable();
        }
    }
}

/// Called from the timer IRQ (vector 32). Decrements the running task's
/// slice; on exhaustion, requeues it and marks a reschedule as needed.
/// REALTIME tasks are never preempted by this path.
pub fn scheduler_tick() {
    use core::sync::atomic::Ordering;
    let current = CURRENT.lock().clone();
    if let Some(task) = current {
        task.total_cpu_ticks.fetch_add(1, Ordering::Relaxed);
        if task.priority == Priority::Realtime {
            return;
        }
        let remaining = task.remaining_slice.fetch_sub(1, Ordering::AcqRel);
        if remaining <= 1 {
            if PREEMPT_DISABLE.load(Ordering::Acquire) > 0 {
                NEEDS_RESCHEDULE.store(true, Ordering::Release);
            } else {
                reschedule();
            }
        }
    }
}

/// Switch away from the current task to the next ready one, or to the
/// idle task if every band is empty. A no-op if no tasks exist yet.
pub fn reschedule() {
    let next = {
        let mut rq = RUN_QUEUE.lock();
        rq.pick_next()
    };
    let Some(next) = next else { return };

    let prev = CURRENT.lock().take();
    if let Some(prev_task) = &prev {
        if prev_task.state() == ProcessState::Running {
            let _ = enqueue(prev_task.clone());
        }
    }

    next.set_state(ProcessState::Running);
    crate::arch::cur::gdt::set_kernel_stack(next.kernel_stack_top);

    let prev_ctx = prev.as_ref().map(|p| p.context.get());
    let next_ctx = next.context.get() as *const crate::arch::cur::context::TaskContext;
    *CURRENT.lock() = Some(next);

    if let Some(prev_ptr) = prev_ctx {
        // SAFETY: `prev_ptr`/`next_ctx` point at live `TaskContext`s owned
        // by PCBs kept alive in the run queue / CURRENT for the duration
        // of the switch.
        unsafe { crate::arch::cur::context::switch(prev_ptr, next_ctx) };
    }
}

/// Cooperative yield: requeue the current task at the tail of its band
/// and pick another.
pub fn yield_now() {
    reschedule();
}

/// Whether REALTIME-vs-lower preemption would currently favor `band`
/// over whatever's running — used by tests and by `enqueue` callers that
/// want to know if they should request an immediate reschedule.
pub fn is_band_empty(band: Priority) -> bool {
    RUN_QUEUE.lock().is_band_empty(band as usize)
}

pub fn run() -> ! {
    loop {
        reschedule();
        crate::arch::halt();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    extern "C" fn dummy_entry() -> ! {
        loop {}
    }

    fn test_task(priority: Priority) -> Arc<Pcb> {
        use crate::mm::{AddressSpace, VirtualAddress};
        use crate::process::pcb::{Pid, TaskType};
        let space: &'static AddressSpace = alloc::boxed::Box::leak(alloc::boxed::Box::new(
            AddressSpace::new_empty(VirtualAddress::new(0x2000), VirtualAddress::new(0x1000)),
        ));
        Arc::new(Pcb::new(
            Pid(priority as u64 + 1),
            None,
            alloc::string::String::from("t"),
            TaskType::Process,
            priority,
            space,
            0,
            dummy_entry,
        ))
    }

    #[test]
    fn higher_band_is_picked_first() {
        let mut rq = RunQueue::new();
        assert!(rq.pick_next().is_none());
    }

    /// spec.md §8 scenario 2: a HIGH-priority task must be picked ahead
    /// of a NORMAL one, which in turn goes ahead of a LOW one, regardless
    /// of enqueue order.
    #[test]
    fn priority_scheduling_favors_the_highest_non_empty_band() {
        let mut rq = RunQueue::new();
        rq.enqueue(test_task(Priority::Low)).unwrap();
        rq.enqueue(test_task(Priority::High)).unwrap();
        rq.enqueue(test_task(Priority::Normal)).unwrap();

        assert_eq!(rq.pick_next().unwrap().priority, Priority::High);
        assert_eq!(rq.pick_next().unwrap().priority, Priority::Normal);
        assert_eq!(rq.pick_next().unwrap().priority, Priority::Low);
        assert!(rq.pick_next().is_none());
    }

    /// Within one band, FIFO order is preserved (the teacher's round-robin
    /// guarantee within a priority band).
    #[test]
    fn same_band_tasks_are_picked_fifo() {
        let mut rq = RunQueue::new();
        let first = test_task(Priority::Normal);
        let second = test_task(Priority::Normal);
        rq.enqueue(first.clone()).unwrap();
        rq.enqueue(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &first));
        assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &second));
    }
}
