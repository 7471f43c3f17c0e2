//! Process Control Block (spec.md §3, §4.4).

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::cap::sandbox::Sandbox;
use crate::mm::AddressSpace;

pub const MAX_OPEN_FILES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Sleeping = 3,
    Zombie = 4,
    Dead = 5,
}

impl ProcessState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::Sleeping,
            4 => Self::Zombie,
            _ => Self::Dead,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Realtime = 4,
}

pub const PRIORITY_BANDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Process,
    Kernel,
    Shell,
    Command,
    Service,
    Driver,
    Module,
    Subsystem,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceCounters {
    pub memory_used: usize,
    pub files_open: usize,
    pub children_count: usize,
    pub total_time_ticks: u64,
}

/// Per-fd table slot. `None` means the descriptor is free.
#[derive(Clone, Copy, Default)]
pub struct FileDescriptor {
    pub handle: Option<u64>,
}

pub struct Pcb {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: String,
    pub task_type: TaskType,
    pub priority: Priority,
    state: AtomicU32,
    pub remaining_slice: AtomicU32,
    pub total_cpu_ticks: AtomicU64,
    /// Saved callee-saved registers/stack pointer. Not behind a lock: a
    /// task's own context is only ever touched by `sched::reschedule`
    /// while interrupts are disabled on this single CPU, and a context
    /// switch cannot itself be preempted.
    pub context: core::cell::UnsafeCell<crate::arch::cur::context::TaskContext>,
    pub address_space: &'static AddressSpace,
    pub kernel_stack_top: u64,
    /// Entry point this task was created with. Kept so `fork()` can start
    /// a child at the same entry as its parent rather than a hardcoded one.
    pub entry: extern "C" fn() -> !,
    pub user_stack_top: Mutex<u64>,
    pub fd_table: Mutex<[FileDescriptor; MAX_OPEN_FILES]>,
    pub sandbox: Sandbox,
    pub owner_uid: u32,
    pub resources: Mutex<ResourceCounters>,
    pub children: Mutex<Vec<Pid>>,
    pub wake_time: AtomicU64,
    pub exit_status: AtomicU32,
    pub mailbox: Mutex<crate::ipc::message::Mailbox>,
}

// SAFETY: `context` is only ever accessed by `sched::reschedule` on this
// single CPU with interrupts disabled for the duration of the access.
unsafe impl Sync for Pcb {}

impl Pcb {
    pub fn new(
        pid: Pid,
        parent: Option<Pid>,
        name: String,
        task_type: TaskType,
        priority: Priority,
        address_space: &'static AddressSpace,
        kernel_stack_top: u64,
        entry: extern "C" fn() -> !,
    ) -> Self {
        Self {
            pid,
            parent,
            name,
            task_type,
            priority,
            state: AtomicU32::new(ProcessState::Ready as u32),
            remaining_slice: AtomicU32::new(default_slice(priority)),
            total_cpu_ticks: AtomicU64::new(0),
            context: core::cell::UnsafeCell::new(crate::arch::cur::context::TaskContext::new(
                entry,
                kernel_stack_top,
            )),
            address_space,
            kernel_stack_top,
            entry,
            user_stack_top: Mutex::new(0),
            fd_table: Mutex::new([FileDescriptor::default(); MAX_OPEN_FILES]),
            sandbox: Sandbox::default(),
            owner_uid: 0,
            resources: Mutex::new(ResourceCounters::default()),
            children: Mutex::new(Vec::new()),
            wake_time: AtomicU64::new(0),
            exit_status: AtomicU32::new(0),
            mailbox: Mutex::new(crate::ipc::message::Mailbox::new()),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Allocate the lowest free file descriptor, or `None` if the table
    /// is full (spec.md §4.2's `MAX_OPEN_FILES` bound).
    pub fn alloc_fd(&self, handle: u64) -> Option<usize> {
        let mut table = self.fd_table.lock();
        let slot = table.iter().position(|fd| fd.handle.is_none())?;
        table[slot].handle = Some(handle);
        self.resources.lock().files_open += 1;
        Some(slot)
    }

    pub fn release_fd(&self, fd: usize) -> Option<u64> {
        let mut table = self.fd_table.lock();
        let handle = table.get_mut(fd)?.handle.take()?;
        let mut resources = self.resources.lock();
        resources.files_open = resources.files_open.saturating_sub(1);
        Some(handle)
    }
}

fn default_slice(priority: Priority) -> u32 {
    match priority {
        Priority::Idle => 1,
        Priority::Low => 5,
        Priority::Normal => 10,
        Priority::High => 15,
        Priority::Realtime => 20,
    }
}

static NEXT_PID: AtomicUsize = AtomicUsize::new(1);

/// Allocate a fresh PID. Monotonic for the lifetime of the boot session;
/// never reused, even after a process is reaped (spec.md §9 open
/// question, resolved in DESIGN.md).
pub fn alloc_pid() -> Pid {
    Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed) as u64)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn pids_are_monotonic_and_unique() {
        let a = alloc_pid();
        let b = alloc_pid();
        assert!(b.0 > a.0);
    }
}
