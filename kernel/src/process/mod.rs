//! Process management: the PCB, the global process table, and lifecycle
//! operations (spec.md §4.4).

pub mod lifecycle;
pub mod pcb;
pub mod table;

pub use pcb::{Pcb, Pid, Priority, ProcessState, TaskType, MAX_OPEN_FILES};

pub fn init() {
    log::info!("process table initialized");
}
