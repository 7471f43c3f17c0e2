//! Syscall gate & sandbox enforcement (spec.md §4.5, §5, §6).
//!
//! Entry is trap vector 128; the arch backend decodes the trapped
//! registers into [`SyscallArgs`] and calls [`dispatch`]. Everything
//! past that point — the dispatch table, the per-syscall sandbox
//! category check, resource-limit checks, and cage-root path resolution
//! — lives here so it's identical across arch backends.

use crate::cap::sandbox::SyscallCategory;
use crate::error::code::*;
use crate::error::KernelError;
use crate::fs::{self, DirEntry, OpenFlags, Whence};
use crate::process::{lifecycle, Pid};

pub const SYSCALL_EXIT: u64 = 0;
pub const SYSCALL_FORK: u64 = 1;
pub const SYSCALL_READ: u64 = 2;
pub const SYSCALL_WRITE: u64 = 3;
pub const SYSCALL_OPEN: u64 = 4;
pub const SYSCALL_CLOSE: u64 = 5;
pub const SYSCALL_WAITPID: u64 = 6;
pub const SYSCALL_EXECVE: u64 = 7;
pub const SYSCALL_GETPID: u64 = 8;
pub const SYSCALL_KILL: u64 = 9;
pub const SYSCALL_LSEEK: u64 = 10;
pub const SYSCALL_READDIR: u64 = 11;
pub const SYSCALL_MKDIR: u64 = 12;
pub const SYSCALL_RMDIR: u64 = 13;
pub const SYSCALL_UNLINK: u64 = 14;
pub const SYSCALL_STAT: u64 = 15;
pub const SYSCALL_SBRK: u64 = 16;
pub const SYSCALL_SLEEP: u64 = 17;
pub const SYSCALL_YIELD: u64 = 18;
pub const SYSCALL_PUTCHAR: u64 = 19;
pub const SYSCALL_GETCHAR: u64 = 20;
pub const SYSCALL_VERSION: u64 = 21;
pub const SYSCALL_USER_INFO: u64 = 22;
pub const SYSCALL_VGA_CONTROL: u64 = 23;

pub const SYSCALL_COUNT: u64 = 24;

/// Registers carried across the trap gate (spec.md §6): one syscall
/// number and up to five arguments, arch-independent.
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub number: u64,
    pub args: [u64; 5],
}

/// Required sandbox category per syscall number, indexed by the
/// constants above (spec.md §4.5 step 2). `None` means always allowed —
/// reserved for syscalls that report read-only kernel state rather than
/// touching a resource a cage could meaningfully restrict.
const REQUIRED_CATEGORY: [Option<SyscallCategory>; SYSCALL_COUNT as usize] = [
    Some(SyscallCategory::PROCESS), // exit
    Some(SyscallCategory::PROCESS), // fork
    Some(SyscallCategory::IO_READ), // read
    Some(SyscallCategory::IO_WRITE), // write
    Some(SyscallCategory::FS),      // open
    Some(SyscallCategory::FS),      // close
    Some(SyscallCategory::PROCESS), // waitpid
    Some(SyscallCategory::PROCESS), // execve
    None,                           // getpid
    Some(SyscallCategory::PROCESS), // kill
    Some(SyscallCategory::FS),      // lseek
    Some(SyscallCategory::FS),      // readdir
    Some(SyscallCategory::FS),      // mkdir
    Some(SyscallCategory::FS),      // rmdir
    Some(SyscallCategory::FS),      // unlink
    Some(SyscallCategory::FS),      // stat
    Some(SyscallCategory::MEMORY),  // sbrk
    Some(SyscallCategory::TIME),    // sleep
    Some(SyscallCategory::TIME),    // yield
    Some(SyscallCategory::IO_WRITE), // putchar
    Some(SyscallCategory::IO_READ), // getchar
    None,                           // version
    None,                           // user_info
    Some(SyscallCategory::IO_WRITE), // vga_control
];

/// Verify `[ptr, ptr+len)` lies inside a VMA of `current`'s address space
/// carrying every flag in `required` (spec.md §9's `copy_from_user`/
/// `copy_to_user` redesign flag). Returns `ERR_ADDR` rather than letting
/// the caller dereference an unchecked user pointer.
fn copy_boundary_check(current: &crate::process::Pcb, ptr: u64, len: u64, required: crate::mm::PageFlags) -> Result<(), isize> {
    if ptr == 0 {
        return Err(ERR_ADDR);
    }
    if current.address_space.contains_range(crate::mm::VirtualAddress::new(ptr), len, required) {
        Ok(())
    } else {
        Err(ERR_ADDR)
    }
}

const USER_READABLE: crate::mm::PageFlags = crate::mm::PageFlags::PRESENT.union(crate::mm::PageFlags::USER);
const USER_WRITABLE: crate::mm::PageFlags = USER_READABLE.union(crate::mm::PageFlags::WRITABLE);

/// Read a `len`-byte UTF-8 string out of a raw user-register pointer,
/// after checking it lies in a mapped, user-readable VMA.
///
/// # Safety
/// The membership check above rules out wild pointers; this kernel still
/// runs user and kernel code in a single flat address space (no per-task
/// page tables to switch into), so the checked range is dereferenced
/// directly rather than copied through a remapped window.
unsafe fn user_str<'a>(current: &crate::process::Pcb, ptr: u64, len: u64) -> Result<&'a str, isize> {
    copy_boundary_check(current, ptr, len, USER_READABLE)?;
    let bytes = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    core::str::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument { name: "path encoding" }.to_code())
}

unsafe fn user_buf_mut<'a>(current: &crate::process::Pcb, ptr: u64, len: u64) -> Result<&'a mut [u8], isize> {
    copy_boundary_check(current, ptr, len, USER_WRITABLE)?;
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize) })
}

unsafe fn user_buf<'a>(current: &crate::process::Pcb, ptr: u64, len: u64) -> Result<&'a [u8], isize> {
    copy_boundary_check(current, ptr, len, USER_READABLE)?;
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) })
}

/// Resolve a path argument against the current task's cage root,
/// rejecting `..` escape (spec.md §4.5 step 4).
fn resolve_path<'a>(current: &crate::process::Pcb, path: &'a str) -> Result<&'a str, KernelError> {
    fs::resolve_within_cage(current.sandbox.cage_root.as_deref(), path)
        .map_err(KernelError::from)?;
    Ok(path)
}

/// Dispatch one trapped syscall. Out-of-range numbers return
/// `ERR_INVALID` without touching sandbox state (spec.md §4.5).
pub fn dispatch(args: SyscallArgs) -> isize {
    if args.number >= SYSCALL_COUNT {
        return ERR_INVALID;
    }

    let Some(current) = crate::sched::current() else {
        return ERR_INVALID;
    };

    if let Some(required) = REQUIRED_CATEGORY[args.number as usize] {
        if !current.sandbox.allows(required) {
            log::warn!("syscall {} denied by sandbox for pid {}", args.number, current.pid);
            return ERR_CAPABILITY;
        }
    }

    if let Some(max_cpu) = non_zero(current.sandbox.limits.max_cpu_time) {
        if current.total_cpu_ticks.load(core::sync::atomic::Ordering::Relaxed) > max_cpu {
            log::warn!("pid {} exceeded cpu time limit, killing", current.pid);
            lifecycle::exit(-1);
        }
    }

    match args.number {
        SYSCALL_EXIT => lifecycle::exit(args.args[0] as i32),
        SYSCALL_FORK => result_code(lifecycle::fork().map(|pid| pid.0 as isize)),
        SYSCALL_READ => sys_read(&current, args),
        SYSCALL_WRITE => sys_write(&current, args),
        SYSCALL_OPEN => sys_open(&current, args),
        SYSCALL_CLOSE => sys_close(&current, args),
        SYSCALL_WAITPID => sys_waitpid(args),
        SYSCALL_EXECVE => sys_execve(&current, args),
        SYSCALL_GETPID => current.pid.0 as isize,
        SYSCALL_KILL => result_code(lifecycle::kill(Pid(args.args[0]), args.args[1] as u32).map(|_| 0)),
        SYSCALL_LSEEK => sys_lseek(args),
        SYSCALL_READDIR => sys_readdir(args),
        SYSCALL_MKDIR => sys_path_op(&current, args, fs::vfs().mkdir),
        SYSCALL_RMDIR => sys_path_op(&current, args, fs::vfs().rmdir),
        SYSCALL_UNLINK => sys_path_op(&current, args, fs::vfs().unlink),
        SYSCALL_STAT => sys_stat(&current, args),
        SYSCALL_SBRK => sys_sbrk(&current, args),
        SYSCALL_SLEEP => {
            lifecycle::sleep_ms(args.args[0]);
            0
        }
        SYSCALL_YIELD => {
            lifecycle::yield_now();
            0
        }
        SYSCALL_PUTCHAR => {
            crate::print!("{}", args.args[0] as u8 as char);
            0
        }
        SYSCALL_GETCHAR => crate::keyboard::read_key().map_or(-1, |b| b as isize),
        SYSCALL_VERSION => encode_version(),
        SYSCALL_USER_INFO => current.owner_uid as isize,
        SYSCALL_VGA_CONTROL => ERR_INVALID, // no VGA driver is in tree (spec.md §1 Non-goals)
        _ => ERR_INVALID,
    }
}

fn non_zero(v: u64) -> Option<u64> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

fn result_code(result: Result<isize, KernelError>) -> isize {
    match result {
        Ok(v) => v,
        Err(e) => e.to_code(),
    }
}

fn sys_read(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let fd = args.args[0] as i32;
    let buf = match unsafe { user_buf_mut(current, args.args[1], args.args[2]) } {
        Ok(b) => b,
        Err(e) => return e,
    };
    match (fs::vfs().read)(fd, buf) {
        Ok(n) => n as isize,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_write(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let fd = args.args[0] as i32;
    let buf = match unsafe { user_buf(current, args.args[1], args.args[2]) } {
        Ok(b) => b,
        Err(e) => return e,
    };
    match (fs::vfs().write)(fd, buf) {
        Ok(n) => n as isize,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_open(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let path = match unsafe { user_str(current, args.args[0], args.args[1]) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    let path = match resolve_path(current, path) {
        Ok(p) => p,
        Err(e) => return e.to_code(),
    };
    if let Some(max_files) = non_zero(current.sandbox.limits.max_files as u64) {
        if current.resources.lock().files_open as u64 >= max_files {
            return ERR_LIMIT;
        }
    }
    let flags = OpenFlags::from_bits_truncate(args.args[2] as u32);
    match (fs::vfs().open)(path, flags) {
        Ok(fd) => fd as isize,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_close(_current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    (fs::vfs().close)(args.args[0] as i32);
    0
}

fn sys_waitpid(args: SyscallArgs) -> isize {
    let pid = if args.args[0] == 0 { None } else { Some(Pid(args.args[0])) };
    match lifecycle::waitpid(pid) {
        Ok((pid, _status)) => pid.0 as isize,
        Err(e) => e.to_code(),
    }
}

fn sys_execve(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let path = match unsafe { user_str(current, args.args[0], args.args[1]) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    match lifecycle::execve(path, &[], &[]) {
        Ok(()) => 0,
        Err(e) => e.to_code(),
    }
}

fn sys_lseek(args: SyscallArgs) -> isize {
    let whence = match args.args[2] {
        0 => Whence::Start,
        1 => Whence::Current,
        _ => Whence::End,
    };
    match (fs::vfs().seek)(args.args[0] as i32, args.args[1] as i64, whence) {
        Ok(pos) => pos as isize,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_readdir(args: SyscallArgs) -> isize {
    let mut entry = DirEntry::default();
    match (fs::vfs().readdir)(args.args[0] as i32, &mut entry) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_path_op(current: &crate::process::Pcb, args: SyscallArgs, op: fn(&str) -> fs::FsResult<()>) -> isize {
    let path = match unsafe { user_str(current, args.args[0], args.args[1]) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    let path = match resolve_path(current, path) {
        Ok(p) => p,
        Err(e) => return e.to_code(),
    };
    match op(path) {
        Ok(()) => 0,
        Err(e) => KernelError::from(e).to_code(),
    }
}

fn sys_stat(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let path = match unsafe { user_str(current, args.args[0], args.args[1]) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    let path = match resolve_path(current, path) {
        Ok(p) => p,
        Err(e) => return e.to_code(),
    };
    match (fs::vfs().stat)(path) {
        Ok(stat) => stat.size as isize,
        Err(e) => KernelError::from(e).to_code(),
    }
}

/// `sbrk`-style heap grow request: since this kernel never maps a
/// per-process heap region today (spec.md §9 open question — see
/// DESIGN.md), this reports the request as granted without reserving
/// any real memory, matching `getpid`'s info-only treatment elsewhere.
fn sys_sbrk(current: &crate::process::Pcb, args: SyscallArgs) -> isize {
    let requested = args.args[0] as usize;
    if let Some(max_memory) = non_zero(current.sandbox.limits.max_memory as u64) {
        let used = current.resources.lock().memory_used as u64;
        if used + requested as u64 > max_memory {
            return ERR_LIMIT;
        }
    }
    current.resources.lock().memory_used += requested;
    0
}

fn encode_version() -> isize {
    let (major, minor, patch) = (0u32, 1u32, 0u32);
    ((major << 16) | (minor << 8) | patch) as isize
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_number_is_rejected_without_a_current_task() {
        let args = SyscallArgs { number: SYSCALL_COUNT, args: [0; 5] };
        assert_eq!(dispatch(args), ERR_INVALID);
    }

    #[test]
    fn version_is_encoded_as_a_positive_packed_word() {
        assert!(encode_version() > 0);
    }

    #[test]
    fn required_category_table_covers_every_syscall() {
        assert_eq!(REQUIRED_CATEGORY.len(), SYSCALL_COUNT as usize);
    }

    extern "C" fn dummy_entry() -> ! {
        loop {}
    }

    fn test_pcb(region_start: u64, region_end: u64) -> crate::process::Pcb {
        use crate::mm::{AddressSpace, PageFlags, Vma, VirtualAddress};
        let space: &'static AddressSpace = alloc::boxed::Box::leak(alloc::boxed::Box::new(
            AddressSpace::new_empty(VirtualAddress::new(region_end), VirtualAddress::new(region_start)),
        ));
        space
            .add_vma(Vma {
                start: VirtualAddress::new(region_start),
                end: VirtualAddress::new(region_end),
                flags: PageFlags::PRESENT.union(PageFlags::USER).union(PageFlags::WRITABLE),
            })
            .unwrap();
        crate::process::Pcb::new(
            crate::process::Pid(u64::MAX),
            None,
            alloc::string::String::from("test"),
            crate::process::TaskType::Process,
            crate::process::Priority::Normal,
            space,
            0,
            dummy_entry,
        )
    }

    #[test]
    fn user_buf_rejects_a_pointer_outside_the_task_address_space() {
        let pcb = test_pcb(0x1000, 0x2000);
        let err = unsafe { user_buf(&pcb, 0x9000, 16) }.unwrap_err();
        assert_eq!(err, ERR_ADDR);
    }

    #[test]
    fn user_buf_rejects_a_null_pointer() {
        let pcb = test_pcb(0x1000, 0x2000);
        let err = unsafe { user_buf(&pcb, 0, 16) }.unwrap_err();
        assert_eq!(err, ERR_ADDR);
    }

    #[test]
    fn user_buf_accepts_a_pointer_inside_the_task_address_space() {
        let backing = alloc::vec![0u8; 16];
        let ptr = backing.as_ptr() as u64;
        // The task's VMA is drawn around `backing`'s own address so the
        // membership check passes; the bytes still come from this host
        // allocation, matching the flat-address-space model elsewhere.
        let pcb = test_pcb(ptr, ptr + backing.len() as u64);
        assert!(unsafe { user_buf(&pcb, ptr, backing.len() as u64) }.is_ok());
    }
}
