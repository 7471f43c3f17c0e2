//! Per-process sandbox ("cage") configuration (spec.md §3).

use alloc::string::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CageLevel {
    #[default]
    None,
    Light,
    Standard,
    Strict,
    Locked,
}

bitflags::bitflags! {
    /// Syscall categories the sandbox filter admits; checked against the
    /// required-mask table in `syscall::table` (spec.md §5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SyscallCategory: u32 {
        const IO_READ = 1 << 0;
        const IO_WRITE = 1 << 1;
        const PROCESS = 1 << 2;
        const TIME = 1 << 3;
        const FS = 1 << 4;
        const IPC = 1 << 5;
        const NET = 1 << 6;
        const MEMORY = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SandboxFlags: u32 {
        const READONLY = 1 << 0;
        const NOEXEC = 1 << 1;
        const NONET = 1 << 2;
        const IMMUTABLE = 1 << 3;
    }
}

/// Zero means unlimited, matching spec.md §3's resource-limit convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    pub max_memory: usize,
    pub max_files: usize,
    pub max_processes: usize,
    pub max_cpu_time: u64,
}

#[derive(Debug, Default)]
pub struct Sandbox {
    pub cage_level: CageLevel,
    pub allowed: SyscallCategory,
    pub cage_root: Option<String>,
    pub limits: ResourceLimits,
    pub flags: SandboxFlags,
}

impl Sandbox {
    /// Apply a change to the sandbox, rejecting it outright once
    /// `IMMUTABLE` has been set — the one invariant spec.md §3 calls out
    /// by name.
    pub fn apply(&mut self, f: impl FnOnce(&mut Sandbox)) -> Result<(), &'static str> {
        if self.flags.contains(SandboxFlags::IMMUTABLE) {
            return Err("sandbox is immutable");
        }
        f(self);
        Ok(())
    }

    pub fn allows(&self, required: SyscallCategory) -> bool {
        self.allowed.contains(required)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn immutable_blocks_further_changes() {
        let mut sb = Sandbox::default();
        sb.apply(|s| s.flags |= SandboxFlags::IMMUTABLE).unwrap();
        let result = sb.apply(|s| s.cage_level = CageLevel::Locked);
        assert!(result.is_err());
        assert_eq!(sb.cage_level, CageLevel::None);
    }

    #[test]
    fn allows_checks_all_required_bits() {
        let mut sb = Sandbox::default();
        sb.allowed = SyscallCategory::IO_READ | SyscallCategory::TIME;
        assert!(sb.allows(SyscallCategory::IO_READ));
        assert!(!sb.allows(SyscallCategory::IO_WRITE));
        assert!(!sb.allows(SyscallCategory::IO_READ | SyscallCategory::IO_WRITE));
    }
}
