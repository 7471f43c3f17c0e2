//! Crate-wide error taxonomy for the aOS kernel.
//!
//! Mirrors the error kinds enumerated in the kernel specification: invalid
//! argument, resource exhaustion, not found, already present, capability
//! denied, version mismatch, integrity, and fatal. Subsystem-specific error
//! enums convert into [`KernelError`] via `From` so internal helpers can
//! keep precise, cheap-to-construct error types and still bubble up with
//! `?` at module boundaries.

use core::fmt;

/// Crate-wide kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Malformed input at an API boundary.
    InvalidArgument {
        name: &'static str,
    },
    /// Out of frames, heap, PIDs, FDs, message slots, or VM call stack.
    ResourceExhausted {
        resource: &'static str,
    },
    /// No such PID, module, region, file, or environment variable.
    NotFound {
        resource: &'static str,
    },
    /// Module name collision, region name collision, duplicate mapping.
    AlreadyExists {
        resource: &'static str,
    },
    /// Sandbox filter rejected the syscall, or a module lacked a capability.
    CapabilityDenied {
        operation: &'static str,
    },
    /// Module's declared kernel-version range excludes this kernel.
    VersionMismatch,
    /// Checksum failure, guard corruption, or unaligned/invalid pointer.
    Integrity {
        detail: &'static str,
    },
    /// Unrecoverable condition; caller should transfer to KRM.
    Fatal {
        reason: &'static str,
    },
    /// Would block and the caller requested non-blocking semantics.
    WouldBlock,
    FrameError(crate::mm::frame_allocator::FrameError),
    SchedError(crate::sched::SchedError),
    IpcError(crate::ipc::IpcError),
    VmError(crate::modvm::VmError),
    FsError(crate::fs::FsError),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::NotFound { resource } => write!(f, "not found: {resource}"),
            Self::AlreadyExists { resource } => write!(f, "already exists: {resource}"),
            Self::CapabilityDenied { operation } => {
                write!(f, "capability denied for: {operation}")
            }
            Self::VersionMismatch => write!(f, "kernel version mismatch"),
            Self::Integrity { detail } => write!(f, "integrity violation: {detail}"),
            Self::Fatal { reason } => write!(f, "fatal: {reason}"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::FrameError(e) => write!(f, "frame allocator: {e:?}"),
            Self::SchedError(e) => write!(f, "scheduler: {e:?}"),
            Self::IpcError(e) => write!(f, "ipc: {e:?}"),
            Self::VmError(e) => write!(f, "module vm: {e:?}"),
            Self::FsError(e) => write!(f, "fs: {e:?}"),
        }
    }
}

impl From<crate::mm::frame_allocator::FrameError> for KernelError {
    fn from(e: crate::mm::frame_allocator::FrameError) -> Self {
        Self::FrameError(e)
    }
}

impl From<crate::sched::SchedError> for KernelError {
    fn from(e: crate::sched::SchedError) -> Self {
        Self::SchedError(e)
    }
}

impl From<crate::ipc::IpcError> for KernelError {
    fn from(e: crate::ipc::IpcError) -> Self {
        Self::IpcError(e)
    }
}

impl From<crate::modvm::VmError> for KernelError {
    fn from(e: crate::modvm::VmError) -> Self {
        Self::VmError(e)
    }
}

impl From<crate::fs::FsError> for KernelError {
    fn from(e: crate::fs::FsError) -> Self {
        Self::FsError(e)
    }
}

/// Negative-integer syscall/module-context error codes (spec.md §6, §7).
///
/// Boundary APIs translate a [`KernelError`] into one of these at the last
/// possible moment; internal code never constructs these directly.
pub mod code {
    pub const ERR_INVALID: isize = -1;
    pub const ERR_LIMIT: isize = -2;
    pub const ERR_NOT_FOUND: isize = -3;
    pub const ERR_EXISTS: isize = -4;
    pub const ERR_CAPABILITY: isize = -5;
    pub const ERR_VERSION: isize = -6;
    pub const ERR_INTEGRITY: isize = -7;
    pub const ERR_WOULD_BLOCK: isize = -8;
    pub const ERR_DIV0: isize = -9;
    pub const ERR_STACK: isize = -10;
    pub const ERR_OPCODE: isize = -11;
    pub const ERR_CALL: isize = -12;
    pub const ERR_ADDR: isize = -13;
    pub const ERR_API: isize = -14;
}

impl KernelError {
    /// Map to the negative syscall/module-context return code.
    pub fn to_code(self) -> isize {
        use code::*;
        match self {
            Self::InvalidArgument { .. } => ERR_INVALID,
            Self::ResourceExhausted { .. } => ERR_LIMIT,
            Self::NotFound { .. } => ERR_NOT_FOUND,
            Self::AlreadyExists { .. } => ERR_EXISTS,
            Self::CapabilityDenied { .. } => ERR_CAPABILITY,
            Self::VersionMismatch => ERR_VERSION,
            Self::Integrity { .. } => ERR_INTEGRITY,
            Self::Fatal { .. } => ERR_INTEGRITY,
            Self::WouldBlock => ERR_WOULD_BLOCK,
            Self::FrameError(_) => ERR_LIMIT,
            Self::SchedError(_) => ERR_INVALID,
            Self::IpcError(e) => e.to_code(),
            Self::VmError(e) => e.to_code(),
            Self::FsError(_) => ERR_NOT_FOUND,
        }
    }
}
