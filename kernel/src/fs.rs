//! VFS contract surface (spec.md §4.10): only the interface the kernel
//! core consumes is specified here. Concrete filesystems (FAT, ramfs,
//! devfs, procfs) are external collaborators reached through this
//! struct-of-function-pointers capability boundary, the same idiom
//! spec.md's REDESIGN FLAGS calls for at every dynamic-dispatch seam.

use spin::Mutex;

pub type Fd = i32;

pub const STDIN: Fd = 0;
pub const STDOUT: Fd = 1;
pub const STDERR: Fd = 2;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub size: u64,
    pub is_dir: bool,
}

pub const MAX_DIRENT_NAME: usize = 64;

/// One directory entry, written in place by `readdir` (spec.md §4.10).
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub name: [u8; MAX_DIRENT_NAME],
    pub name_len: u8,
    pub is_dir: bool,
}

impl Default for DirEntry {
    fn default() -> Self {
        Self { name: [0; MAX_DIRENT_NAME], name_len: 0, is_dir: false }
    }
}

impl DirEntry {
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotSupported,
    InvalidFd,
    PathEscapesRoot,
    AlreadyExists,
}

pub type FsResult<T> = Result<T, FsError>;

/// The VFS capability struct: every concrete filesystem (and the `NullFs`
/// stub) implements this as a table of function pointers rather than a
/// trait object, matching the module-context calling convention used
/// everywhere else a kernel module calls out through a capability.
pub struct VfsOps {
    pub open: fn(path: &str, flags: OpenFlags) -> FsResult<Fd>,
    pub close: fn(fd: Fd),
    pub read: fn(fd: Fd, buf: &mut [u8]) -> FsResult<usize>,
    pub write: fn(fd: Fd, buf: &[u8]) -> FsResult<usize>,
    pub seek: fn(fd: Fd, offset: i64, whence: Whence) -> FsResult<u64>,
    /// Writes the next entry into `entry` and returns `true`, or returns
    /// `false` once the directory is exhausted.
    pub readdir: fn(fd: Fd, entry: &mut DirEntry) -> FsResult<bool>,
    pub stat: fn(path: &str) -> FsResult<Stat>,
    pub mkdir: fn(path: &str) -> FsResult<()>,
    pub rmdir: fn(path: &str) -> FsResult<()>,
    pub unlink: fn(path: &str) -> FsResult<()>,
}

/// Blocks path traversal out of a sandboxed cage root by rejecting any
/// `..` component after joining (spec.md §5's path-accepting syscalls
/// requirement).
pub fn resolve_within_cage(cage_root: Option<&str>, path: &str) -> FsResult<()> {
    if cage_root.is_some() && path.split('/').any(|part| part == "..") {
        return Err(FsError::PathEscapesRoot);
    }
    Ok(())
}

mod null_fs {
    use super::*;

    fn open(_path: &str, _flags: OpenFlags) -> FsResult<Fd> {
        Err(FsError::NotSupported)
    }
    fn close(_fd: Fd) {}
    fn read(_fd: Fd, _buf: &mut [u8]) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }
    fn write(_fd: Fd, _buf: &[u8]) -> FsResult<usize> {
        Err(FsError::NotSupported)
    }
    fn seek(_fd: Fd, _offset: i64, _whence: Whence) -> FsResult<u64> {
        Err(FsError::NotSupported)
    }
    fn readdir(_fd: Fd, _entry: &mut DirEntry) -> FsResult<bool> {
        Err(FsError::NotSupported)
    }
    fn stat(_path: &str) -> FsResult<Stat> {
        Err(FsError::NotFound)
    }
    fn mkdir(_path: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }
    fn rmdir(_path: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }
    fn unlink(_path: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    pub const NULL_FS: VfsOps = VfsOps {
        open,
        close,
        read,
        write,
        seek,
        readdir,
        stat,
        mkdir,
        rmdir,
        unlink,
    };
}

static ACTIVE_VFS: Mutex<VfsOps> = Mutex::new(null_fs::NULL_FS);

/// Install the concrete VFS implementation; called once a real
/// filesystem driver attaches (out of scope for this crate, per spec.md
/// §1's Non-goals — `NullFs` is what ships until one does).
pub fn install(ops: VfsOps) {
    *ACTIVE_VFS.lock() = ops;
}

/// Borrowing a `&'static VfsOps` would require the lock to live forever;
/// callers instead get a copy of the function-pointer table, which is
/// `Copy`-cheap (nine machine words) and always current as of the call.
pub fn init() {
    log::info!("vfs initialized with null filesystem");
}

pub fn vfs() -> VfsOps {
    let guard = ACTIVE_VFS.lock();
    VfsOps {
        open: guard.open,
        close: guard.close,
        read: guard.read,
        write: guard.write,
        seek: guard.seek,
        readdir: guard.readdir,
        stat: guard.stat,
        mkdir: guard.mkdir,
        rmdir: guard.rmdir,
        unlink: guard.unlink,
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn null_fs_rejects_every_operation() {
        let ops = vfs();
        assert_eq!((ops.open)("/x", OpenFlags::READ), Err(FsError::NotSupported));
        assert_eq!((ops.stat)("/x"), Err(FsError::NotFound));
    }

    #[test]
    fn cage_root_blocks_dotdot_escape() {
        assert!(resolve_within_cage(Some("/cage"), "../etc/passwd").is_err());
        assert!(resolve_within_cage(Some("/cage"), "data/file.txt").is_ok());
        assert!(resolve_within_cage(None, "../anything").is_ok());
    }
}
