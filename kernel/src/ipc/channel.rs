//! Fixed-capacity ring-buffer channels (spec.md §3, §4.6). Short
//! reads/writes are permitted; the caller is expected to retry.

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

use crate::process::Pid;

pub const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

pub struct Channel {
    pub id: ChannelId,
    pub creator: Pid,
    buffer: Mutex<[u8; CHANNEL_CAPACITY]>,
    read_cursor: AtomicUsize,
    write_cursor: AtomicUsize,
    readers: AtomicU32,
    writers: AtomicU32,
    closed: core::sync::atomic::AtomicBool,
}

impl Channel {
    fn new(id: ChannelId, creator: Pid) -> Self {
        Self {
            id,
            creator,
            buffer: Mutex::new([0u8; CHANNEL_CAPACITY]),
            read_cursor: AtomicUsize::new(0),
            write_cursor: AtomicUsize::new(0),
            readers: AtomicU32::new(0),
            writers: AtomicU32::new(0),
            closed: core::sync::atomic::AtomicBool::new(false),
        }
    }

    fn used(&self) -> usize {
        self.write_cursor.load(Ordering::Acquire) - self.read_cursor.load(Ordering::Acquire)
    }

    /// Write as much of `data` as fits in the remaining capacity, returning
    /// the number of bytes actually written (may be a short write).
    pub fn write(&self, data: &[u8]) -> Result<usize, super::IpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(super::IpcError::ChannelClosed);
        }
        let mut buf = self.buffer.lock();
        let free = CHANNEL_CAPACITY - self.used();
        let n = data.len().min(free);
        let write = self.write_cursor.load(Ordering::Relaxed);
        for (i, &byte) in data[..n].iter().enumerate() {
            buf[(write + i) % CHANNEL_CAPACITY] = byte;
        }
        self.write_cursor.fetch_add(n, Ordering::Release);
        Ok(n)
    }

    /// Read up to `out.len()` bytes, returning the number actually read
    /// (may be a short read, including zero if the channel is empty).
    pub fn read(&self, out: &mut [u8]) -> Result<usize, super::IpcError> {
        let buf = self.buffer.lock();
        let available = self.used();
        let n = out.len().min(available);
        let read = self.read_cursor.load(Ordering::Relaxed);
        for i in 0..n {
            out[i] = buf[(read + i) % CHANNEL_CAPACITY];
        }
        self.read_cursor.fetch_add(n, Ordering::Release);
        Ok(n)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn add_reader(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }
    pub fn add_writer(&self) {
        self.writers.fetch_add(1, Ordering::AcqRel);
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: Mutex<Option<BTreeMap<ChannelId, Arc<Channel>>>> = Mutex::new(None);

fn registry() -> spin::MutexGuard<'static, Option<BTreeMap<ChannelId, Arc<Channel>>>> {
    let mut guard = REGISTRY.lock();
    if guard.is_none() {
        *guard = Some(BTreeMap::new());
    }
    guard
}

pub fn create(creator: Pid) -> ChannelId {
    let id = ChannelId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    registry()
        .as_mut()
        .unwrap()
        .insert(id, Arc::new(Channel::new(id, creator)));
    id
}

pub fn get(id: ChannelId) -> Option<Arc<Channel>> {
    registry().as_ref().unwrap().get(&id).cloned()
}

pub fn destroy(id: ChannelId) {
    registry().as_mut().unwrap().remove(&id);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn short_write_then_short_read_round_trips() {
        let ch = Channel::new(ChannelId(1), Pid(1));
        let written = ch.write(b"hello").unwrap();
        assert_eq!(written, 5);
        let mut out = [0u8; 3];
        let read = ch.read(&mut out).unwrap();
        assert_eq!(read, 3);
        assert_eq!(&out, b"hel");
    }
}
