//! Physical frame allocator: a zoned bitmap allocator with a next-fit
//! scan, per spec.md §4.1. No NUMA, no buddy system — single-CPU, single
//! memory domain, so the teacher's NUMA+buddy hybrid is more machinery
//! than this kernel needs; the zoning (DMA/NORMAL/HIGH) and bitmap
//! representation are kept.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;

pub const FRAME_SIZE: usize = 4096;

/// Bitmap capacity: enough frames for 4 GiB of physical memory.
const MAX_FRAMES: usize = (4usize * 1024 * 1024 * 1024) / FRAME_SIZE;
const BITMAP_WORDS: usize = MAX_FRAMES / 64;

/// Physical frame number (frame index, not a byte address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn addr(&self) -> usize {
        (self.0 as usize) * FRAME_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryZone {
    /// 0..16MiB — required for legacy DMA-incapable devices.
    Dma,
    /// 16MiB..896MiB — the general-purpose zone.
    Normal,
    /// Above 896MiB. Unused on the 32-bit port, reachable on x86_64.
    High,
}

impl MemoryZone {
    fn frame_range(self) -> (u64, u64) {
        const DMA_END: u64 = (16 * 1024 * 1024 / FRAME_SIZE) as u64;
        const NORMAL_END: u64 = (896u64 * 1024 * 1024) / FRAME_SIZE as u64;
        match self {
            MemoryZone::Dma => (0, DMA_END),
            MemoryZone::Normal => (DMA_END, NORMAL_END),
            MemoryZone::High => (NORMAL_END, MAX_FRAMES as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    OutOfMemory { zone: &'static str },
    AlreadyFree(FrameNumber),
    DoubleAllocation(FrameNumber),
    OutOfRange(FrameNumber),
}

pub type Result<T> = core::result::Result<T, FrameError>;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameAllocatorStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub allocations: u64,
    pub frees: u64,
}

struct Bitmap {
    words: [u64; BITMAP_WORDS],
    /// One past the highest frame index ever marked available; bounds the
    /// scan so we don't walk multiple gigabytes of all-ones bitmap tail.
    high_water: usize,
    next_scan: usize,
}

impl Bitmap {
    const fn new() -> Self {
        Self {
            words: [u64::MAX; BITMAP_WORDS],
            high_water: 0,
            next_scan: 0,
        }
    }

    fn mark_free(&mut self, frame: u64) {
        let idx = frame as usize;
        self.words[idx / 64] &= !(1 << (idx % 64));
        if idx + 1 > self.high_water {
            self.high_water = idx + 1;
        }
    }

    fn is_used(&self, frame: u64) -> bool {
        let idx = frame as usize;
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn set_used(&mut self, frame: u64) {
        let idx = frame as usize;
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    /// Next-fit scan starting from `next_scan`, wrapping once.
    fn find_free(&mut self, zone: MemoryZone) -> Option<u64> {
        let (zone_start, zone_end) = zone.frame_range();
        let zone_end = zone_end.min(self.high_water as u64);
        if zone_start >= zone_end {
            return None;
        }
        let start = self.next_scan.max(zone_start as usize) as u64;
        for frame in (start..zone_end).chain(zone_start..start) {
            if !self.is_used(frame) {
                self.next_scan = (frame + 1) as usize;
                return Some(frame);
            }
        }
        None
    }
}

pub struct FrameAllocator {
    bitmap: Mutex<Bitmap>,
    free_frames: AtomicUsize,
    total_frames: AtomicUsize,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: Mutex::new(Bitmap::new()),
            free_frames: AtomicUsize::new(0),
            total_frames: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Mark `[start, start+count)` as available, called once per usable
    /// region reported by the bootloader's memory map.
    pub fn add_region(&self, start: FrameNumber, count: usize) {
        let mut bitmap = self.bitmap.lock();
        for i in 0..count {
            let frame = start.as_u64() + i as u64;
            if (frame as usize) < MAX_FRAMES {
                bitmap.mark_free(frame);
            }
        }
        self.free_frames.fetch_add(count, Ordering::Relaxed);
        self.total_frames.fetch_add(count, Ordering::Relaxed);
    }

    pub fn allocate(&self) -> Result<FrameNumber> {
        self.allocate_in_zone(MemoryZone::Normal)
            .or_else(|_| self.allocate_in_zone(MemoryZone::High))
    }

    pub fn allocate_in_zone(&self, zone: MemoryZone) -> Result<FrameNumber> {
        let mut bitmap = self.bitmap.lock();
        let frame = bitmap
            .find_free(zone)
            .ok_or(FrameError::OutOfMemory { zone: zone_name(zone) })?;
        bitmap.set_used(frame);
        drop(bitmap);
        self.free_frames.fetch_sub(1, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(FrameNumber::new(frame))
    }

    pub fn free(&self, frame: FrameNumber) -> Result<()> {
        if frame.as_u64() as usize >= MAX_FRAMES {
            return Err(FrameError::OutOfRange(frame));
        }
        let mut bitmap = self.bitmap.lock();
        if !bitmap.is_used(frame.as_u64()) {
            return Err(FrameError::AlreadyFree(frame));
        }
        bitmap.mark_free(frame.as_u64());
        drop(bitmap);
        self.free_frames.fetch_add(1, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocate `n` physically contiguous frames from a single zone
    /// (spec.md §4.1, needed by §4.6's shared-region backing allocation).
    /// Scans NORMAL then HIGH for the first run of `n` consecutive free
    /// frames; either the whole run succeeds or nothing is marked used.
    pub fn alloc_contiguous(&self, n: usize) -> Result<FrameNumber> {
        if n == 0 {
            return Err(FrameError::OutOfMemory { zone: "normal" });
        }
        let mut bitmap = self.bitmap.lock();
        for zone in [MemoryZone::Normal, MemoryZone::High] {
            let (zone_start, zone_end) = zone.frame_range();
            let zone_end = zone_end.min(bitmap.high_water as u64);
            if zone_end - zone_start < n as u64 {
                continue;
            }
            let mut run_start = zone_start;
            let mut run_len = 0u64;
            for frame in zone_start..zone_end {
                if bitmap.is_used(frame) {
                    run_start = frame + 1;
                    run_len = 0;
                    continue;
                }
                run_len += 1;
                if run_len == n as u64 {
                    for f in run_start..=frame {
                        bitmap.set_used(f);
                    }
                    drop(bitmap);
                    self.free_frames.fetch_sub(n, Ordering::Relaxed);
                    self.allocations.fetch_add(n as u64, Ordering::Relaxed);
                    return Ok(FrameNumber::new(run_start));
                }
            }
        }
        Err(FrameError::OutOfMemory { zone: "normal" })
    }

    /// Whether `frame` falls within the range the allocator has ever been
    /// told is usable (spec.md §4.1's `is_valid_frame`). Does not say
    /// whether it is currently free — use [`FrameAllocator::is_used`] for that.
    pub fn is_valid_frame(&self, frame: FrameNumber) -> bool {
        let idx = frame.as_u64() as usize;
        idx < MAX_FRAMES && idx < self.bitmap.lock().high_water
    }

    pub fn is_used(&self, frame: FrameNumber) -> bool {
        self.bitmap.lock().is_used(frame.as_u64())
    }

    pub fn stats(&self) -> FrameAllocatorStats {
        FrameAllocatorStats {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            free_frames: self.free_frames.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

fn zone_name(zone: MemoryZone) -> &'static str {
    match zone {
        MemoryZone::Dma => "dma",
        MemoryZone::Normal => "normal",
        MemoryZone::High => "high",
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_is_reusable() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 4);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_ne!(a, b);
        alloc.free(a).unwrap();
        let c = alloc.allocate().unwrap();
        assert_eq!(c, a, "next-fit should reuse the freed frame once it wraps around");
    }

    #[test]
    fn double_free_is_rejected() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 1);
        let frame = alloc.allocate().unwrap();
        alloc.free(frame).unwrap();
        assert_eq!(alloc.free(frame), Err(FrameError::AlreadyFree(frame)));
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 1);
        alloc.allocate().unwrap();
        assert!(matches!(alloc.allocate(), Err(FrameError::OutOfMemory { .. })));
    }

    #[test]
    fn stats_track_real_allocation_and_free_counts() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 4);
        let a = alloc.allocate().unwrap();
        let _b = alloc.allocate().unwrap();
        alloc.free(a).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 1);
    }

    #[test]
    fn alloc_contiguous_returns_a_consecutive_run() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 8);
        let base = alloc.alloc_contiguous(4).unwrap();
        for i in 0..4 {
            assert!(alloc.is_used(FrameNumber::new(base.as_u64() + i)));
        }
        assert!(!alloc.is_used(FrameNumber::new(base.as_u64() + 4)));
    }

    #[test]
    fn alloc_contiguous_fails_without_a_large_enough_run() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 4);
        let a = alloc.allocate().unwrap();
        let _b = alloc.allocate().unwrap();
        alloc.free(a).unwrap();
        assert!(matches!(alloc.alloc_contiguous(3), Err(FrameError::OutOfMemory { .. })));
    }

    #[test]
    fn is_valid_frame_respects_the_seeded_high_water_mark() {
        let alloc = FrameAllocator::new();
        alloc.add_region(FrameNumber::new(4096), 4);
        assert!(alloc.is_valid_frame(FrameNumber::new(4096)));
        assert!(alloc.is_valid_frame(FrameNumber::new(4099)));
        assert!(!alloc.is_valid_frame(FrameNumber::new(4100)));
    }
}
