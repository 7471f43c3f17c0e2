//! Kernel heap: slab caches for small allocations (8..2048 bytes) backed
//! by guard words for corruption/double-free detection, falling back to
//! the frame-backed `linked_list_allocator` for anything page-sized or
//! larger (spec.md §4.2).

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use linked_list_allocator::LockedHeap;
use spin::Mutex;

/// Arbitrary high canonical address. Like the teacher's own heap, this
/// piggybacks on the bootloader's identity/offset mapping rather than
/// building dedicated page-table entries for the heap range; a real
/// deployment would map it explicitly via `mm::page_table`.
pub const HEAP_START: usize = 0x_4444_4444_0000;
pub const HEAP_SIZE: usize = 16 * 1024 * 1024;

const SIZE_CLASSES: [usize; 9] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048];
const GUARD_MAGIC: u64 = 0xA0A0_5A5A_C0DE_F00D;

/// Header prepended to every slab object. `active` distinguishes a live
/// allocation from one sitting in its cache's free list, so a second
/// `dealloc` of the same pointer is detected rather than corrupting the
/// free list.
#[repr(C)]
struct SlabHeader {
    start_guard: u64,
    object_size: usize,
    active: AtomicBool,
    next_free: Option<NonNull<SlabHeader>>,
}

impl SlabHeader {
    fn end_guard_ptr(&self) -> *mut u64 {
        let base = self as *const Self as *const u8;
        unsafe { base.add(core::mem::size_of::<Self>() + self.object_size) as *mut u64 }
    }

    fn guards_intact(&self) -> bool {
        if self.start_guard != GUARD_MAGIC {
            return false;
        }
        // SAFETY: `end_guard_ptr` points just past the object's payload,
        // which is always allocated together with this header.
        unsafe { self.end_guard_ptr().read_unaligned() == GUARD_MAGIC }
    }
}

struct SlabCache {
    object_size: usize,
    free_list: Option<NonNull<SlabHeader>>,
}

// SAFETY: all access goes through `KernelHeap`'s single `Mutex<[SlabCache; N]>`.
unsafe impl Send for SlabCache {}

/// Every slab header this allocator has ever carved, active or free, so
/// [`KernelHeap::validate_integrity`] can sweep the live set without a
/// separate per-class active list.
struct AllHeaders(alloc::vec::Vec<NonNull<SlabHeader>>);

// SAFETY: guarded by `KernelHeap::all_headers`'s own `Mutex`.
unsafe impl Send for AllHeaders {}

pub struct HeapStats {
    pub allocated_bytes: AtomicU64,
    pub freed_bytes: AtomicU64,
    pub double_free_count: AtomicU64,
    pub corruption_count: AtomicU64,
}

impl HeapStats {
    const fn new() -> Self {
        Self {
            allocated_bytes: AtomicU64::new(0),
            freed_bytes: AtomicU64::new(0),
            double_free_count: AtomicU64::new(0),
            corruption_count: AtomicU64::new(0),
        }
    }
}

pub struct KernelHeap {
    slabs: Mutex<[SlabCache; SIZE_CLASSES.len()]>,
    fallback: LockedHeap,
    stats: HeapStats,
    all_headers: Mutex<AllHeaders>,
}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            slabs: Mutex::new([
                SlabCache { object_size: SIZE_CLASSES[0], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[1], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[2], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[3], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[4], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[5], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[6], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[7], free_list: None },
                SlabCache { object_size: SIZE_CLASSES[8], free_list: None },
            ]),
            fallback: LockedHeap::empty(),
            stats: HeapStats::new(),
            all_headers: Mutex::new(AllHeaders(alloc::vec::Vec::new())),
        }
    }

    fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&s| size <= s)
    }

    fn alloc_from_slab(&self, class: usize) -> Option<*mut u8> {
        let mut slabs = self.slabs.lock();
        let cache = &mut slabs[class];
        if let Some(mut head) = cache.free_list {
            // SAFETY: every node on a cache's free list was carved from a
            // page owned by this allocator and is exclusively accessible
            // while the cache lock is held.
            let header = unsafe { head.as_mut() };
            cache.free_list = header.next_free;
            header.active.store(true, Ordering::Release);
            header.start_guard = GUARD_MAGIC;
            unsafe { header.end_guard_ptr().write_unaligned(GUARD_MAGIC) };
            return Some(unsafe {
                (head.as_ptr() as *mut u8).add(core::mem::size_of::<SlabHeader>())
            });
        }
        // No free objects: carve a fresh page into objects of this class.
        let object_size = cache.object_size;
        let stride = core::mem::size_of::<SlabHeader>() + object_size + core::mem::size_of::<u64>();
        let page = self.alloc_page()?;
        let objects_per_page = 4096 / stride;
        if objects_per_page == 0 {
            return None;
        }
        let mut carved = alloc::vec::Vec::with_capacity(objects_per_page);
        for i in 1..objects_per_page {
            // SAFETY: each `i` indexes a disjoint `stride`-sized slot
            // within the page we just got from `alloc_page`.
            let slot = unsafe { page.add(i * stride) } as *mut SlabHeader;
            unsafe {
                (*slot).object_size = object_size;
                (*slot).active.store(false, Ordering::Relaxed);
                (*slot).next_free = cache.free_list;
            }
            cache.free_list = NonNull::new(slot);
            if let Some(slot) = NonNull::new(slot) {
                carved.push(slot);
            }
        }
        let header = page as *mut SlabHeader;
        unsafe {
            (*header).object_size = object_size;
            (*header).active.store(true, Ordering::Release);
            (*header).start_guard = GUARD_MAGIC;
            (*header).end_guard_ptr().write_unaligned(GUARD_MAGIC);
        }
        if let Some(header) = NonNull::new(header) {
            carved.push(header);
        }
        self.all_headers.lock().0.extend(carved);
        Some(unsafe { page.add(core::mem::size_of::<SlabHeader>()) })
    }

    fn alloc_page(&self) -> Option<*mut u8> {
        let layout = Layout::from_size_align(4096, 4096).ok()?;
        let ptr = unsafe { self.fallback.alloc(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    }

    fn free_to_slab(&self, ptr: *mut u8, class: usize) {
        let header_ptr = unsafe {
            ptr.sub(core::mem::size_of::<SlabHeader>()) as *mut SlabHeader
        };
        // SAFETY: `header_ptr` was computed from a pointer this allocator
        // previously returned, so it points at a live `SlabHeader`.
        let header = unsafe { &mut *header_ptr };
        if !header.guards_intact() {
            self.stats.corruption_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !header.active.swap(false, Ordering::AcqRel) {
            self.stats.double_free_count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut slabs = self.slabs.lock();
        let cache = &mut slabs[class];
        header.next_free = cache.free_list;
        cache.free_list = NonNull::new(header_ptr);
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.stats.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Sweep every slab header this allocator has ever carved and verify
    /// the guard words of every one still marked active (spec.md §4.2,
    /// §8's post-`kfree` universal invariant). Returns the number of
    /// corrupted objects found; a non-zero count also bumps
    /// `corruption_count` for each one, matching `free_to_slab`'s existing
    /// counter.
    pub fn validate_integrity(&self) -> usize {
        let mut corrupted = 0;
        for &header in self.all_headers.lock().0.iter() {
            // SAFETY: every pointer in `all_headers` was carved from a
            // page this allocator owns and never freed back to the page
            // allocator, so it is still valid to read.
            let header = unsafe { header.as_ref() };
            if header.active.load(Ordering::Acquire) && !header.guards_intact() {
                corrupted += 1;
                self.stats.corruption_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        corrupted
    }

    /// Check a single live pointer's guard words without touching the
    /// rest of the heap. `ptr` must be a pointer this allocator previously
    /// returned from a slab-backed allocation.
    pub fn check_guards(&self, ptr: *mut u8) -> bool {
        // SAFETY: caller guarantees `ptr` came from `alloc_from_slab`, so
        // stepping back one header's worth of bytes lands on that header.
        let header = unsafe { &*(ptr.sub(core::mem::size_of::<SlabHeader>()) as *const SlabHeader) };
        header.guards_intact()
    }

    pub fn corruption_count(&self) -> u64 {
        self.stats.corruption_count.load(Ordering::Relaxed)
    }

    pub fn double_free_count(&self) -> u64 {
        self.stats.double_free_count.load(Ordering::Relaxed)
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let needed = layout.size().max(layout.align());
        match Self::class_for(needed) {
            Some(class) if needed <= 2048 => {
                let ptr = self.alloc_from_slab(class).unwrap_or(core::ptr::null_mut());
                if !ptr.is_null() {
                    self.stats
                        .allocated_bytes
                        .fetch_add(layout.size() as u64, Ordering::Relaxed);
                }
                ptr
            }
            _ => unsafe { self.fallback.alloc(layout) },
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let needed = layout.size().max(layout.align());
        match Self::class_for(needed) {
            Some(class) if needed <= 2048 => {
                self.free_to_slab(ptr, class);
                self.stats
                    .freed_bytes
                    .fetch_add(layout.size() as u64, Ordering::Relaxed);
            }
            _ => unsafe { self.fallback.dealloc(ptr, layout) },
        }
    }
}

/// Give the fallback frame-backed allocator its backing memory. Must run
/// exactly once, before the first allocation.
///
/// # Safety
/// Caller must guarantee this runs once, before any allocation, and that
/// `[HEAP_START, HEAP_START + HEAP_SIZE)` is mapped and exclusively owned
/// by the heap.
pub unsafe fn init() {
    #[cfg(target_os = "none")]
    unsafe {
        let heap: &KernelHeap = &crate::ALLOCATOR;
        heap.fallback.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
}

/// Sweep the whole heap's live set for guard corruption (spec.md §4.2).
/// Returns the number of corrupted objects found (0 means clean).
pub fn validate_integrity() -> usize {
    crate::ALLOCATOR.validate_integrity()
}

/// Check one live slab-backed pointer's guard words without sweeping the
/// rest of the heap (spec.md §4.2).
pub fn check_guards(ptr: *mut u8) -> bool {
    crate::ALLOCATOR.check_guards(ptr)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn size_classes_cover_guard_overhead() {
        for &size in &SIZE_CLASSES {
            assert!(size >= 8);
        }
    }

    /// spec.md §8 scenario 1: allocate, free, re-allocate the same size
    /// returns the just-freed slot (LIFO free list), not a fresh carve.
    #[test]
    fn kmalloc_then_kfree_then_kmalloc_reuses_the_freed_slot() {
        let heap = KernelHeap::empty();
        let mut backing = alloc::vec![0u8; 64 * 1024];
        unsafe { heap.fallback.lock().init(backing.as_mut_ptr(), backing.len()) };

        let layout = Layout::from_size_align(64, 8).unwrap();
        let p1 = unsafe { heap.alloc(layout) };
        assert!(!p1.is_null());
        unsafe { heap.dealloc(p1, layout) };
        let p2 = unsafe { heap.alloc(layout) };
        assert_eq!(p1, p2);
    }

    /// spec.md §8's first universal invariant: `validate_integrity()`
    /// reports no errors right after a plain `kfree`.
    #[test]
    fn validate_integrity_is_clean_after_kfree() {
        let heap = KernelHeap::empty();
        let mut backing = alloc::vec![0u8; 64 * 1024];
        unsafe { heap.fallback.lock().init(backing.as_mut_ptr(), backing.len()) };

        let layout = Layout::from_size_align(32, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        assert!(heap.check_guards(p));
        unsafe { heap.dealloc(p, layout) };
        assert_eq!(heap.validate_integrity(), 0);
    }

    /// Writing past the end of a live allocation corrupts its trailing
    /// guard word, and `check_guards`/`validate_integrity` catch it.
    #[test]
    fn check_guards_detects_a_trampled_trailing_guard() {
        let heap = KernelHeap::empty();
        let mut backing = alloc::vec![0u8; 64 * 1024];
        unsafe { heap.fallback.lock().init(backing.as_mut_ptr(), backing.len()) };

        let layout = Layout::from_size_align(16, 8).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        unsafe { core::ptr::write_bytes(p.add(16), 0xff, 8) };

        assert!(!heap.check_guards(p));
        assert_eq!(heap.validate_integrity(), 1);
    }
}
