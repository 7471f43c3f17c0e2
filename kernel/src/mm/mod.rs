//! Physical and virtual memory management: frame allocator, address
//! spaces, page tables, and the kernel heap (spec.md §4.1, §4.2).

pub mod frame_allocator;
pub mod heap;
pub mod page_table;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

pub use frame_allocator::{FrameAllocator, FrameError, FrameNumber, MemoryZone, FRAME_SIZE};
pub use page_table::PageFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn align_down(self) -> Self {
        Self(self.0 & !(FRAME_SIZE as u64 - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A contiguous virtual range with uniform flags, owned by exactly one
/// [`AddressSpace`]. No two live VMAs in the same address space overlap.
#[derive(Debug, Clone, Copy)]
pub struct Vma {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub flags: PageFlags,
}

impl Vma {
    fn overlaps(&self, other_start: VirtualAddress, other_end: VirtualAddress) -> bool {
        self.start < other_end && other_start < self.end
    }
}

const MAX_VMAS: usize = 64;

/// Per-task virtual mapping. The kernel address space is the process-wide
/// singleton returned by [`kernel_address_space`]; every user address
/// space is created by copying its high-half mappings.
pub struct AddressSpace {
    vmas: Mutex<heapless_vec::HeaplessVec<Vma, MAX_VMAS>>,
    pub heap_start: Mutex<VirtualAddress>,
    pub heap_end: Mutex<VirtualAddress>,
    pub stack_top: VirtualAddress,
    /// Software record of this space's page-table leaf entries, keyed by
    /// page-aligned VA. Populated by [`map`]/[`alloc_pages`], consulted
    /// by [`translate`] and [`destroy_address_space`]. This kernel runs
    /// every task against one shared, physical-offset-mapped table
    /// rather than a hardware root per space (DESIGN.md Open Question
    /// #4), so this is what makes `translate` address-space-specific.
    page_map: Mutex<BTreeMap<VirtualAddress, PhysicalAddress>>,
}

/// A tiny fixed-capacity vector, used so `AddressSpace` works identically
/// whether or not the `alloc` feature's heap is up yet (the kernel
/// address space is built before the heap is).
mod heapless_vec {
    pub struct HeaplessVec<T, const N: usize> {
        items: [Option<T>; N],
        len: usize,
    }

    impl<T: Copy, const N: usize> HeaplessVec<T, N> {
        pub const fn new() -> Self {
            Self {
                items: [None; N],
                len: 0,
            }
        }

        pub fn push(&mut self, item: T) -> Result<(), &'static str> {
            if self.len >= N {
                return Err("vma list full");
            }
            self.items[self.len] = Some(item);
            self.len += 1;
            Ok(())
        }

        pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
            let idx = (0..self.len).find(|&i| pred(self.items[i].as_ref().unwrap()))?;
            let removed = self.items[idx].take();
            for i in idx..self.len - 1 {
                self.items[i] = self.items[i + 1].take();
            }
            self.len -= 1;
            removed
        }

        pub fn iter(&self) -> impl Iterator<Item = &T> {
            self.items[..self.len].iter().filter_map(|x| x.as_ref())
        }
    }
}

impl AddressSpace {
    pub fn new_empty(stack_top: VirtualAddress, heap_start: VirtualAddress) -> Self {
        Self {
            vmas: Mutex::new(heapless_vec::HeaplessVec::new()),
            heap_start: Mutex::new(heap_start),
            heap_end: Mutex::new(heap_start),
            stack_top,
            page_map: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a new VMA, rejecting overlap with any existing one.
    pub fn add_vma(&self, vma: Vma) -> Result<(), &'static str> {
        let mut vmas = self.vmas.lock();
        for existing in vmas.iter() {
            if existing.overlaps(vma.start, vma.end) {
                return Err("overlapping vma");
            }
        }
        vmas.push(vma)
    }

    pub fn remove_vma(&self, start: VirtualAddress) -> Option<Vma> {
        self.vmas.lock().remove_where(|v| v.start == start)
    }

    /// True if `[addr, addr+len)` lies entirely inside one VMA carrying
    /// every flag in `required` (spec.md §9's "Unvalidated user pointers"
    /// redesign flag: a syscall must check this before dereferencing a
    /// user-supplied pointer, not trust it past the kernel/user boundary).
    pub fn contains_range(&self, addr: VirtualAddress, len: u64, required: PageFlags) -> bool {
        if len == 0 {
            return true;
        }
        let Some(end) = addr.as_u64().checked_add(len) else {
            return false;
        };
        let end = VirtualAddress::new(end);
        self.vmas.lock().iter().any(|v| v.start <= addr && end <= v.end && v.flags.contains(required))
    }

    /// Snapshot of every live VMA. Used by callers (e.g. `fork`) that
    /// need to iterate without holding the VMA lock across further calls
    /// that might also need it.
    pub fn vmas_snapshot(&self) -> Vec<Vma> {
        self.vmas.lock().iter().copied().collect()
    }

    fn set_translation(&self, va: VirtualAddress, pa: PhysicalAddress) {
        self.page_map.lock().insert(va.align_down(), pa);
    }

    fn clear_translation(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.page_map.lock().remove(&va.align_down())
    }

    /// Physical address backing `va`, or `PhysicalAddress::new(0)` if the
    /// containing page is unmapped (spec.md §8: `translate` reads 0 after
    /// `unmap`).
    pub fn translate(&self, va: VirtualAddress) -> PhysicalAddress {
        self.page_map
            .lock()
            .get(&va.align_down())
            .copied()
            .unwrap_or(PhysicalAddress::new(0))
    }

    /// Every currently-mapped page whose address falls in `[start, end)`,
    /// with its backing physical address. Used by `fork` to copy only the
    /// pages a VMA actually has resident, not its whole (possibly huge,
    /// sparsely-backed) declared span.
    pub fn mapped_pages_in(&self, start: VirtualAddress, end: VirtualAddress) -> Vec<(VirtualAddress, PhysicalAddress)> {
        self.page_map.lock().range(start..end).map(|(&va, &pa)| (va, pa)).collect()
    }
}

lazy_static! {
    static ref KERNEL_ADDRESS_SPACE: AddressSpace =
        AddressSpace::new_empty(VirtualAddress::new(0), VirtualAddress::new(HEAP_START as u64));
}

pub fn kernel_address_space() -> &'static AddressSpace {
    &KERNEL_ADDRESS_SPACE
}

static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

pub fn allocator() -> &'static FrameAllocator {
    &FRAME_ALLOCATOR
}

/// Which address space the architectural page-table base register
/// currently serves, for callers (and `translate`-adjacent bookkeeping)
/// that want to ask "is this the live one" (spec.md §4.2).
static CURRENT_ADDRESS_SPACE: Mutex<Option<&'static AddressSpace>> = Mutex::new(None);

/// Allocate a fresh user address space: empty VMA list, empty page map,
/// default user heap (bottom) and stack (top) addresses (spec.md §4.2).
/// This kernel copies no per-space root table because it runs every task
/// against the one bootloader-built table (DESIGN.md Open Question #8);
/// the "copy of the kernel's high-half mappings" spec.md asks for is
/// therefore implicit in sharing that table rather than a real per-space
/// copy.
pub fn create_address_space(user_stack_top: VirtualAddress, user_heap_start: VirtualAddress) -> &'static AddressSpace {
    alloc::boxed::Box::leak(alloc::boxed::Box::new(AddressSpace::new_empty(user_stack_top, user_heap_start)))
}

/// Walk every page this space has mapped, freeing its backing frame and
/// unmapping it, then drop its VMA list (spec.md §4.2). The `&'static`
/// space allocation itself is not reclaimed — see
/// `process::lifecycle`'s address-space leak note — only what actually
/// costs physical memory.
pub fn destroy_address_space(space: &AddressSpace) {
    let mapped: Vec<(VirtualAddress, PhysicalAddress)> =
        space.page_map.lock().iter().map(|(&va, &pa)| (va, pa)).collect();
    for (va, pa) in mapped {
        let _ = page_table::unmap(va);
        space.clear_translation(va);
        let _ = FRAME_ALLOCATOR.free(FrameNumber::new(pa.as_u64() / FRAME_SIZE as u64));
    }
    let starts: Vec<VirtualAddress> = space.vmas_snapshot().iter().map(|v| v.start).collect();
    for start in starts {
        space.remove_vma(start);
    }
}

/// Load `space`'s page-table base and mark it current (spec.md §4.2).
/// Because every task shares one table (see `create_address_space`),
/// there is no per-space root to reload; this still flushes the TLB and
/// updates the current-address-space pointer the way a real per-space
/// switch would, so callers that ask "what's active" observe the space
/// that is nominally so.
pub fn switch_address_space(space: &'static AddressSpace) {
    *CURRENT_ADDRESS_SPACE.lock() = Some(space);
    crate::arch::cur::flush_tlb_all();
}

pub fn current_address_space() -> Option<&'static AddressSpace> {
    *CURRENT_ADDRESS_SPACE.lock()
}

/// Map one page into `space`, composing the arch-specific page-table
/// write with this space's VMA-level translation bookkeeping (spec.md
/// §4.2). `va`/`pa` are rounded down to their containing page/frame.
pub fn map(space: &AddressSpace, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), &'static str> {
    let va = va.align_down();
    page_table::map(va, pa, flags)?;
    space.set_translation(va, pa);
    Ok(())
}

/// Clear one page's mapping in `space`. A no-op, not an error, if it was
/// never mapped (matches `kfree`'s idempotence on non-heap pointers).
pub fn unmap(space: &AddressSpace, va: VirtualAddress) -> Result<(), &'static str> {
    let va = va.align_down();
    page_table::unmap(va)?;
    space.clear_translation(va);
    Ok(())
}

/// Linear-scan `space` for the smallest free virtual range of `pages`
/// contiguous pages between its heap and stack windows. Shared by
/// `alloc_anywhere` and `ipc::shared_region::region_map`, which both need
/// to pick a free window before mapping into it.
pub(crate) fn find_free_virtual_range(space: &AddressSpace, pages: usize) -> Result<VirtualAddress, &'static str> {
    let mut candidate = *space.heap_end.lock();
    loop {
        let candidate_end = VirtualAddress::new(candidate.as_u64() + (pages * FRAME_SIZE) as u64);
        if candidate_end > space.stack_top {
            return Err("no free virtual range large enough");
        }
        let occupied = space.vmas_snapshot().iter().any(|v| v.overlaps(candidate, candidate_end));
        if !occupied {
            return Ok(candidate);
        }
        candidate = VirtualAddress::new(candidate.as_u64() + FRAME_SIZE as u64);
    }
}

/// Allocate and map `n` fresh frames at `[va, va+n*FRAME_SIZE)`, zeroing
/// them when `flags` grants write access, and record the range as one
/// VMA (spec.md §4.2). Fails without mutating anything if any page in
/// the range is already mapped; on a partial frame-allocation or mapping
/// failure, unwinds every page it already committed.
pub fn alloc_pages(space: &AddressSpace, va: VirtualAddress, n: usize, flags: PageFlags) -> Result<(), &'static str> {
    let va = va.align_down();
    for i in 0..n {
        let page_va = VirtualAddress::new(va.as_u64() + (i * FRAME_SIZE) as u64);
        if space.page_map.lock().contains_key(&page_va) {
            return Err("page already present");
        }
    }

    let mut committed: Vec<(VirtualAddress, PhysicalAddress)> = Vec::with_capacity(n);
    let unwind = |committed: Vec<(VirtualAddress, PhysicalAddress)>, space: &AddressSpace| {
        for (unwind_va, unwind_pa) in committed.into_iter().rev() {
            let _ = page_table::unmap(unwind_va);
            space.clear_translation(unwind_va);
            let _ = FRAME_ALLOCATOR.free(FrameNumber::new(unwind_pa.as_u64() / FRAME_SIZE as u64));
        }
    };

    for i in 0..n {
        let page_va = VirtualAddress::new(va.as_u64() + (i * FRAME_SIZE) as u64);
        let frame = match FRAME_ALLOCATOR.allocate() {
            Ok(frame) => frame,
            Err(_) => {
                unwind(committed, space);
                return Err("out of physical memory");
            }
        };
        let pa = PhysicalAddress::new(frame.addr() as u64);

        if flags.contains(PageFlags::WRITABLE) {
            // SAFETY: `pa` was just allocated exclusively for this page;
            // only bare metal's identity/offset-mapped kernel view can
            // address physical memory directly like this, so this is
            // gated to the target that actually has one.
            #[cfg(target_os = "none")]
            unsafe {
                core::ptr::write_bytes(pa.as_u64() as *mut u8, 0, FRAME_SIZE);
            }
        }

        if let Err(e) = page_table::map(page_va, pa, flags) {
            let _ = FRAME_ALLOCATOR.free(frame);
            unwind(committed, space);
            return Err(e);
        }
        space.set_translation(page_va, pa);
        committed.push((page_va, pa));
    }

    if let Err(e) = space.add_vma(Vma {
        start: va,
        end: VirtualAddress::new(va.as_u64() + (n * FRAME_SIZE) as u64),
        flags,
    }) {
        unwind(committed, space);
        return Err(e);
    }
    Ok(())
}

/// Linear-scan `space`'s heap window for the smallest free VA range able
/// to hold `size` bytes, then `alloc_pages` it there (spec.md §4.2).
pub fn alloc_anywhere(space: &AddressSpace, size: usize, flags: PageFlags) -> Result<VirtualAddress, &'static str> {
    let pages = ((size + FRAME_SIZE - 1) / FRAME_SIZE).max(1);
    let va = find_free_virtual_range(space, pages)?;
    alloc_pages(space, va, pages, flags)?;
    let mut heap_end = space.heap_end.lock();
    let candidate_end = VirtualAddress::new(va.as_u64() + (pages * FRAME_SIZE) as u64);
    if candidate_end > *heap_end {
        *heap_end = candidate_end;
    }
    Ok(va)
}

pub use heap::HEAP_START;

/// Early bring-up: the frame allocator and kernel heap don't have real
/// memory regions yet (that happens in [`seed_from_boot_info`] once the
/// bootloader hands us the memory map); this just makes sure the
/// lazy-static singletons above exist before anything depends on them.
pub fn init() {
    lazy_static::initialize(&KERNEL_ADDRESS_SPACE);
    // SAFETY: called exactly once during boot, before any allocation.
    unsafe {
        heap::init();
    }
    log::info!("mm initialized (heap at {:#x})", HEAP_START);
}

/// Seed the PMM from the bootloader-reported physical memory map. Split
/// out of [`init`] because on bare metal the `BootInfo` only becomes
/// available once the bootloader hands control to `kernel_main`.
#[cfg(target_arch = "x86_64")]
pub fn seed_from_boot_info(boot_info: &'static bootloader_api::BootInfo) {
    if let Some(offset) = boot_info.physical_memory_offset.into_option() {
        page_table::set_physical_memory_offset(offset);
    }
    for region in boot_info.memory_regions.iter() {
        if region.kind != bootloader_api::info::MemoryRegionKind::Usable {
            continue;
        }
        let start_frame = region.start / FRAME_SIZE as u64;
        let count = ((region.end - region.start) / FRAME_SIZE as u64) as usize;
        FRAME_ALLOCATOR.add_region(FrameNumber::new(start_frame), count);
    }
    log::info!(
        "pmm seeded: {} frames free",
        FRAME_ALLOCATOR.stats().free_frames
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vma_overlap_is_rejected() {
        let asp = AddressSpace::new_empty(VirtualAddress::new(0x1000_0000), VirtualAddress::new(0x2000_0000));
        asp.add_vma(Vma {
            start: VirtualAddress::new(0x1000),
            end: VirtualAddress::new(0x2000),
            flags: PageFlags::PRESENT,
        })
        .unwrap();
        let result = asp.add_vma(Vma {
            start: VirtualAddress::new(0x1800),
            end: VirtualAddress::new(0x2800),
            flags: PageFlags::PRESENT,
        });
        assert!(result.is_err());
    }

    #[test]
    fn contains_range_requires_every_flag_and_full_containment() {
        let asp = AddressSpace::new_empty(VirtualAddress::new(0x1000_0000), VirtualAddress::new(0x2000_0000));
        asp.add_vma(Vma {
            start: VirtualAddress::new(0x1000),
            end: VirtualAddress::new(0x2000),
            flags: PageFlags::PRESENT.union(PageFlags::USER),
        })
        .unwrap();

        assert!(asp.contains_range(VirtualAddress::new(0x1000), 0x100, PageFlags::PRESENT));
        assert!(!asp.contains_range(VirtualAddress::new(0x1f00), 0x200, PageFlags::PRESENT)); // spills past the end
        assert!(!asp.contains_range(VirtualAddress::new(0x500), 0x10, PageFlags::PRESENT)); // outside any vma
        assert!(!asp.contains_range(VirtualAddress::new(0x1000), 0x10, PageFlags::WRITABLE)); // missing flag
    }

    #[test]
    fn contains_range_of_zero_length_is_always_satisfied() {
        let asp = AddressSpace::new_empty(VirtualAddress::new(0x1000_0000), VirtualAddress::new(0x2000_0000));
        assert!(asp.contains_range(VirtualAddress::new(0x1234), 0, PageFlags::PRESENT));
    }
}
