//! Arch-specific page table access, isolated behind a narrow surface so
//! `mm::mod` can stay arch-independent.

use super::{PhysicalAddress, VirtualAddress};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const NO_CACHE = 1 << 3;
        const NO_EXECUTE = 1 << 4;
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod x86_64_impl {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};
    use x86_64::structures::paging::{
        FrameAllocator as X86FrameAllocator, Mapper, OffsetPageTable, Page, PageTable,
        PageTableFlags, PhysFrame, Size4KiB,
    };
    use x86_64::{PhysAddr, VirtAddr};

    /// Bootloader-reported offset between a physical address and its
    /// identity-style mapping in kernel virtual space. Set once from
    /// `mm::seed_from_boot_info`, before the first `map`/`unmap` call.
    static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

    pub fn set_physical_memory_offset(offset: u64) {
        PHYS_MEM_OFFSET.store(offset, Ordering::Release);
    }

    struct FrameAllocAdapter;

    // SAFETY: `allocate_frame` only ever returns frames obtained from the
    // PMM, which guarantees exclusivity and 4KiB alignment.
    unsafe impl X86FrameAllocator<Size4KiB> for FrameAllocAdapter {
        fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
            let frame = crate::mm::allocator().allocate().ok()?;
            PhysFrame::from_start_address(PhysAddr::new(frame.addr() as u64)).ok()
        }
    }

    fn to_x86_flags(flags: PageFlags) -> PageTableFlags {
        let mut f = PageTableFlags::empty();
        if flags.contains(PageFlags::PRESENT) {
            f |= PageTableFlags::PRESENT;
        }
        if flags.contains(PageFlags::WRITABLE) {
            f |= PageTableFlags::WRITABLE;
        }
        if flags.contains(PageFlags::USER) {
            f |= PageTableFlags::USER_ACCESSIBLE;
        }
        if flags.contains(PageFlags::NO_CACHE) {
            f |= PageTableFlags::NO_CACHE;
        }
        if flags.contains(PageFlags::NO_EXECUTE) {
            f |= PageTableFlags::NO_EXECUTE;
        }
        f
    }

    /// Borrow the currently active (CR3-rooted) page table through the
    /// bootloader's physical-memory offset mapping. This kernel runs
    /// every task against one shared table rather than a root table per
    /// `AddressSpace` (see DESIGN.md Open Question #8), so "the target
    /// address space" is always whichever one is currently loaded.
    ///
    /// # Safety
    /// `set_physical_memory_offset` must already have been called with
    /// the real offset, and the caller must not hold another live
    /// `OffsetPageTable` over the same memory at the same time.
    unsafe fn active_table() -> OffsetPageTable<'static> {
        use x86_64::registers::control::Cr3;
        let offset = VirtAddr::new(PHYS_MEM_OFFSET.load(Ordering::Acquire));
        let (level_4_frame, _) = Cr3::read();
        let virt = offset + level_4_frame.start_address().as_u64();
        let table_ptr: *mut PageTable = virt.as_mut_ptr();
        // SAFETY: forwarded from this function's own contract.
        unsafe { OffsetPageTable::new(&mut *table_ptr, offset) }
    }

    /// Map one 4KiB page into the currently active address space. `va`
    /// and `pa` need not be pre-aligned; both are rounded down to their
    /// containing page/frame.
    pub fn map(va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), &'static str> {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(va.as_u64()));
        let frame = PhysFrame::containing_address(PhysAddr::new(pa.as_u64()));
        let mut allocator = FrameAllocAdapter;
        // SAFETY: every caller reaches this through `mm::map`/`alloc_pages`,
        // which serialize on the owning `AddressSpace`'s locks, so no two
        // calls observe the active table concurrently.
        unsafe {
            active_table()
                .map_to(page, frame, to_x86_flags(flags), &mut allocator)
                .map_err(|_| "map_to failed")?
                .flush();
        }
        Ok(())
    }

    /// Clear the leaf entry for `va` in the currently active address
    /// space and invalidate its TLB entry.
    pub fn unmap(va: VirtualAddress) -> Result<(), &'static str> {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(va.as_u64()));
        // SAFETY: see `map`.
        unsafe {
            let (_, flush) = active_table().unmap(page).map_err(|_| "unmap failed")?;
            flush.flush();
        }
        Ok(())
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use x86_64_impl::*;

// Hosted test target and the 32-bit port both land here: the hosted target
// has no real page tables to walk (and the real x86_64 backend's CR3/offset
// tricks would fault off bare metal), and the 32-bit port doesn't carry its
// own paging implementation (see `arch/x86/mod.rs`). Mapping is recorded
// only in the VMA/translation bookkeeping above this layer; this always
// succeeds.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod generic_impl {
    use super::*;

    pub fn set_physical_memory_offset(_offset: u64) {}

    pub fn map(_va: VirtualAddress, _pa: PhysicalAddress, _flags: PageFlags) -> Result<(), &'static str> {
        Ok(())
    }

    pub fn unmap(_va: VirtualAddress) -> Result<(), &'static str> {
        Ok(())
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub use generic_impl::*;
