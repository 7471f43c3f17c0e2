//! Name-addressed shared memory regions (spec.md §3). Ref-counted:
//! survives the creator's exit until the last holder drops its handle.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::mm::{AddressSpace, FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, FRAME_SIZE};
use crate::process::Pid;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SharedRegionFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl SharedRegionFlags {
    fn to_page_flags(self) -> PageFlags {
        let mut f = PageFlags::PRESENT.union(PageFlags::USER);
        if self.contains(SharedRegionFlags::WRITE) {
            f = f.union(PageFlags::WRITABLE);
        }
        f
    }
}

pub struct SharedRegion {
    pub name: String,
    pub physical_base: PhysicalAddress,
    pub size: usize,
    pub pages: usize,
    pub owner: Pid,
    pub flags: SharedRegionFlags,
    ref_count: AtomicUsize,
}

impl SharedRegion {
    pub fn incref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the remaining reference count after the decrement.
    pub fn decref(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn refs(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }
}

static REGISTRY: Mutex<Option<BTreeMap<String, Arc<SharedRegion>>>> = Mutex::new(None);

fn registry() -> spin::MutexGuard<'static, Option<BTreeMap<String, Arc<SharedRegion>>>> {
    let mut guard = REGISTRY.lock();
    if guard.is_none() {
        *guard = Some(BTreeMap::new());
    }
    guard
}

/// Create a named shared region, allocating `size`'s worth of physically
/// contiguous backing frames up front (spec.md §4.6): "region_create
/// allocates page-aligned backing frames and a reusable virtual window."
/// The window itself isn't chosen yet — that happens per-mapper in
/// [`region_map`], since each address space picks its own free range.
pub fn create(
    name: &str,
    size: usize,
    owner: Pid,
    flags: SharedRegionFlags,
) -> Result<Arc<SharedRegion>, super::IpcError> {
    let mut reg = registry();
    let map = reg.as_mut().unwrap();
    if map.contains_key(name) {
        return Err(super::IpcError::RegionExists);
    }
    let pages = ((size + FRAME_SIZE - 1) / FRAME_SIZE).max(1);
    let base = crate::mm::allocator()
        .alloc_contiguous(pages)
        .map_err(|_| super::IpcError::OutOfMemory)?;
    let region = Arc::new(SharedRegion {
        name: String::from(name),
        physical_base: PhysicalAddress::new(base.addr() as u64),
        size,
        pages,
        owner,
        flags,
        ref_count: AtomicUsize::new(1),
    });
    map.insert(String::from(name), region.clone());
    Ok(region)
}

pub fn open(name: &str) -> Option<Arc<SharedRegion>> {
    let region = registry().as_ref().unwrap().get(name).cloned();
    if let Some(r) = &region {
        r.incref();
    }
    region
}

/// Drop one reference; once it reaches zero the region leaves the
/// registry and its backing frames are freed. Any caller still holding it
/// mapped into an address space must `region_unmap` first — this only
/// reclaims the frames themselves, not a mapper's page-table entries.
pub fn close(name: &str) {
    let mut reg = registry();
    let map = reg.as_mut().unwrap();
    let Some(region) = map.get(name).cloned() else {
        return;
    };
    if region.decref() == 0 {
        map.remove(name);
        drop(reg);
        for i in 0..region.pages {
            let frame = FrameNumber::new(region.physical_base.as_u64() / FRAME_SIZE as u64 + i as u64);
            let _ = crate::mm::allocator().free(frame);
        }
    }
}

/// Map an open region's backing frames into `space` at a fresh virtual
/// window, honoring whichever of `requested_flags` the region itself
/// grants (a reader can't request WRITE on a READ-only region). Returns
/// the window's base address.
pub fn region_map(
    name: &str,
    space: &AddressSpace,
    requested_flags: SharedRegionFlags,
) -> Result<VirtualAddress, super::IpcError> {
    let region = registry()
        .as_ref()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or(super::IpcError::NoSuchRegion)?;
    let granted = requested_flags & region.flags;
    let page_flags = granted.to_page_flags();

    let va = crate::mm::find_free_virtual_range(space, region.pages)
        .map_err(|_| super::IpcError::OutOfMemory)?;
    for i in 0..region.pages {
        let page_va = VirtualAddress::new(va.as_u64() + (i * FRAME_SIZE) as u64);
        let pa = PhysicalAddress::new(region.physical_base.as_u64() + (i * FRAME_SIZE) as u64);
        if let Err(_e) = crate::mm::map(space, page_va, pa, page_flags) {
            for unwind_i in 0..i {
                let unwind_va = VirtualAddress::new(va.as_u64() + (unwind_i * FRAME_SIZE) as u64);
                let _ = crate::mm::unmap(space, unwind_va);
            }
            return Err(super::IpcError::OutOfMemory);
        }
    }
    Ok(va)
}

/// Undo [`region_map`]: clear every page-table entry the mapping
/// installed in `space`, starting at `va`. Does not touch the region's
/// ref count or backing frames — pair with [`close`] for that.
pub fn region_unmap(name: &str, space: &AddressSpace, va: VirtualAddress) -> Result<(), super::IpcError> {
    let region = registry()
        .as_ref()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or(super::IpcError::NoSuchRegion)?;
    for i in 0..region.pages {
        let page_va = VirtualAddress::new(va.as_u64() + (i * FRAME_SIZE) as u64);
        let _ = crate::mm::unmap(space, page_va);
    }
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::{AddressSpace, FrameNumber};

    fn test_space() -> &'static AddressSpace {
        alloc::boxed::Box::leak(alloc::boxed::Box::new(AddressSpace::new_empty(
            VirtualAddress::new(0x7fff_0000_0000),
            VirtualAddress::new(0x6000_0000_0000),
        )))
    }

    /// Seed a handful of frames only this test will touch, since these
    /// tests share the crate's single global frame allocator. Each test
    /// gets its own base, spaced well apart, so parallel test runs never
    /// contend over the same frames.
    fn seed(base: u64) {
        crate::mm::allocator().add_region(FrameNumber::new(base), 8);
    }

    #[test]
    fn survives_until_last_ref_drops() {
        seed(50_000);
        create("fb", 4096, Pid(1), SharedRegionFlags::READ | SharedRegionFlags::WRITE).unwrap();
        let _second = open("fb").unwrap();
        close("fb");
        assert!(open("fb").is_some(), "region must survive while a second holder exists");
        close("fb");
        close("fb");
        assert!(open("fb").is_none());
    }

    #[test]
    fn create_rejects_a_duplicate_name() {
        seed(60_000);
        create("dup", 4096, Pid(1), SharedRegionFlags::READ).unwrap();
        assert_eq!(
            create("dup", 4096, Pid(1), SharedRegionFlags::READ).unwrap_err(),
            super::super::IpcError::RegionExists
        );
        close("dup");
    }

    #[test]
    fn region_map_then_unmap_round_trips_the_translation() {
        seed(70_000);
        create("mapped", 4096, Pid(1), SharedRegionFlags::READ | SharedRegionFlags::WRITE).unwrap();
        let space = test_space();

        let va = region_map("mapped", space, SharedRegionFlags::READ | SharedRegionFlags::WRITE).unwrap();
        assert_ne!(space.translate(va), PhysicalAddress::new(0));

        region_unmap("mapped", space, va).unwrap();
        assert_eq!(space.translate(va), PhysicalAddress::new(0));

        close("mapped");
    }

    #[test]
    fn region_map_never_grants_write_beyond_what_the_region_allows() {
        seed(80_000);
        create("ro", 4096, Pid(1), SharedRegionFlags::READ).unwrap();
        let space = test_space();
        let granted = region_map("ro", space, SharedRegionFlags::READ | SharedRegionFlags::WRITE);
        assert!(granted.is_ok());
        close("ro");
    }
}
