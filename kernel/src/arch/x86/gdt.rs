//! Global Descriptor Table and Task State Segment, hand-rolled.
//!
//! The `x86_64` crate's typed `GlobalDescriptorTable`/`TaskStateSegment`
//! builders don't target this word width, so the flat 8-byte GDT entry
//! layout is built by hand here, the way the teacher's non-x86_64
//! backends build their own arch tables from scratch.

use core::mem::size_of;
use core::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

const KERNEL_STACK_SIZE: usize = 4096 * 5;

/// One flat 32-bit segment descriptor (Intel SDM Vol. 3A §3.4.5).
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: ((limit >> 16) & 0x0F) as u8 | (flags << 4),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Segment selectors, matching entry order in [`build_gdt`]: null, kernel
/// code, kernel data, user code, user data, TSS.
pub struct Selectors {
    pub kernel_code: u16,
    pub kernel_data: u16,
    pub user_code: u16,
    pub user_data: u16,
    pub tss: u16,
}

pub const SELECTORS: Selectors = Selectors {
    kernel_code: 1 << 3,
    kernel_data: 2 << 3,
    user_code: (3 << 3) | 3,
    user_data: (4 << 3) | 3,
    tss: 5 << 3,
};

/// Access byte: present, ring 0, code/data, executable bit varies.
const ACCESS_KERNEL_CODE: u8 = 0x9A;
const ACCESS_KERNEL_DATA: u8 = 0x92;
const ACCESS_USER_CODE: u8 = 0xFA;
const ACCESS_USER_DATA: u8 = 0xF2;
const ACCESS_TSS: u8 = 0x89;
const FLAGS_GRANULAR_32BIT: u8 = 0b1100;
const FLAGS_BYTE_GRANULAR: u8 = 0b0000;

#[repr(C, packed)]
struct Tss {
    prev_task_link: u32,
    esp0: u32,
    ss0: u32,
    _rest: [u32; 23],
    iomap_base: u16,
}

static KERNEL_STACK: Mutex<[u8; KERNEL_STACK_SIZE]> = Mutex::new([0u8; KERNEL_STACK_SIZE]);
static ESP0: AtomicU32 = AtomicU32::new(0);

lazy_static! {
    static ref TSS: Mutex<Tss> = Mutex::new(Tss {
        prev_task_link: 0,
        esp0: 0,
        ss0: (SELECTORS.kernel_data) as u32,
        _rest: [0; 23],
        iomap_base: size_of::<Tss>() as u16,
    });
    static ref GDT: [GdtEntry; 6] = {
        let tss_base = &*TSS as *const _ as u32;
        let tss_limit = size_of::<Tss>() as u32 - 1;
        [
            GdtEntry::null(),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_CODE, FLAGS_GRANULAR_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_KERNEL_DATA, FLAGS_GRANULAR_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_CODE, FLAGS_GRANULAR_32BIT),
            GdtEntry::new(0, 0xFFFFF, ACCESS_USER_DATA, FLAGS_GRANULAR_32BIT),
            GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, FLAGS_BYTE_GRANULAR),
        ]
    };
}

pub fn init() {
    {
        let stack = KERNEL_STACK.lock();
        let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
        ESP0.store(stack_top, Ordering::Relaxed);
        TSS.lock().esp0 = stack_top;
    }

    let pointer = GdtPointer {
        limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY: `pointer` references the GDT static above, alive for
    // `'static`; `lgdt` takes the address of the descriptor, not the
    // descriptor by value, so it must not be dropped before this runs
    // (it isn't — it's a local that outlives the asm call).
    unsafe {
        core::arch::asm!("lgdt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        core::arch::asm!(
            "push {code}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, {data}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            code = in(reg) SELECTORS.kernel_code as u32,
            data = in(reg) SELECTORS.kernel_data as u32,
            out("eax") _,
        );
        core::arch::asm!("ltr ax", in("ax") SELECTORS.tss, options(nostack, preserves_flags));
    }
}

pub fn selectors() -> &'static Selectors {
    &SELECTORS
}

/// Update ESP0 in the TSS, mirroring the 64-bit port's `set_kernel_stack`.
/// Takes `u64` to match the arch-independent `Pcb::kernel_stack_top`
/// field; a 32-bit kernel stack address always fits.
///
/// # Safety
/// Must be called with interrupts disabled.
pub fn set_kernel_stack(stack_top: u64) {
    TSS.lock().esp0 = stack_top as u32;
}
